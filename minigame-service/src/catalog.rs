// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::collections::HashSet;

use arcade_common::{Difficulty, Gender, normalize_answer};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subject {
    pub id: u32,
    pub full_name: String,
    pub stage_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub gender: Gender,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl Subject {
    /// Aliases plus full and stage name, case-folded. Blank entries are dropped.
    pub fn accepted_answers(&self) -> HashSet<String> {
        self.aliases
            .iter()
            .chain([&self.full_name, &self.stage_name])
            .map(|answer| normalize_answer(answer))
            .filter(|answer| !answer.is_empty())
            .collect()
    }

    pub fn reveal(&self) -> String {
        let mut text = format!("`{} ({})`", self.full_name, self.stage_name);
        if !self.groups.is_empty() {
            let groups: Vec<String> = self.groups.iter().map(|group| format!("`{group}`")).collect();
            text.push_str(&format!(" from {}", groups.join(", ")));
        }
        text
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubjectCatalog {
    #[serde(default)]
    pub subjects: Vec<Subject>,
}

impl SubjectCatalog {
    pub fn new(subjects: Vec<Subject>) -> Self {
        Self { subjects }
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    /// Subjects of an admitted gender at or below the chosen difficulty.
    pub fn eligible(&self, gender: Gender, difficulty: Difficulty) -> Vec<Subject> {
        self.subjects
            .iter()
            .filter(|subject| gender.admits(subject.gender))
            .filter(|subject| subject.difficulty.rank() <= difficulty.rank())
            .filter(|subject| !subject.accepted_answers().is_empty())
            .cloned()
            .collect()
    }
}

/// Reads the catalogue named by `SUBJECT_CATALOG_PATH`. Problems are logged and
/// yield an empty catalogue, which makes guessing games fail at setup.
pub fn load_subject_catalog() -> SubjectCatalog {
    let Some(path) = std::env::var("SUBJECT_CATALOG_PATH")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    else {
        warn!("SUBJECT_CATALOG_PATH not set; guessing games are unavailable");
        return SubjectCatalog::default();
    };

    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(path = %path, error = %error, "failed to read subject catalogue file");
            return SubjectCatalog::default();
        }
    };

    parse_subject_catalog(&raw, &path).unwrap_or_default()
}

fn parse_subject_catalog(raw: &str, path: &str) -> Option<SubjectCatalog> {
    if raw.trim().is_empty() {
        warn!(path = %path, "subject catalogue file is empty");
        return None;
    }

    match serde_yaml::from_str::<SubjectCatalog>(raw) {
        Ok(catalog) => Some(catalog),
        Err(error) => {
            warn!(path = %path, error = %error, "failed to parse subject catalogue yaml");
            None
        }
    }
}

#[cfg(test)]
pub(crate) fn subject(id: u32, name: &str, gender: Gender, difficulty: Difficulty) -> Subject {
    Subject {
        id,
        full_name: format!("{name} Full"),
        stage_name: name.to_string(),
        aliases: vec![name.to_lowercase()],
        gender,
        difficulty,
        groups: vec!["Group".to_string()],
        image_url: None,
    }
}
