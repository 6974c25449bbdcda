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

/// Failure taxonomy shared by the command surface and both engines.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    /// Bad bid, out-of-range parameter, or an action in the wrong state. Nothing changes.
    #[error("{message}")]
    UserInput { code: &'static str, message: String },
    /// Detected before any mutation.
    #[error("{message}")]
    Conflict { code: &'static str, message: String },
    /// The session cannot run (empty pool, exhausted deck) and goes straight to its terminal state.
    #[error("{0}")]
    Setup(String),
    #[error("{0}")]
    NotAuthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("upstream failure: {0:#}")]
    Upstream(#[from] anyhow::Error),
}

impl GameError {
    pub fn invalid_bid(message: impl Into<String>) -> Self {
        GameError::UserInput {
            code: "INVALID_BID",
            message: message.into(),
        }
    }

    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        GameError::UserInput {
            code: "INVALID_PARAMETERS",
            message: message.into(),
        }
    }

    pub fn wrong_state(message: impl Into<String>) -> Self {
        GameError::UserInput {
            code: "WRONG_STATE",
            message: message.into(),
        }
    }

    pub fn already_active(message: impl Into<String>) -> Self {
        GameError::Conflict {
            code: "ALREADY_ACTIVE",
            message: message.into(),
        }
    }

    pub fn player_in_game(message: impl Into<String>) -> Self {
        GameError::Conflict {
            code: "PLAYER_IN_GAME",
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GameError::UserInput { code, .. } | GameError::Conflict { code, .. } => code,
            GameError::Setup(_) => "SETUP_FAILED",
            GameError::NotAuthorized(_) => "NOT_AUTHORIZED",
            GameError::NotFound(_) => "NOT_FOUND",
            GameError::Upstream(_) => "UPSTREAM_FAILURE",
        }
    }
}
