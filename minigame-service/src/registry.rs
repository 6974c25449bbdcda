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

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use arcade_common::{ChannelId, Difficulty, GameKind, SessionSummary, StatsResponse, UserId};
use chrono::{DateTime, Utc};
use tokio::{
    sync::{RwLock, mpsc, watch},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{blackjack::CardCommand, error::GameError};

/// Guessing scores as of the last resolved round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreSnapshot {
    pub difficulty: Difficulty,
    pub scores: BTreeMap<UserId, u32>,
}

/// Shared between the registry, the session task, and whoever force-stops it.
pub struct SessionControl {
    stop: watch::Sender<bool>,
    finalized: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
    scores: Mutex<Option<ScoreSnapshot>>,
}

impl SessionControl {
    pub fn new() -> (Arc<Self>, watch::Receiver<bool>) {
        let (stop, stop_rx) = watch::channel(false);
        let control = Arc::new(Self {
            stop,
            finalized: AtomicBool::new(false),
            task: Mutex::new(None),
            scores: Mutex::new(None),
        });
        (control, stop_rx)
    }

    pub fn request_stop(&self) {
        self.stop.send_replace(true);
    }

    /// True for exactly one caller; that caller owns terminal cleanup.
    pub fn claim_finalization(&self) -> bool {
        !self.finalized.swap(true, Ordering::SeqCst)
    }

    pub fn attach_task(&self, handle: JoinHandle<()>) {
        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }
    }

    pub fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task.lock().ok().and_then(|mut task| task.take())
    }

    /// Keeps the running scores readable by a stop that has to abort the task.
    pub fn record_scores(&self, difficulty: Difficulty, scores: &BTreeMap<UserId, u32>) {
        if let Ok(mut snapshot) = self.scores.lock() {
            *snapshot = Some(ScoreSnapshot {
                difficulty,
                scores: scores.clone(),
            });
        }
    }

    pub fn take_recorded_scores(&self) -> Option<ScoreSnapshot> {
        self.scores.lock().ok().and_then(|mut snapshot| snapshot.take())
    }
}

#[derive(Clone)]
pub enum SessionInbox {
    Blackjack(mpsc::UnboundedSender<CardCommand>),
    Guessing,
}

#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub channel_id: ChannelId,
    pub host_id: UserId,
    pub created_at: DateTime<Utc>,
    pub inbox: SessionInbox,
    pub control: Arc<SessionControl>,
}

impl SessionHandle {
    pub fn kind(&self) -> GameKind {
        match self.inbox {
            SessionInbox::Blackjack(_) => GameKind::Blackjack,
            SessionInbox::Guessing => GameKind::Guessing,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<ChannelId, SessionHandle>,
    players: HashMap<UserId, ChannelId>,
    rounds_played: u64,
    sessions_finished: u64,
}

/// Active sessions keyed by channel. Every operation takes the one lock, so
/// callers never see a half-applied change.
#[derive(Default)]
pub struct SessionRegistry {
    state: RwLock<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, handle: SessionHandle) -> Result<(), GameError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.sessions.get(&handle.channel_id) {
            return Err(GameError::already_active(match existing.kind() {
                GameKind::Blackjack => "A blackjack game is already running in this channel.",
                GameKind::Guessing => "A guessing game is currently in progress in this channel.",
            }));
        }
        state.sessions.insert(handle.channel_id, handle);
        Ok(())
    }

    pub async fn find(&self, channel_id: ChannelId) -> Option<SessionHandle> {
        self.state.read().await.sessions.get(&channel_id).cloned()
    }

    pub async fn find_by_player(&self, user_id: UserId) -> Option<SessionHandle> {
        let state = self.state.read().await;
        state
            .players
            .get(&user_id)
            .and_then(|channel_id| state.sessions.get(channel_id))
            .cloned()
    }

    pub async fn find_by_game(&self, game_id: &str) -> Option<SessionHandle> {
        let game_id = Uuid::parse_str(game_id).ok()?;
        self.state
            .read()
            .await
            .sessions
            .values()
            .find(|handle| handle.session_id == game_id)
            .cloned()
    }

    /// Seats a player in the card game running in `channel_id`.
    pub async fn bind_player(&self, channel_id: ChannelId, user_id: UserId) -> Result<(), GameError> {
        let mut state = self.state.write().await;
        if !state.sessions.contains_key(&channel_id) {
            return Err(GameError::NotFound(
                "That game is no longer running.".to_string(),
            ));
        }
        match state.players.get(&user_id) {
            Some(bound) if *bound != channel_id => Err(GameError::player_in_game(
                "You are already in a blackjack game.",
            )),
            _ => {
                state.players.insert(user_id, channel_id);
                Ok(())
            }
        }
    }

    pub async fn unbind_player(&self, user_id: UserId) {
        self.state.write().await.players.remove(&user_id);
    }

    /// Removes a session that ran, counting it as finished. Only the entry
    /// still identified by `session_id` is touched.
    pub async fn remove(&self, channel_id: ChannelId, session_id: Uuid) -> Option<SessionHandle> {
        self.take_entry(channel_id, session_id, true).await
    }

    /// Rolls back a registration whose session never started.
    pub async fn discard(&self, channel_id: ChannelId, session_id: Uuid) -> Option<SessionHandle> {
        self.take_entry(channel_id, session_id, false).await
    }

    async fn take_entry(
        &self,
        channel_id: ChannelId,
        session_id: Uuid,
        finished: bool,
    ) -> Option<SessionHandle> {
        let mut state = self.state.write().await;
        match state.sessions.get(&channel_id) {
            Some(handle) if handle.session_id == session_id => {}
            _ => return None,
        }
        let removed = state.sessions.remove(&channel_id);
        state.players.retain(|_, bound| *bound != channel_id);
        if finished {
            state.sessions_finished += 1;
        }
        removed
    }

    pub async fn record_round(&self) {
        self.state.write().await.rounds_played += 1;
    }

    pub async fn active_count(&self, kind: GameKind) -> usize {
        self.state
            .read()
            .await
            .sessions
            .values()
            .filter(|handle| handle.kind() == kind)
            .count()
    }

    pub async fn rounds_played(&self) -> u64 {
        self.state.read().await.rounds_played
    }

    pub async fn sessions_finished(&self) -> u64 {
        self.state.read().await.sessions_finished
    }

    pub async fn stats(&self) -> StatsResponse {
        let state = self.state.read().await;
        let count = |kind: GameKind| {
            state
                .sessions
                .values()
                .filter(|handle| handle.kind() == kind)
                .count()
        };
        StatsResponse {
            active_card_games: count(GameKind::Blackjack),
            active_guessing_games: count(GameKind::Guessing),
            rounds_played: state.rounds_played,
            sessions_finished: state.sessions_finished,
        }
    }

    pub async fn summary(&self, channel_id: ChannelId) -> Option<SessionSummary> {
        let state = self.state.read().await;
        let handle = state.sessions.get(&channel_id)?;
        let mut players: Vec<UserId> = state
            .players
            .iter()
            .filter(|(_, bound)| **bound == channel_id)
            .map(|(user_id, _)| *user_id)
            .collect();
        players.sort_unstable();
        Some(SessionSummary {
            session_id: handle.session_id.to_string(),
            channel_id,
            host_id: handle.host_id,
            kind: handle.kind(),
            players,
            created_at: handle.created_at,
        })
    }
}
