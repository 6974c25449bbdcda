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

//! Fakes for the storage, transport, and moderator seams.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use arcade_common::{
    ChannelId, Difficulty, GameId, MessageHandle, OutboundMessage, STARTING_BALANCE, UserId,
};
use async_trait::async_trait;

use crate::{
    AppState, ServiceSettings,
    catalog::SubjectCatalog,
    collaborators::{ChatTransport, Moderators},
    registry::SessionRegistry,
    settlement::SettlementBridge,
    storage::{CardGameRow, GameLookup, Storage},
    turn_clock::ChatEventBus,
};

#[derive(Default)]
pub struct MemoryStorage {
    balances: Mutex<HashMap<UserId, i64>>,
    transfers: Mutex<Vec<(Option<UserId>, Option<UserId>, i64)>>,
    score_writes: Mutex<Vec<(UserId, Difficulty, i64)>>,
    games: Mutex<HashMap<GameId, CardGameRow>>,
    failing_writes: AtomicUsize,
}

impl MemoryStorage {
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn should_fail(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    pub fn set_balance(&self, user_id: UserId, balance: i64) {
        self.balances.lock().unwrap().insert(user_id, balance);
    }

    pub fn balance_of(&self, user_id: UserId) -> i64 {
        *self
            .balances
            .lock()
            .unwrap()
            .get(&user_id)
            .unwrap_or(&STARTING_BALANCE)
    }

    pub fn transfer_count(&self) -> usize {
        self.transfers.lock().unwrap().len()
    }

    pub fn score_writes(&self) -> Vec<(UserId, Difficulty, i64)> {
        self.score_writes.lock().unwrap().clone()
    }

    pub fn game_rows(&self) -> Vec<CardGameRow> {
        self.games.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn balance(&self, user_id: UserId) -> anyhow::Result<i64> {
        Ok(self.balance_of(user_id))
    }

    async fn transfer_balance(
        &self,
        from: Option<UserId>,
        to: Option<UserId>,
        amount: i64,
    ) -> anyhow::Result<()> {
        if self.should_fail() {
            anyhow::bail!("storage unavailable");
        }
        let mut balances = self.balances.lock().unwrap();
        if let Some(from) = from {
            *balances.entry(from).or_insert(STARTING_BALANCE) -= amount;
        }
        if let Some(to) = to {
            *balances.entry(to).or_insert(STARTING_BALANCE) += amount;
        }
        self.transfers.lock().unwrap().push((from, to, amount));
        Ok(())
    }

    async fn upsert_score(
        &self,
        user_id: UserId,
        difficulty: Difficulty,
        increment: i64,
    ) -> anyhow::Result<()> {
        if self.should_fail() {
            anyhow::bail!("storage unavailable");
        }
        self.score_writes
            .lock()
            .unwrap()
            .push((user_id, difficulty, increment));
        Ok(())
    }

    async fn top_scores(
        &self,
        difficulty: Difficulty,
        limit: usize,
    ) -> anyhow::Result<Vec<(UserId, i64)>> {
        let mut totals: HashMap<UserId, i64> = HashMap::new();
        for (user_id, written, increment) in self.score_writes() {
            if written == difficulty {
                *totals.entry(user_id).or_default() += increment;
            }
        }
        let mut ranked: Vec<(UserId, i64)> = totals.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(limit);
        Ok(ranked)
    }

    async fn fetch_game(&self, lookup: GameLookup) -> anyhow::Result<Option<CardGameRow>> {
        let games = self.games.lock().unwrap();
        Ok(games
            .values()
            .find(|row| match &lookup {
                GameLookup::Id(game_id) => &row.game_id == game_id,
                GameLookup::Channel(channel_id) => row.channel_id == *channel_id,
                GameLookup::Player(player_id) => {
                    row.player1 == *player_id || row.player2 == Some(*player_id)
                }
            })
            .cloned())
    }

    async fn create_card_game(&self, row: &CardGameRow) -> anyhow::Result<()> {
        if self.should_fail() {
            anyhow::bail!("storage unavailable");
        }
        self.games
            .lock()
            .unwrap()
            .insert(row.game_id.clone(), row.clone());
        Ok(())
    }

    async fn add_second_player(
        &self,
        game_id: &str,
        player_id: UserId,
        bid: i64,
    ) -> anyhow::Result<()> {
        let mut games = self.games.lock().unwrap();
        let row = games
            .get_mut(game_id)
            .ok_or_else(|| anyhow::anyhow!("unknown game {game_id}"))?;
        row.player2 = Some(player_id);
        row.bid2 = Some(bid);
        Ok(())
    }

    async fn delete_card_game(&self, game_id: &str) -> anyhow::Result<()> {
        self.games.lock().unwrap().remove(game_id);
        Ok(())
    }

    async fn delete_all_card_games(&self) -> anyhow::Result<u64> {
        let mut games = self.games.lock().unwrap();
        let removed = games.len() as u64;
        games.clear();
        Ok(removed)
    }
}

#[derive(Default)]
pub struct RecordingTransport {
    next_message_id: AtomicU64,
    pub sent: Mutex<Vec<(ChannelId, OutboundMessage)>>,
    pub edited: Mutex<Vec<(MessageHandle, OutboundMessage)>>,
    pub deleted: Mutex<Vec<MessageHandle>>,
    pub reactions: Mutex<Vec<(MessageHandle, String)>>,
}

impl RecordingTransport {
    /// Text and embed bodies of everything sent, in order.
    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| {
                let mut text = message.content.clone().unwrap_or_default();
                if let Some(embed) = &message.embed {
                    text.push_str(&embed.title);
                    text.push('\n');
                    text.push_str(&embed.description);
                }
                text
            })
            .collect()
    }

    pub fn any_text_contains(&self, needle: &str) -> bool {
        self.texts().iter().any(|text| text.contains(needle))
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send(
        &self,
        channel_id: ChannelId,
        message: OutboundMessage,
    ) -> anyhow::Result<MessageHandle> {
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent.lock().unwrap().push((channel_id, message));
        Ok(MessageHandle {
            channel_id,
            message_id,
        })
    }

    async fn edit(&self, handle: MessageHandle, message: OutboundMessage) -> anyhow::Result<()> {
        self.edited.lock().unwrap().push((handle, message));
        Ok(())
    }

    async fn delete(&self, handle: MessageHandle) -> anyhow::Result<()> {
        self.deleted.lock().unwrap().push(handle);
        Ok(())
    }

    async fn add_reaction(&self, handle: MessageHandle, emoji: &str) -> anyhow::Result<()> {
        self.reactions
            .lock()
            .unwrap()
            .push((handle, emoji.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FixedModerators(pub HashSet<UserId>);

#[async_trait]
impl Moderators for FixedModerators {
    async fn is_moderator(&self, user_id: UserId) -> bool {
        self.0.contains(&user_id)
    }
}

pub struct TestHarness {
    pub state: AppState,
    pub storage: Arc<MemoryStorage>,
    pub transport: Arc<RecordingTransport>,
}

pub const HOUSE_ID: UserId = 999;
pub const MODERATOR_ID: UserId = 500;

pub fn harness(catalog: SubjectCatalog) -> TestHarness {
    let storage = Arc::new(MemoryStorage::default());
    let transport = Arc::new(RecordingTransport::default());
    let state = AppState {
        registry: Arc::new(SessionRegistry::new()),
        storage: storage.clone(),
        transport: transport.clone(),
        moderators: Arc::new(FixedModerators(HashSet::from([MODERATOR_ID]))),
        events: ChatEventBus::new(64),
        catalog: Arc::new(catalog),
        settlement: SettlementBridge::new(storage.clone()),
        settings: ServiceSettings {
            house_player_id: HOUSE_ID,
            ..ServiceSettings::default()
        },
    };
    TestHarness {
        state,
        storage,
        transport,
    }
}

/// Lets spawned session tasks run until they are all parked.
pub async fn settle_tasks() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
