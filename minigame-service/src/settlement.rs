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

use std::{collections::BTreeMap, future::Future, sync::Arc};

use arcade_common::{Difficulty, UserId};
use tracing::{error, info, warn};

use crate::storage::Storage;

/// Money moved by a settled card game. A `None` side is the house and is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceTransfer {
    pub from: Option<UserId>,
    pub to: Option<UserId>,
    pub amount: i64,
}

/// Applies finished sessions to persisted balances and scores.
#[derive(Clone)]
pub struct SettlementBridge {
    storage: Arc<dyn Storage>,
}

impl SettlementBridge {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn settle_card_game(&self, transfer: BalanceTransfer) -> anyhow::Result<()> {
        if transfer.amount == 0 || (transfer.from.is_none() && transfer.to.is_none()) {
            return Ok(());
        }
        retry_once("transfer_balance", || {
            self.storage
                .transfer_balance(transfer.from, transfer.to, transfer.amount)
        })
        .await?;
        info!(
            from = ?transfer.from,
            to = ?transfer.to,
            amount = transfer.amount,
            "card game settled"
        );
        Ok(())
    }

    /// Adds each non-zero score to the player's stored total for `difficulty`.
    /// Returns the players whose write failed after a retry.
    pub async fn persist_scores(
        &self,
        difficulty: Difficulty,
        scores: &BTreeMap<UserId, u32>,
    ) -> Vec<UserId> {
        let mut failed = Vec::new();
        for (&user_id, &score) in scores.iter().filter(|(_, score)| **score > 0) {
            let result = retry_once("upsert_score", || {
                self.storage
                    .upsert_score(user_id, difficulty, i64::from(score))
            })
            .await;
            if let Err(err) = result {
                error!(user_id, score, error = %err, "failed to persist guessing score");
                failed.push(user_id);
            }
        }
        failed
    }
}

async fn retry_once<T, F, Fut>(operation: &str, mut call: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    match call().await {
        Ok(value) => Ok(value),
        Err(first) => {
            warn!(operation, error = %first, "storage call failed; retrying once");
            call().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStorage;

    #[tokio::test]
    async fn transfer_is_retried_once() {
        let storage = Arc::new(MemoryStorage::default());
        storage.fail_next_writes(1);
        let bridge = SettlementBridge::new(storage.clone());

        bridge
            .settle_card_game(BalanceTransfer {
                from: Some(2),
                to: Some(1),
                amount: 30,
            })
            .await
            .unwrap();

        assert_eq!(storage.balance_of(1), 130);
        assert_eq!(storage.balance_of(2), 70);
        assert_eq!(storage.transfer_count(), 1);
    }

    #[tokio::test]
    async fn transfer_gives_up_after_second_failure() {
        let storage = Arc::new(MemoryStorage::default());
        storage.fail_next_writes(2);
        let bridge = SettlementBridge::new(storage.clone());

        let result = bridge
            .settle_card_game(BalanceTransfer {
                from: Some(2),
                to: None,
                amount: 30,
            })
            .await;

        assert!(result.is_err());
        assert_eq!(storage.transfer_count(), 0);
    }

    #[tokio::test]
    async fn zero_scores_are_not_written() {
        let storage = Arc::new(MemoryStorage::default());
        let bridge = SettlementBridge::new(storage.clone());
        let scores = BTreeMap::from([(1, 3), (2, 0)]);

        let failed = bridge.persist_scores(Difficulty::Hard, &scores).await;

        assert!(failed.is_empty());
        assert_eq!(storage.score_writes(), vec![(1, Difficulty::Hard, 3)]);
    }

    #[tokio::test]
    async fn ties_move_no_money() {
        let storage = Arc::new(MemoryStorage::default());
        let bridge = SettlementBridge::new(storage.clone());

        bridge
            .settle_card_game(BalanceTransfer {
                from: None,
                to: None,
                amount: 50,
            })
            .await
            .unwrap();

        assert_eq!(storage.transfer_count(), 0);
    }
}
