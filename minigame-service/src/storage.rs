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

use std::str::FromStr;

use anyhow::Context;
use arcade_common::{ChannelId, Difficulty, GameId, STARTING_BALANCE, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

/// Persisted membership of a card game, used to keep a player in at most one game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardGameRow {
    pub game_id: GameId,
    pub channel_id: ChannelId,
    pub player1: UserId,
    pub bid1: i64,
    pub player2: Option<UserId>,
    pub bid2: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameLookup {
    Id(GameId),
    Channel(ChannelId),
    Player(UserId),
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Current balance; unknown users are registered with the starting balance.
    async fn balance(&self, user_id: UserId) -> anyhow::Result<i64>;
    /// Moves `amount` from one user to another. `None` is the house, whose side is skipped.
    async fn transfer_balance(
        &self,
        from: Option<UserId>,
        to: Option<UserId>,
        amount: i64,
    ) -> anyhow::Result<()>;
    async fn upsert_score(
        &self,
        user_id: UserId,
        difficulty: Difficulty,
        increment: i64,
    ) -> anyhow::Result<()>;
    async fn top_scores(
        &self,
        difficulty: Difficulty,
        limit: usize,
    ) -> anyhow::Result<Vec<(UserId, i64)>>;
    async fn fetch_game(&self, lookup: GameLookup) -> anyhow::Result<Option<CardGameRow>>;
    async fn create_card_game(&self, row: &CardGameRow) -> anyhow::Result<()>;
    async fn add_second_player(
        &self,
        game_id: &str,
        player_id: UserId,
        bid: i64,
    ) -> anyhow::Result<()>;
    async fn delete_card_game(&self, game_id: &str) -> anyhow::Result<()>;
    /// Card games cannot survive a restart, so stale rows are cleared at startup.
    async fn delete_all_card_games(&self) -> anyhow::Result<u64>;
}

pub struct SqliteStorage {
    pool: SqlitePool,
}

type CardGameTuple = (
    String,
    i64,
    i64,
    i64,
    Option<i64>,
    Option<i64>,
    DateTime<Utc>,
);

// Chat ids are 63-bit snowflakes; SQLite integers are signed.
fn db_id(id: u64) -> i64 {
    id as i64
}

fn from_db_id(id: i64) -> u64 {
    id as u64
}

fn card_game_from_tuple(tuple: CardGameTuple) -> CardGameRow {
    let (game_id, channel_id, player1, bid1, player2, bid2, created_at) = tuple;
    CardGameRow {
        game_id,
        channel_id: from_db_id(channel_id),
        player1: from_db_id(player1),
        bid1,
        player2: player2.map(from_db_id),
        bid2,
        created_at,
    }
}

impl SqliteStorage {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context(format!("invalid sqlite url {database_url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to open sqlite database")?;
        Self::new(pool).await
    }

    pub async fn new(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS balances (
                user_id INTEGER PRIMARY KEY,
                money INTEGER NOT NULL
            )
        "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS guessing_scores (
                user_id INTEGER NOT NULL,
                difficulty TEXT NOT NULL,
                score INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, difficulty)
            )
        "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS card_games (
                game_id TEXT PRIMARY KEY,
                channel_id INTEGER NOT NULL,
                player1 INTEGER NOT NULL,
                bid1 INTEGER NOT NULL,
                player2 INTEGER,
                bid2 INTEGER,
                created_at TIMESTAMP NOT NULL
            )
        "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

const CARD_GAME_COLUMNS: &str =
    "game_id, channel_id, player1, bid1, player2, bid2, created_at";

#[async_trait]
impl Storage for SqliteStorage {
    async fn balance(&self, user_id: UserId) -> anyhow::Result<i64> {
        sqlx::query("INSERT OR IGNORE INTO balances (user_id, money) VALUES (?, ?)")
            .bind(db_id(user_id))
            .bind(STARTING_BALANCE)
            .execute(&self.pool)
            .await
            .context("failed to register balance")?;

        let (money,): (i64,) = sqlx::query_as("SELECT money FROM balances WHERE user_id = ?")
            .bind(db_id(user_id))
            .fetch_one(&self.pool)
            .await
            .context("failed to read balance")?;
        Ok(money)
    }

    async fn transfer_balance(
        &self,
        from: Option<UserId>,
        to: Option<UserId>,
        amount: i64,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        for (user_id, delta) in [(from, -amount), (to, amount)] {
            let Some(user_id) = user_id else {
                continue;
            };
            sqlx::query("INSERT OR IGNORE INTO balances (user_id, money) VALUES (?, ?)")
                .bind(db_id(user_id))
                .bind(STARTING_BALANCE)
                .execute(&mut *tx)
                .await?;
            sqlx::query("UPDATE balances SET money = money + ? WHERE user_id = ?")
                .bind(delta)
                .bind(db_id(user_id))
                .execute(&mut *tx)
                .await
                .context("failed to update balance")?;
        }

        tx.commit().await.context("failed to commit transfer")?;
        Ok(())
    }

    async fn upsert_score(
        &self,
        user_id: UserId,
        difficulty: Difficulty,
        increment: i64,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO guessing_scores (user_id, difficulty, score) VALUES (?, ?, ?) \
             ON CONFLICT(user_id, difficulty) DO UPDATE SET score = score + excluded.score",
        )
        .bind(db_id(user_id))
        .bind(difficulty.as_str())
        .bind(increment)
        .execute(&self.pool)
        .await
        .context("failed to upsert guessing score")?;
        Ok(())
    }

    async fn top_scores(
        &self,
        difficulty: Difficulty,
        limit: usize,
    ) -> anyhow::Result<Vec<(UserId, i64)>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT user_id, score FROM guessing_scores WHERE difficulty = ? \
             ORDER BY score DESC, user_id ASC LIMIT ?",
        )
        .bind(difficulty.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("failed to read leaderboard")?;

        Ok(rows
            .into_iter()
            .map(|(user_id, score)| (from_db_id(user_id), score))
            .collect())
    }

    async fn fetch_game(&self, lookup: GameLookup) -> anyhow::Result<Option<CardGameRow>> {
        let row: Option<CardGameTuple> = match lookup {
            GameLookup::Id(game_id) => {
                sqlx::query_as(&format!(
                    "SELECT {CARD_GAME_COLUMNS} FROM card_games WHERE game_id = ?"
                ))
                .bind(game_id)
                .fetch_optional(&self.pool)
                .await
            }
            GameLookup::Channel(channel_id) => {
                sqlx::query_as(&format!(
                    "SELECT {CARD_GAME_COLUMNS} FROM card_games WHERE channel_id = ? \
                     ORDER BY created_at LIMIT 1"
                ))
                .bind(db_id(channel_id))
                .fetch_optional(&self.pool)
                .await
            }
            GameLookup::Player(player_id) => {
                sqlx::query_as(&format!(
                    "SELECT {CARD_GAME_COLUMNS} FROM card_games \
                     WHERE player1 = ? OR player2 = ? LIMIT 1"
                ))
                .bind(db_id(player_id))
                .bind(db_id(player_id))
                .fetch_optional(&self.pool)
                .await
            }
        }
        .context("failed to fetch card game")?;

        Ok(row.map(card_game_from_tuple))
    }

    async fn create_card_game(&self, row: &CardGameRow) -> anyhow::Result<()> {
        sqlx::query(&format!(
            "INSERT INTO card_games ({CARD_GAME_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&row.game_id)
        .bind(db_id(row.channel_id))
        .bind(db_id(row.player1))
        .bind(row.bid1)
        .bind(row.player2.map(db_id))
        .bind(row.bid2)
        .bind(row.created_at)
        .execute(&self.pool)
        .await
        .context("failed to create card game")?;
        Ok(())
    }

    async fn add_second_player(
        &self,
        game_id: &str,
        player_id: UserId,
        bid: i64,
    ) -> anyhow::Result<()> {
        let result = sqlx::query(
            "UPDATE card_games SET player2 = ?, bid2 = ? WHERE game_id = ? AND player2 IS NULL",
        )
        .bind(db_id(player_id))
        .bind(bid)
        .bind(game_id)
        .execute(&self.pool)
        .await
        .context("failed to add second player")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("card game {game_id} has no open seat");
        }
        Ok(())
    }

    async fn delete_card_game(&self, game_id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM card_games WHERE game_id = ?")
            .bind(game_id)
            .execute(&self.pool)
            .await
            .context("failed to delete card game")?;
        Ok(())
    }

    async fn delete_all_card_games(&self) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM card_games")
            .execute(&self.pool)
            .await
            .context("failed to clear card games")?;
        Ok(result.rows_affected())
    }
}
