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

use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const STARTING_BALANCE: i64 = 100;
pub const BLACKJACK: u32 = 21;
pub const HOUSE_STAND_THRESHOLD: u32 = 16;
pub const DECK_SIZE: u8 = 52;
pub const CARDS_PER_SUIT: u8 = 13;
/// Card ids whose value drops from 11 to 1 when a hand would otherwise bust.
pub const ACE_CARD_IDS: [u8; 4] = [1, 14, 27, 40];
pub const ACE_HIGH_VALUE: u32 = 11;
pub const ACE_LOW_VALUE: u32 = 1;

pub const DEFAULT_CARD_TURN_TIMEOUT_SECONDS: u64 = 120;
pub const DEFAULT_GUESSING_ROUNDS: u32 = 20;
pub const MIN_GUESSING_ROUNDS: u32 = 1;
pub const MAX_GUESSING_ROUNDS: u32 = 60;
pub const DEFAULT_ROUND_TIMEOUT_SECONDS: u64 = 20;
pub const MIN_ROUND_TIMEOUT_SECONDS: u64 = 3;
pub const MAX_ROUND_TIMEOUT_SECONDS: u64 = 60;
pub const LEADERBOARD_SIZE: usize = 10;

pub const SKIP_KEYWORD: &str = "skip";
pub const STOP_KEYWORDS: [&str; 2] = ["stop", "end"];
pub const CORRECT_ANSWER_EMOJI: &str = "\u{2705}";

pub type UserId = u64;
pub type ChannelId = u64;
pub type MessageId = u64;
pub type GameId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    Blackjack,
    Guessing,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    All,
}

impl Gender {
    const MALE_ALIASES: [&'static str; 6] = ["male", "m", "boy", "boys", "man", "men"];
    const FEMALE_ALIASES: [&'static str; 6] = ["female", "f", "girl", "girls", "woman", "women"];

    /// Anything that is not a recognised male or female alias selects both.
    pub fn from_alias(value: &str) -> Self {
        let value = value.trim().to_lowercase();
        if Self::MALE_ALIASES.contains(&value.as_str()) {
            Gender::Male
        } else if Self::FEMALE_ALIASES.contains(&value.as_str()) {
            Gender::Female
        } else {
            Gender::All
        }
    }

    pub fn admits(self, subject: Gender) -> bool {
        self == Gender::All || self == subject
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "easy" | "e" | "1" => Some(Difficulty::Easy),
            "medium" | "med" | "m" | "2" => Some(Difficulty::Medium),
            "hard" | "h" | "3" => Some(Difficulty::Hard),
            _ => None,
        }
    }

    pub fn from_alias_or_default(value: Option<&str>) -> Self {
        value.and_then(Self::parse).unwrap_or(Difficulty::Medium)
    }

    pub fn rank(self) -> u8 {
        match self {
            Difficulty::Easy => 1,
            Difficulty::Medium => 2,
            Difficulty::Hard => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardGameStatus {
    AwaitingSecondPlayer,
    InProgress,
    Settled,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuessingStatus {
    RoundStarting,
    AwaitingAnswer,
    RoundResolved,
    Finished,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SeatKind {
    Human,
    House,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Suit {
    Hearts,
    Diamonds,
    Clubs,
    Spades,
}

/// A card from the 52-card deck, identified by 1..=52.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Card(u8);

impl Card {
    pub fn from_id(id: u8) -> Option<Self> {
        (1..=DECK_SIZE).contains(&id).then_some(Card(id))
    }

    pub fn id(self) -> u8 {
        self.0
    }

    /// 1 = Ace, 11 = Jack, 12 = Queen, 13 = King.
    pub fn rank(self) -> u8 {
        (self.0 - 1) % CARDS_PER_SUIT + 1
    }

    pub fn suit(self) -> Suit {
        match (self.0 - 1) / CARDS_PER_SUIT {
            0 => Suit::Hearts,
            1 => Suit::Diamonds,
            2 => Suit::Clubs,
            _ => Suit::Spades,
        }
    }

    pub fn is_ace(self) -> bool {
        ACE_CARD_IDS.contains(&self.0)
    }

    /// Face value before any ace conversion.
    pub fn value(self) -> u32 {
        match self.rank() {
            1 => ACE_HIGH_VALUE,
            rank @ 2..=10 => u32::from(rank),
            _ => 10,
        }
    }

    pub fn label(self) -> String {
        let rank = match self.rank() {
            1 => "Ace".to_string(),
            11 => "Jack".to_string(),
            12 => "Queen".to_string(),
            13 => "King".to_string(),
            other => other.to_string(),
        };
        let suit = match self.suit() {
            Suit::Hearts => "Hearts",
            Suit::Diamonds => "Diamonds",
            Suit::Clubs => "Clubs",
            Suit::Spades => "Spades",
        };
        format!("{rank} of {suit}")
    }
}

pub fn full_deck() -> impl Iterator<Item = Card> {
    (1..=DECK_SIZE).map(Card)
}

/// Draws uniformly from the cards nobody holds. Returns `None` once the deck is exhausted.
pub fn draw_card<R: Rng + ?Sized>(held: &[Card], rng: &mut R) -> Option<Card> {
    let available: Vec<Card> = full_deck().filter(|card| !held.contains(card)).collect();
    if available.is_empty() {
        return None;
    }
    Some(available[rng.random_range(0..available.len())])
}

/// Inbound chat traffic forwarded by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Message {
        channel_id: ChannelId,
        author_id: UserId,
        message_id: MessageId,
        content: String,
        #[serde(default)]
        author_is_bot: bool,
    },
    Reaction {
        channel_id: ChannelId,
        user_id: UserId,
        message_id: MessageId,
        emoji: String,
    },
}

impl ChatEvent {
    pub fn channel_id(&self) -> ChannelId {
        match self {
            ChatEvent::Message { channel_id, .. } | ChatEvent::Reaction { channel_id, .. } => {
                *channel_id
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Embed {
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed: Option<Embed>,
}

impl OutboundMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            embed: None,
        }
    }

    pub fn embed(embed: Embed) -> Self {
        Self {
            content: None,
            embed: Some(embed),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartCardGameRequest {
    pub channel_id: ChannelId,
    pub player_id: UserId,
    pub bid: i64,
    /// Seat the house bot as the second player right away.
    #[serde(default)]
    pub versus_bot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinCardGameRequest {
    pub channel_id: ChannelId,
    pub player_id: UserId,
    pub bid: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardActionRequest {
    pub channel_id: ChannelId,
    pub player_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceStopRequest {
    pub channel_id: ChannelId,
    pub requester_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartGuessingRequest {
    pub channel_id: ChannelId,
    pub host_id: UserId,
    pub gender: Option<String>,
    pub difficulty: Option<String>,
    pub rounds: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatView {
    pub player_id: UserId,
    pub kind: SeatKind,
    pub bid: i64,
    pub cards: Vec<Card>,
    pub total: u32,
    pub standing: bool,
    pub busted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardGameOutcome {
    /// Both sides are `None` on a tie.
    pub winner_id: Option<UserId>,
    pub loser_id: Option<UserId>,
    pub amount: i64,
}

impl CardGameOutcome {
    pub fn is_tie(&self) -> bool {
        self.winner_id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardGameView {
    pub game_id: GameId,
    pub channel_id: ChannelId,
    pub host_id: UserId,
    pub status: CardGameStatus,
    pub seats: Vec<SeatView>,
    pub outcome: Option<CardGameOutcome>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuessingGameResponse {
    pub session_id: String,
    pub channel_id: ChannelId,
    pub host_id: UserId,
    pub gender: Gender,
    pub difficulty: Difficulty,
    pub max_rounds: u32,
    pub round_timeout_seconds: u64,
    pub pool_size: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceStopResponse {
    pub channel_id: ChannelId,
    pub kind: GameKind,
    pub stopped: bool,
    /// Set when the session task did not wind down in time and was aborted.
    pub forced_cleanup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub channel_id: ChannelId,
    pub host_id: UserId,
    pub kind: GameKind,
    pub players: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: UserId,
    pub score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardResponse {
    pub difficulty: Difficulty,
    pub entries: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub user_id: UserId,
    pub balance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsResponse {
    pub active_card_games: usize,
    pub active_guessing_games: usize,
    pub rounds_played: u64,
    pub sessions_finished: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAcceptedResponse {
    pub accepted: bool,
    pub receivers: usize,
}

/// Case-folds and trims a guess so it can be compared with accepted answers.
pub fn normalize_answer(input: &str) -> String {
    input.trim().to_lowercase()
}

/// Scores are shown zero-padded inside spoiler tags so their width leaks nothing.
pub fn padded_total(total: u32) -> String {
    format!("{total:02}")
}

/// Replaces `${VAR}` references with environment values; unknown variables become empty.
pub fn expand_env_vars(input: &str) -> String {
    let Ok(re) = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}") else {
        return input.to_string();
    };
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}
