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

//! Two-seat blackjack: the table state machine and the task that owns it.

use std::collections::HashSet;

use arcade_common::{
    ACE_LOW_VALUE, BLACKJACK, Card, CardGameOutcome, CardGameStatus, CardGameView, ChannelId,
    GameId, HOUSE_STAND_THRESHOLD, OutboundMessage, SeatKind, SeatView, UserId, draw_card,
    padded_total,
};
use chrono::{DateTime, Utc};
use rand::{SeedableRng, rngs::StdRng};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::{
    AppState,
    collaborators::announce,
    error::GameError,
    registry::SessionHandle,
    settlement::BalanceTransfer,
    turn_clock::{TurnClock, Wake},
};

pub type CardReply = oneshot::Sender<Result<CardGameView, GameError>>;

pub enum CardCommand {
    Join {
        player_id: UserId,
        bid: i64,
        reply: CardReply,
    },
    Hit {
        player_id: UserId,
        reply: CardReply,
    },
    Stand {
        player_id: UserId,
        reply: CardReply,
    },
}

/// Where dealt cards come from.
pub trait Shoe: Send {
    fn draw(&mut self, held: &[Card]) -> Option<Card>;
}

pub struct RandomShoe {
    rng: StdRng,
}

impl RandomShoe {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_rng(&mut rand::rng()),
        }
    }
}

impl Default for RandomShoe {
    fn default() -> Self {
        Self::new()
    }
}

impl Shoe for RandomShoe {
    fn draw(&mut self, held: &[Card]) -> Option<Card> {
        draw_card(held, &mut self.rng)
    }
}

#[derive(Debug, Clone)]
pub struct Seat {
    pub player_id: UserId,
    pub kind: SeatKind,
    pub bid: i64,
    pub hand: Vec<Card>,
    pub aces_converted: HashSet<Card>,
    pub standing: bool,
}

impl Seat {
    fn new(player_id: UserId, kind: SeatKind, bid: i64) -> Self {
        Self {
            player_id,
            kind,
            bid,
            hand: Vec::new(),
            aces_converted: HashSet::new(),
            standing: false,
        }
    }

    pub fn total(&self) -> u32 {
        hand_total(&self.hand, &self.aces_converted)
    }

    pub fn busted(&self) -> bool {
        self.total() > BLACKJACK
    }

    fn view(&self) -> SeatView {
        SeatView {
            player_id: self.player_id,
            kind: self.kind,
            bid: self.bid,
            cards: self.hand.clone(),
            total: self.total(),
            standing: self.standing,
            busted: self.busted(),
        }
    }
}

/// Hand value with every converted ace counted as 1.
pub fn hand_total(hand: &[Card], aces_converted: &HashSet<Card>) -> u32 {
    hand.iter()
        .map(|card| {
            if aces_converted.contains(card) {
                ACE_LOW_VALUE
            } else {
                card.value()
            }
        })
        .sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandWinner {
    First,
    Second,
    Tie,
}

pub fn determine_winner(first: u32, second: u32) -> HandWinner {
    if first == second {
        return HandWinner::Tie;
    }
    if first == BLACKJACK {
        return HandWinner::First;
    }
    if second == BLACKJACK {
        return HandWinner::Second;
    }
    match (first > BLACKJACK, second > BLACKJACK) {
        (true, true) if first < second => HandWinner::First,
        (true, true) => HandWinner::Second,
        (true, false) => HandWinner::Second,
        (false, true) => HandWinner::First,
        (false, false) if first > second => HandWinner::First,
        (false, false) => HandWinner::Second,
    }
}

/// The house draws below its threshold, but never once the human has busted
/// and the house already sits at or above it.
pub fn house_should_draw(house_total: u32, human_total: u32) -> bool {
    if human_total > BLACKJACK && house_total >= HOUSE_STAND_THRESHOLD {
        return false;
    }
    house_total < HOUSE_STAND_THRESHOLD
}

pub struct CardTable {
    game_id: GameId,
    channel_id: ChannelId,
    host_id: UserId,
    status: CardGameStatus,
    seats: Vec<Seat>,
    outcome: Option<CardGameOutcome>,
    created_at: DateTime<Utc>,
    shoe: Box<dyn Shoe>,
}

impl CardTable {
    pub fn new(
        game_id: GameId,
        channel_id: ChannelId,
        host_id: UserId,
        bid: i64,
        created_at: DateTime<Utc>,
        shoe: Box<dyn Shoe>,
    ) -> Self {
        Self {
            game_id,
            channel_id,
            host_id,
            status: CardGameStatus::AwaitingSecondPlayer,
            seats: vec![Seat::new(host_id, SeatKind::Human, bid)],
            outcome: None,
            created_at,
            shoe,
        }
    }

    pub fn status(&self) -> CardGameStatus {
        self.status
    }

    pub fn has_house(&self) -> bool {
        self.seats.iter().any(|seat| seat.kind == SeatKind::House)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            CardGameStatus::Settled | CardGameStatus::Cancelled
        )
    }

    pub fn ensure_joinable(&self, player_id: UserId) -> Result<(), GameError> {
        if self.status != CardGameStatus::AwaitingSecondPlayer {
            return Err(GameError::wrong_state("This game already has two players."));
        }
        if player_id == self.host_id {
            return Err(GameError::invalid_parameters("You cannot join your own game."));
        }
        Ok(())
    }

    /// Seats the second player and deals two cards each, opener first.
    pub fn join(&mut self, player_id: UserId, kind: SeatKind, bid: i64) -> Result<(), GameError> {
        self.ensure_joinable(player_id)?;
        self.seats.push(Seat::new(player_id, kind, bid));
        self.status = CardGameStatus::InProgress;

        for seat in [0, 0, 1, 1] {
            self.deal_card(seat)?;
        }

        if self.seats.iter().any(|seat| seat.total() == BLACKJACK) {
            for seat in &mut self.seats {
                seat.standing = true;
            }
        }
        Ok(())
    }

    /// Draws an unheld card into `seat`. Past 21, one unconverted ace drops to 1.
    pub fn deal_card(&mut self, seat: usize) -> Result<Card, GameError> {
        let held: Vec<Card> = self
            .seats
            .iter()
            .flat_map(|seat| seat.hand.iter().copied())
            .collect();
        let card = self
            .shoe
            .draw(&held)
            .ok_or_else(|| GameError::Setup("The deck ran out of cards.".to_string()))?;

        let seat = &mut self.seats[seat];
        seat.hand.push(card);
        if seat.total() > BLACKJACK {
            let convertible = seat
                .hand
                .iter()
                .copied()
                .find(|card| card.is_ace() && !seat.aces_converted.contains(card));
            if let Some(ace) = convertible {
                seat.aces_converted.insert(ace);
            }
        }
        Ok(card)
    }

    fn active_seat(&self, player_id: UserId) -> Result<usize, GameError> {
        match self.status {
            CardGameStatus::InProgress => {}
            CardGameStatus::AwaitingSecondPlayer => {
                return Err(GameError::wrong_state(
                    "Waiting for a second player to join.",
                ));
            }
            CardGameStatus::Settled | CardGameStatus::Cancelled => {
                return Err(GameError::wrong_state("This game is already over."));
            }
        }
        let seat = self
            .seats
            .iter()
            .position(|seat| seat.player_id == player_id && seat.kind == SeatKind::Human)
            .ok_or_else(|| GameError::NotFound("You are not in this game.".to_string()))?;
        if self.seats[seat].standing {
            return Err(GameError::wrong_state("You already stood."));
        }
        Ok(seat)
    }

    pub fn hit(&mut self, player_id: UserId) -> Result<Card, GameError> {
        let seat = self.active_seat(player_id)?;
        let card = self.deal_card(seat)?;
        if self.has_house() && self.seats[seat].busted() {
            self.seats[seat].standing = true;
            self.play_house()?;
        }
        Ok(card)
    }

    pub fn stand(&mut self, player_id: UserId) -> Result<(), GameError> {
        let seat = self.active_seat(player_id)?;
        self.seats[seat].standing = true;
        if self.has_house() {
            self.play_house()?;
        }
        Ok(())
    }

    /// Stands every human who has not acted; the house then plays out.
    pub fn stand_idle(&mut self) -> Result<Vec<UserId>, GameError> {
        let mut stood = Vec::new();
        for seat in &mut self.seats {
            if seat.kind == SeatKind::Human && !seat.standing {
                seat.standing = true;
                stood.push(seat.player_id);
            }
        }
        if self.has_house() {
            self.play_house()?;
        }
        Ok(stood)
    }

    fn play_house(&mut self) -> Result<(), GameError> {
        let Some(house) = self
            .seats
            .iter()
            .position(|seat| seat.kind == SeatKind::House)
        else {
            return Ok(());
        };
        let human_total = self
            .seats
            .iter()
            .find(|seat| seat.kind == SeatKind::Human)
            .map(Seat::total)
            .unwrap_or_default();

        while !self.seats[house].standing
            && house_should_draw(self.seats[house].total(), human_total)
        {
            self.deal_card(house)?;
        }
        self.seats[house].standing = true;
        Ok(())
    }

    pub fn ready_to_settle(&self) -> bool {
        self.status == CardGameStatus::InProgress
            && self.seats.len() == 2
            && self.seats.iter().all(|seat| seat.standing)
    }

    /// Decides the hand once. Later calls return `None` and change nothing.
    pub fn settle(&mut self) -> Option<BalanceTransfer> {
        if self.outcome.is_some() || !self.ready_to_settle() {
            return None;
        }

        let (first, second) = (&self.seats[0], &self.seats[1]);
        let (winner, loser) = match determine_winner(first.total(), second.total()) {
            HandWinner::Tie => (None, None),
            HandWinner::First => (Some(first), Some(second)),
            HandWinner::Second => (Some(second), Some(first)),
        };
        let amount = loser.map(|seat| seat.bid).unwrap_or_default();
        let human = |seat: &&Seat| seat.kind == SeatKind::Human;

        let transfer = BalanceTransfer {
            from: loser.filter(human).map(|seat| seat.player_id),
            to: winner.filter(human).map(|seat| seat.player_id),
            amount,
        };
        let outcome = CardGameOutcome {
            winner_id: winner.map(|seat| seat.player_id),
            loser_id: loser.map(|seat| seat.player_id),
            amount,
        };

        self.outcome = Some(outcome);
        self.status = CardGameStatus::Settled;
        Some(transfer)
    }

    pub fn cancel(&mut self) {
        if self.status != CardGameStatus::Settled {
            self.status = CardGameStatus::Cancelled;
        }
    }

    pub fn view(&self) -> CardGameView {
        CardGameView {
            game_id: self.game_id.clone(),
            channel_id: self.channel_id,
            host_id: self.host_id,
            status: self.status,
            seats: self.seats.iter().map(Seat::view).collect(),
            outcome: self.outcome.clone(),
            created_at: self.created_at,
        }
    }
}

fn seat_name(seat: &Seat) -> String {
    match seat.kind {
        SeatKind::House => "The house".to_string(),
        SeatKind::Human => format!("<@{}>", seat.player_id),
    }
}

fn card_list(seat: &Seat) -> String {
    seat.hand
        .iter()
        .map(|card| card.label())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Cards and total hidden behind spoiler tags.
fn hidden_hand(seat: &Seat) -> String {
    format!(
        "{}: ||{}|| total ||{}||",
        seat_name(seat),
        card_list(seat),
        padded_total(seat.total())
    )
}

fn revealed_hand(seat: &Seat) -> String {
    format!("{}: {} ({})", seat_name(seat), card_list(seat), seat.total())
}

pub fn opened_message(table: &CardTable) -> OutboundMessage {
    let bid = table.seats[0].bid;
    if table.has_house() {
        let hands: Vec<String> = table.seats.iter().map(hidden_hand).collect();
        OutboundMessage::text(format!(
            "<@{}> sat down against the house with a bid of {bid}.\n{}",
            table.host_id,
            hands.join("\n")
        ))
    } else {
        OutboundMessage::text(format!(
            "<@{}> opened a blackjack game with a bid of {bid}. Join it with game id `{}`.",
            table.host_id, table.game_id
        ))
    }
}

fn dealt_message(table: &CardTable) -> OutboundMessage {
    let hands: Vec<String> = table.seats.iter().map(hidden_hand).collect();
    OutboundMessage::text(format!(
        "Blackjack game `{}` has started.\n{}",
        table.game_id,
        hands.join("\n")
    ))
}

/// `recorded` is false when the outcome was decided but the transfer failed.
fn result_message(table: &CardTable, recorded: bool) -> OutboundMessage {
    let hands: Vec<String> = table.seats.iter().map(revealed_hand).collect();
    let headline = match &table.outcome {
        Some(outcome) if outcome.is_tie() => "It's a tie. No money changes hands.".to_string(),
        Some(_) if !recorded => format!(
            "Blackjack game `{}` ended, but the result could not be recorded. Balances are unchanged.",
            table.game_id
        ),
        Some(outcome) => {
            let name = |player: Option<UserId>| {
                table
                    .seats
                    .iter()
                    .find(|seat| Some(seat.player_id) == player)
                    .map(seat_name)
                    .unwrap_or_default()
            };
            format!(
                "{} won {} from {}!",
                name(outcome.winner_id),
                outcome.amount,
                name(outcome.loser_id)
            )
        }
        None => format!(
            "Blackjack game `{}` was cancelled. No money changed hands.",
            table.game_id
        ),
    };
    OutboundMessage::text(format!("{headline}\n{}", hands.join("\n")))
}

pub async fn run_blackjack(
    state: AppState,
    handle: SessionHandle,
    mut table: CardTable,
    mut clock: TurnClock<mpsc::UnboundedReceiver<CardCommand>>,
) {
    info!(
        game_id = %table.game_id,
        channel_id = table.channel_id,
        host_id = table.host_id,
        "blackjack session started"
    );

    loop {
        if table.ready_to_settle() || table.is_terminal() || clock.stop_requested() {
            break;
        }
        match clock
            .await_event(Some, state.settings.card_turn_timeout)
            .await
        {
            Wake::Event(command) => handle_command(&state, &handle, &mut table, command).await,
            Wake::TimedOut => handle_idle_timeout(&state, &mut table).await,
            Wake::Stopped => break,
        }
    }

    finish_blackjack(&state, &handle, &mut table).await;
}

async fn handle_command(
    state: &AppState,
    handle: &SessionHandle,
    table: &mut CardTable,
    command: CardCommand,
) {
    let (result, reply) = match command {
        CardCommand::Join {
            player_id,
            bid,
            reply,
        } => {
            let result = join_table(state, handle, table, player_id, bid).await;
            if result.is_ok() {
                announce(state.transport.as_ref(), table.channel_id, dealt_message(table)).await;
            }
            (result, reply)
        }
        CardCommand::Hit { player_id, reply } => {
            let result = table.hit(player_id).map(|card| {
                info!(game_id = %table.game_id, player_id, card = card.id(), "card dealt");
                table.view()
            });
            if result.is_ok() {
                if let Some(seat) = table.seats.iter().find(|seat| seat.player_id == player_id) {
                    let text = format!("{} drew a card.\n{}", seat_name(seat), hidden_hand(seat));
                    announce(
                        state.transport.as_ref(),
                        table.channel_id,
                        OutboundMessage::text(text),
                    )
                    .await;
                }
            }
            (result, reply)
        }
        CardCommand::Stand { player_id, reply } => {
            let result = table.stand(player_id).map(|()| table.view());
            if result.is_ok() {
                announce(
                    state.transport.as_ref(),
                    table.channel_id,
                    OutboundMessage::text(format!("<@{player_id}> stands.")),
                )
                .await;
            }
            (result, reply)
        }
    };

    if let Err(GameError::Setup(message)) = &result {
        warn!(game_id = %table.game_id, message = %message, "blackjack session cannot continue");
        table.cancel();
    }
    let _ = reply.send(result);
}

async fn join_table(
    state: &AppState,
    handle: &SessionHandle,
    table: &mut CardTable,
    player_id: UserId,
    bid: i64,
) -> Result<CardGameView, GameError> {
    table.ensure_joinable(player_id)?;
    state
        .registry
        .bind_player(handle.channel_id, player_id)
        .await?;
    if let Err(error) = state
        .storage
        .add_second_player(&table.game_id, player_id, bid)
        .await
    {
        state.registry.unbind_player(player_id).await;
        return Err(GameError::Upstream(error));
    }
    table.join(player_id, SeatKind::Human, bid)?;
    Ok(table.view())
}

async fn handle_idle_timeout(state: &AppState, table: &mut CardTable) {
    match table.status() {
        CardGameStatus::AwaitingSecondPlayer => {
            info!(game_id = %table.game_id, "no second player joined in time");
            table.cancel();
        }
        CardGameStatus::InProgress => match table.stand_idle() {
            Ok(stood) if !stood.is_empty() => {
                let names: Vec<String> = stood.iter().map(|id| format!("<@{id}>")).collect();
                announce(
                    state.transport.as_ref(),
                    table.channel_id,
                    OutboundMessage::text(format!(
                        "Time is up! {} stood automatically.",
                        names.join(", ")
                    )),
                )
                .await;
            }
            Ok(_) => {}
            Err(error) => {
                warn!(game_id = %table.game_id, error = %error, "idle stand failed");
                table.cancel();
            }
        },
        CardGameStatus::Settled | CardGameStatus::Cancelled => {}
    }
}

async fn finish_blackjack(state: &AppState, handle: &SessionHandle, table: &mut CardTable) {
    if !handle.control.claim_finalization() {
        warn!(game_id = %table.game_id, "blackjack session already cleaned up");
        return;
    }

    let mut recorded = true;
    match table.settle() {
        Some(transfer) => {
            if let Err(error) = state.settlement.settle_card_game(transfer).await {
                error!(game_id = %table.game_id, error = %error, "failed to apply settlement");
                recorded = false;
            }
        }
        None => table.cancel(),
    }

    announce(
        state.transport.as_ref(),
        table.channel_id,
        result_message(table, recorded),
    )
    .await;

    if let Err(error) = state.storage.delete_card_game(&table.game_id).await {
        warn!(game_id = %table.game_id, error = %error, "failed to delete card game row");
    }
    state
        .registry
        .remove(handle.channel_id, handle.session_id)
        .await;

    info!(
        game_id = %table.game_id,
        status = ?table.status(),
        outcome = ?table.outcome,
        "blackjack session finished"
    );
}
