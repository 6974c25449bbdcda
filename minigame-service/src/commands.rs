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

//! Entry points behind the HTTP routes. Validation happens here, before any
//! session is created or touched.

use std::time::Duration;

use arcade_common::{
    BalanceResponse, CardActionRequest, CardGameView, ChannelId, ChatEvent,
    DEFAULT_GUESSING_ROUNDS, DEFAULT_ROUND_TIMEOUT_SECONDS, Difficulty, EventAcceptedResponse,
    ForceStopRequest, ForceStopResponse, GameKind, Gender, GuessingGameResponse,
    JoinCardGameRequest, LEADERBOARD_SIZE, LeaderboardEntry, LeaderboardResponse,
    MAX_GUESSING_ROUNDS, MAX_ROUND_TIMEOUT_SECONDS, MIN_GUESSING_ROUNDS,
    MIN_ROUND_TIMEOUT_SECONDS, OutboundMessage, SeatKind, SessionSummary, StartCardGameRequest,
    StartGuessingRequest, UserId,
};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    AppState,
    blackjack::{CardCommand, CardReply, CardTable, RandomShoe, Shoe, opened_message, run_blackjack},
    collaborators::announce,
    error::GameError,
    guessing::{GuessingGame, GuessingSettings, run_guessing},
    registry::{SessionControl, SessionHandle, SessionInbox},
    storage::{CardGameRow, GameLookup},
    turn_clock::TurnClock,
};

async fn validate_bid(state: &AppState, player_id: UserId, bid: i64) -> Result<(), GameError> {
    if bid < 0 {
        return Err(GameError::invalid_bid("Bids cannot be negative."));
    }
    let balance = state.storage.balance(player_id).await?;
    if bid > balance {
        return Err(GameError::invalid_bid(format!(
            "You cannot bid more than your balance of {balance}."
        )));
    }
    Ok(())
}

async fn ensure_not_in_card_game(state: &AppState, player_id: UserId) -> Result<(), GameError> {
    if state
        .storage
        .fetch_game(GameLookup::Player(player_id))
        .await?
        .is_some()
    {
        return Err(GameError::player_in_game(
            "You are already in a blackjack game.",
        ));
    }
    Ok(())
}

pub async fn start_card_game(
    state: &AppState,
    request: StartCardGameRequest,
) -> Result<CardGameView, GameError> {
    open_card_game(state, request, Box::new(RandomShoe::new())).await
}

pub(crate) async fn open_card_game(
    state: &AppState,
    request: StartCardGameRequest,
    shoe: Box<dyn Shoe>,
) -> Result<CardGameView, GameError> {
    let StartCardGameRequest {
        channel_id,
        player_id,
        bid,
        versus_bot,
    } = request;

    validate_bid(state, player_id, bid).await?;
    ensure_not_in_card_game(state, player_id).await?;
    if state
        .storage
        .fetch_game(GameLookup::Channel(channel_id))
        .await?
        .is_some()
    {
        return Err(GameError::already_active(
            "A blackjack game is already open in this channel.",
        ));
    }

    let session_id = Uuid::new_v4();
    let game_id = session_id.to_string();
    let created_at = Utc::now();
    let house_id = state.settings.house_player_id;
    let (control, stop_rx) = SessionControl::new();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let handle = SessionHandle {
        session_id,
        channel_id,
        host_id: player_id,
        created_at,
        inbox: SessionInbox::Blackjack(command_tx),
        control,
    };

    state.registry.register(handle.clone()).await?;

    let row = CardGameRow {
        game_id: game_id.clone(),
        channel_id,
        player1: player_id,
        bid1: bid,
        player2: versus_bot.then_some(house_id),
        bid2: versus_bot.then_some(bid),
        created_at,
    };
    if let Err(error) = state.storage.create_card_game(&row).await {
        state.registry.discard(channel_id, session_id).await;
        return Err(GameError::Upstream(error));
    }
    if let Err(error) = state.registry.bind_player(channel_id, player_id).await {
        abandon_opening(state, &handle).await;
        return Err(error);
    }

    let mut table = CardTable::new(game_id.clone(), channel_id, player_id, bid, created_at, shoe);
    if versus_bot {
        if let Err(error) = table.join(house_id, SeatKind::House, bid) {
            abandon_opening(state, &handle).await;
            return Err(error);
        }
    }

    let view = table.view();
    announce(state.transport.as_ref(), channel_id, opened_message(&table)).await;
    info!(
        game_id = %game_id,
        channel_id,
        player_id,
        bid,
        versus_bot,
        "blackjack game opened"
    );

    let clock = TurnClock::new(command_rx, stop_rx);
    let task = tokio::spawn(run_blackjack(state.clone(), handle.clone(), table, clock));
    handle.control.attach_task(task);
    Ok(view)
}

async fn abandon_opening(state: &AppState, handle: &SessionHandle) {
    let game_id = handle.session_id.to_string();
    if let Err(error) = state.storage.delete_card_game(&game_id).await {
        warn!(game_id = %game_id, error = %error, "failed to roll back card game row");
    }
    state
        .registry
        .discard(handle.channel_id, handle.session_id)
        .await;
}

fn game_over() -> GameError {
    GameError::NotFound("That game is no longer running.".to_string())
}

async fn send_card_command(
    handle: &SessionHandle,
    build: impl FnOnce(CardReply) -> CardCommand,
) -> Result<CardGameView, GameError> {
    let SessionInbox::Blackjack(commands) = &handle.inbox else {
        return Err(GameError::NotFound(
            "No blackjack game is running here.".to_string(),
        ));
    };
    let (reply_tx, reply_rx) = oneshot::channel();
    commands.send(build(reply_tx)).map_err(|_| game_over())?;
    reply_rx.await.map_err(|_| game_over())?
}

pub async fn join_card_game(
    state: &AppState,
    game_id: &str,
    request: JoinCardGameRequest,
) -> Result<CardGameView, GameError> {
    let JoinCardGameRequest {
        channel_id,
        player_id,
        bid,
    } = request;

    validate_bid(state, player_id, bid).await?;
    ensure_not_in_card_game(state, player_id).await?;

    let row = state
        .storage
        .fetch_game(GameLookup::Id(game_id.to_string()))
        .await?
        .ok_or_else(|| {
            GameError::NotFound("No blackjack game with that id is open.".to_string())
        })?;
    if row.channel_id != channel_id {
        return Err(GameError::invalid_parameters(
            "That game is not available in this channel.",
        ));
    }
    if row.player2.is_some() {
        return Err(GameError::wrong_state("That game already has two players."));
    }

    let handle = state
        .registry
        .find_by_game(game_id)
        .await
        .filter(|handle| handle.kind() == GameKind::Blackjack)
        .ok_or_else(game_over)?;

    send_card_command(&handle, |reply| CardCommand::Join {
        player_id,
        bid,
        reply,
    })
    .await
}

async fn seated_handle(
    state: &AppState,
    request: &CardActionRequest,
) -> Result<SessionHandle, GameError> {
    let handle = state
        .registry
        .find_by_player(request.player_id)
        .await
        .ok_or_else(|| GameError::NotFound("You are not in a blackjack game.".to_string()))?;
    if handle.channel_id != request.channel_id {
        return Err(GameError::invalid_parameters(
            "Your blackjack game is in another channel.",
        ));
    }
    Ok(handle)
}

pub async fn hit(state: &AppState, request: CardActionRequest) -> Result<CardGameView, GameError> {
    let handle = seated_handle(state, &request).await?;
    let player_id = request.player_id;
    send_card_command(&handle, |reply| CardCommand::Hit { player_id, reply }).await
}

pub async fn stand(
    state: &AppState,
    request: CardActionRequest,
) -> Result<CardGameView, GameError> {
    let handle = seated_handle(state, &request).await?;
    let player_id = request.player_id;
    send_card_command(&handle, |reply| CardCommand::Stand { player_id, reply }).await
}

async fn authorize_stop(
    state: &AppState,
    handle: &SessionHandle,
    requester_id: UserId,
) -> Result<(), GameError> {
    if requester_id == handle.host_id || state.moderators.is_moderator(requester_id).await {
        return Ok(());
    }
    Err(GameError::NotAuthorized(
        "Only the host or a moderator can stop this game.".to_string(),
    ))
}

async fn find_session(
    state: &AppState,
    channel_id: ChannelId,
    kind: GameKind,
) -> Option<SessionHandle> {
    state
        .registry
        .find(channel_id)
        .await
        .filter(|handle| handle.kind() == kind)
}

pub async fn force_stop(
    state: &AppState,
    request: ForceStopRequest,
) -> Result<ForceStopResponse, GameError> {
    let handle = find_session(state, request.channel_id, GameKind::Blackjack)
        .await
        .ok_or_else(|| {
            GameError::NotFound("No blackjack game is running in this channel.".to_string())
        })?;
    authorize_stop(state, &handle, request.requester_id).await?;
    Ok(stop_session(state, handle).await)
}

pub async fn force_stop_trivia(
    state: &AppState,
    request: ForceStopRequest,
) -> Result<ForceStopResponse, GameError> {
    let handle = find_session(state, request.channel_id, GameKind::Guessing)
        .await
        .ok_or_else(|| GameError::NotFound("No game is currently in session.".to_string()))?;
    authorize_stop(state, &handle, request.requester_id).await?;
    Ok(stop_session(state, handle).await)
}

/// Signals the session and waits for it to wind down. A session that does not
/// finish within the grace period is aborted and cleaned up here instead.
async fn stop_session(state: &AppState, handle: SessionHandle) -> ForceStopResponse {
    info!(
        session_id = %handle.session_id,
        channel_id = handle.channel_id,
        kind = ?handle.kind(),
        "force-stopping session"
    );
    handle.control.request_stop();

    let mut forced_cleanup = false;
    if let Some(mut task) = handle.control.take_task() {
        let finished = tokio::time::timeout(state.settings.force_stop_grace, &mut task)
            .await
            .is_ok();
        if !finished && handle.control.claim_finalization() {
            warn!(
                session_id = %handle.session_id,
                "session did not stop in time; aborting it"
            );
            task.abort();
            cleanup_abandoned_session(state, &handle).await;
            forced_cleanup = true;
        }
    }

    ForceStopResponse {
        channel_id: handle.channel_id,
        kind: handle.kind(),
        stopped: true,
        forced_cleanup,
    }
}

/// Cleanup for a session whose task was aborted. Card games never move money
/// here; guessing games keep the points scored in rounds already resolved.
async fn cleanup_abandoned_session(state: &AppState, handle: &SessionHandle) {
    match handle.kind() {
        GameKind::Blackjack => {
            let game_id = handle.session_id.to_string();
            if let Err(error) = state.storage.delete_card_game(&game_id).await {
                warn!(game_id = %game_id, error = %error, "failed to delete card game row");
            }
        }
        GameKind::Guessing => {
            if let Some(snapshot) = handle.control.take_recorded_scores() {
                let failed = state
                    .settlement
                    .persist_scores(snapshot.difficulty, &snapshot.scores)
                    .await;
                if !failed.is_empty() {
                    warn!(
                        session_id = %handle.session_id,
                        failed = ?failed,
                        "scores of an aborted guessing game could not be saved"
                    );
                }
            }
        }
    }
    state
        .registry
        .remove(handle.channel_id, handle.session_id)
        .await;
    announce(
        state.transport.as_ref(),
        handle.channel_id,
        OutboundMessage::text("The game was stopped."),
    )
    .await;
}

pub async fn start_trivia(
    state: &AppState,
    request: StartGuessingRequest,
) -> Result<GuessingGameResponse, GameError> {
    let StartGuessingRequest {
        channel_id,
        host_id,
        gender,
        difficulty,
        rounds,
        timeout_seconds,
    } = request;

    let max_rounds = rounds.unwrap_or(DEFAULT_GUESSING_ROUNDS);
    if !(MIN_GUESSING_ROUNDS..=MAX_GUESSING_ROUNDS).contains(&max_rounds) {
        return Err(GameError::invalid_parameters(format!(
            "Rounds must be between {MIN_GUESSING_ROUNDS} and {MAX_GUESSING_ROUNDS}."
        )));
    }
    let timeout_seconds = timeout_seconds.unwrap_or(DEFAULT_ROUND_TIMEOUT_SECONDS);
    if !(MIN_ROUND_TIMEOUT_SECONDS..=MAX_ROUND_TIMEOUT_SECONDS).contains(&timeout_seconds) {
        return Err(GameError::invalid_parameters(format!(
            "The timeout must be between {MIN_ROUND_TIMEOUT_SECONDS} and {MAX_ROUND_TIMEOUT_SECONDS} seconds."
        )));
    }
    let gender = gender.as_deref().map(Gender::from_alias).unwrap_or(Gender::All);
    let difficulty = Difficulty::from_alias_or_default(difficulty.as_deref());

    if state.registry.find(channel_id).await.is_some() {
        return Err(GameError::already_active(
            "A game is currently in progress in this channel.",
        ));
    }

    let pool = state.catalog.eligible(gender, difficulty);
    if pool.is_empty() {
        let error = GameError::Setup(format!(
            "No subjects are available for {} difficulty with that gender filter.",
            difficulty.as_str()
        ));
        announce(
            state.transport.as_ref(),
            channel_id,
            OutboundMessage::text(error.to_string()),
        )
        .await;
        return Err(error);
    }

    let session_id = Uuid::new_v4();
    let created_at = Utc::now();
    let (control, stop_rx) = SessionControl::new();
    let handle = SessionHandle {
        session_id,
        channel_id,
        host_id,
        created_at,
        inbox: SessionInbox::Guessing,
        control,
    };
    state.registry.register(handle.clone()).await?;

    let response = GuessingGameResponse {
        session_id: session_id.to_string(),
        channel_id,
        host_id,
        gender,
        difficulty,
        max_rounds,
        round_timeout_seconds: timeout_seconds,
        pool_size: pool.len(),
        created_at,
    };

    let clock = TurnClock::new(state.events.subscribe(), stop_rx);
    let game = GuessingGame::new(
        GuessingSettings {
            channel_id,
            host_id,
            gender,
            difficulty,
            max_rounds,
            round_timeout: Duration::from_secs(timeout_seconds),
        },
        pool,
    );
    let task = tokio::spawn(run_guessing(state.clone(), handle.clone(), game, clock));
    handle.control.attach_task(task);
    Ok(response)
}

pub async fn session_summary(
    state: &AppState,
    channel_id: ChannelId,
) -> Result<SessionSummary, GameError> {
    state
        .registry
        .summary(channel_id)
        .await
        .ok_or_else(|| GameError::NotFound("No game is currently in session.".to_string()))
}

pub async fn leaderboard(
    state: &AppState,
    difficulty: &str,
) -> Result<LeaderboardResponse, GameError> {
    let difficulty = Difficulty::parse(difficulty).ok_or_else(|| {
        let names: Vec<&str> = Difficulty::ALL.iter().map(|level| level.as_str()).collect();
        GameError::invalid_parameters(format!("Difficulty must be one of: {}.", names.join(", ")))
    })?;
    let entries = state
        .storage
        .top_scores(difficulty, LEADERBOARD_SIZE)
        .await?
        .into_iter()
        .enumerate()
        .map(|(index, (user_id, score))| LeaderboardEntry {
            rank: index + 1,
            user_id,
            score,
        })
        .collect();
    Ok(LeaderboardResponse {
        difficulty,
        entries,
    })
}

pub async fn balance(state: &AppState, user_id: UserId) -> Result<BalanceResponse, GameError> {
    let balance = state.storage.balance(user_id).await?;
    Ok(BalanceResponse { user_id, balance })
}

pub fn ingest_event(state: &AppState, event: ChatEvent) -> EventAcceptedResponse {
    let receivers = state.events.publish(event);
    EventAcceptedResponse {
        accepted: true,
        receivers,
    }
}
