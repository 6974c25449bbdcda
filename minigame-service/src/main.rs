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

mod blackjack;
mod catalog;
mod collaborators;
mod commands;
mod error;
mod guessing;
mod registry;
mod settlement;
mod storage;
#[cfg(test)]
mod test_support;
mod turn_clock;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use arcade_common::{
    BalanceResponse, CardActionRequest, CardGameView, ChannelId, ChatEvent,
    DEFAULT_CARD_TURN_TIMEOUT_SECONDS, EventAcceptedResponse, ForceStopRequest,
    ForceStopResponse, GuessingGameResponse, JoinCardGameRequest, LeaderboardResponse,
    SessionSummary, StartCardGameRequest, StartGuessingRequest, StatsResponse, UserId,
    expand_env_vars,
};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::{
    catalog::{SubjectCatalog, load_subject_catalog},
    collaborators::{ChatTransport, HttpChatTransport, Moderators, StaticModerators},
    error::GameError,
    registry::SessionRegistry,
    settlement::SettlementBridge,
    storage::{SqliteStorage, Storage},
    turn_clock::ChatEventBus,
};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub storage: Arc<dyn Storage>,
    pub transport: Arc<dyn ChatTransport>,
    pub moderators: Arc<dyn Moderators>,
    pub events: ChatEventBus,
    pub catalog: Arc<SubjectCatalog>,
    pub settlement: SettlementBridge,
    pub settings: ServiceSettings,
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Seat id used for the house bot in single-player card games.
    pub house_player_id: UserId,
    pub card_turn_timeout: Duration,
    pub force_stop_grace: Duration,
    pub event_buffer: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            house_player_id: 0,
            card_turn_timeout: Duration::from_secs(DEFAULT_CARD_TURN_TIMEOUT_SECONDS),
            force_stop_grace: Duration::from_millis(5000),
            event_buffer: 1024,
        }
    }
}

impl ServiceSettings {
    fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let card_turn_seconds: u64 = env_or("CARD_TURN_TIMEOUT_SECONDS", DEFAULT_CARD_TURN_TIMEOUT_SECONDS)?;
        Ok(Self {
            house_player_id: env_or("HOUSE_PLAYER_ID", defaults.house_player_id)?,
            card_turn_timeout: Duration::from_secs(card_turn_seconds.max(1)),
            force_stop_grace: Duration::from_millis(env_or("FORCE_STOP_GRACE_MS", 5000)?),
            event_buffer: env_or("CHAT_EVENT_BUFFER", defaults.event_buffer)?.max(1),
        })
    }
}

fn env_or<T>(var_name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(var_name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .context(format!("invalid {var_name}")),
        _ => Ok(default),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "minigame_service=debug,tower_http=info".to_string()),
        )
        .init();

    let settings = ServiceSettings::from_env()?;
    let database_url = expand_env_vars(
        &std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://minigames.db?mode=rwc".to_string()),
    );
    let storage = Arc::new(SqliteStorage::connect(&database_url).await?);

    // Card games cannot resume across restarts.
    let stale = storage.delete_all_card_games().await?;
    if stale > 0 {
        warn!(stale, "removed card games left over from a previous run");
    }

    let catalog = load_subject_catalog();
    if catalog.is_empty() {
        warn!("subject catalog is empty; guessing games will be rejected at start");
    } else {
        info!(subjects = catalog.len(), "loaded subject catalog");
    }

    let state = AppState {
        registry: Arc::new(SessionRegistry::new()),
        storage: storage.clone(),
        transport: Arc::new(HttpChatTransport::from_env()?),
        moderators: Arc::new(StaticModerators::from_env()),
        events: ChatEventBus::new(settings.event_buffer),
        catalog: Arc::new(catalog),
        settlement: SettlementBridge::new(storage),
        settings,
    };

    let app = build_router(state);

    let bind_addr = parse_bind_addr("MINIGAME_SERVICE_BIND", "0.0.0.0:8085")?;
    info!(%bind_addr, "minigame-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/blackjack/games", post(start_card_game_handler))
        .route(
            "/v1/blackjack/games/{game_id}/join",
            post(join_card_game_handler),
        )
        .route("/v1/blackjack/hit", post(hit_handler))
        .route("/v1/blackjack/stand", post(stand_handler))
        .route("/v1/blackjack/stop", post(stop_card_game_handler))
        .route("/v1/guessing/games", post(start_guessing_handler))
        .route("/v1/guessing/stop", post(stop_guessing_handler))
        .route(
            "/v1/guessing/leaderboard/{difficulty}",
            get(leaderboard_handler),
        )
        .route("/v1/balances/{user_id}", get(balance_handler))
        .route("/v1/events", post(ingest_event_handler))
        .route("/v1/sessions/{channel_id}", get(session_handler))
        .route("/v1/stats", get(stats_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "minigame-service"}))
}

async fn start_card_game_handler(
    State(state): State<AppState>,
    Json(request): Json<StartCardGameRequest>,
) -> Result<Json<CardGameView>, ApiError> {
    Ok(Json(commands::start_card_game(&state, request).await?))
}

async fn join_card_game_handler(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    Json(request): Json<JoinCardGameRequest>,
) -> Result<Json<CardGameView>, ApiError> {
    Ok(Json(
        commands::join_card_game(&state, &game_id, request).await?,
    ))
}

async fn hit_handler(
    State(state): State<AppState>,
    Json(request): Json<CardActionRequest>,
) -> Result<Json<CardGameView>, ApiError> {
    Ok(Json(commands::hit(&state, request).await?))
}

async fn stand_handler(
    State(state): State<AppState>,
    Json(request): Json<CardActionRequest>,
) -> Result<Json<CardGameView>, ApiError> {
    Ok(Json(commands::stand(&state, request).await?))
}

async fn stop_card_game_handler(
    State(state): State<AppState>,
    Json(request): Json<ForceStopRequest>,
) -> Result<Json<ForceStopResponse>, ApiError> {
    Ok(Json(commands::force_stop(&state, request).await?))
}

async fn start_guessing_handler(
    State(state): State<AppState>,
    Json(request): Json<StartGuessingRequest>,
) -> Result<Json<GuessingGameResponse>, ApiError> {
    Ok(Json(commands::start_trivia(&state, request).await?))
}

async fn stop_guessing_handler(
    State(state): State<AppState>,
    Json(request): Json<ForceStopRequest>,
) -> Result<Json<ForceStopResponse>, ApiError> {
    Ok(Json(commands::force_stop_trivia(&state, request).await?))
}

async fn leaderboard_handler(
    State(state): State<AppState>,
    Path(difficulty): Path<String>,
) -> Result<Json<LeaderboardResponse>, ApiError> {
    Ok(Json(commands::leaderboard(&state, &difficulty).await?))
}

async fn balance_handler(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<BalanceResponse>, ApiError> {
    Ok(Json(commands::balance(&state, user_id).await?))
}

async fn ingest_event_handler(
    State(state): State<AppState>,
    Json(event): Json<ChatEvent>,
) -> Json<EventAcceptedResponse> {
    Json(commands::ingest_event(&state, event))
}

async fn session_handler(
    State(state): State<AppState>,
    Path(channel_id): Path<ChannelId>,
) -> Result<Json<SessionSummary>, ApiError> {
    Ok(Json(commands::session_summary(&state, channel_id).await?))
}

async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(state.registry.stats().await)
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl From<GameError> for ApiError {
    fn from(error: GameError) -> Self {
        let status = match &error {
            GameError::UserInput { .. } => StatusCode::BAD_REQUEST,
            GameError::Conflict { .. } => StatusCode::CONFLICT,
            GameError::Setup(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GameError::NotAuthorized(_) => StatusCode::FORBIDDEN,
            GameError::NotFound(_) => StatusCode::NOT_FOUND,
            GameError::Upstream(source) => {
                error!(error = %source, "collaborator call failed");
                StatusCode::BAD_GATEWAY
            }
        };
        Self {
            status,
            code: error.code(),
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, code = self.code, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({"error": self.message, "code": self.code})),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::subject,
        test_support::{MODERATOR_ID, harness},
    };
    use arcade_common::{CardGameStatus, Difficulty, Gender};

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_service_name() {
        let Json(body) = health().await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["service"], "minigame-service");
    }

    #[tokio::test]
    async fn errors_map_to_status_and_code() {
        let cases = [
            (GameError::invalid_bid("no"), StatusCode::BAD_REQUEST, "INVALID_BID"),
            (GameError::already_active("busy"), StatusCode::CONFLICT, "ALREADY_ACTIVE"),
            (
                GameError::Setup("empty".to_string()),
                StatusCode::UNPROCESSABLE_ENTITY,
                "SETUP_FAILED",
            ),
            (
                GameError::NotAuthorized("no".to_string()),
                StatusCode::FORBIDDEN,
                "NOT_AUTHORIZED",
            ),
            (
                GameError::Upstream(anyhow::anyhow!("db down")),
                StatusCode::BAD_GATEWAY,
                "UPSTREAM_FAILURE",
            ),
        ];

        for (error, status, code) in cases {
            let response = ApiError::from(error).into_response();
            assert_eq!(response.status(), status);
            let body = body_json(response).await;
            assert_eq!(body["code"], code);
            assert!(body["error"].as_str().is_some_and(|message| !message.is_empty()));
        }
    }

    #[tokio::test]
    async fn card_game_handlers_drive_a_session() {
        let harness = harness(SubjectCatalog::default());
        let state = harness.state.clone();

        let opened = start_card_game_handler(
            State(state.clone()),
            Json(StartCardGameRequest {
                channel_id: 5,
                player_id: 1,
                bid: 10,
                versus_bot: false,
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(opened.status, CardGameStatus::AwaitingSecondPlayer);

        let summary = session_handler(State(state.clone()), Path(5)).await.unwrap().0;
        assert_eq!(summary.host_id, 1);
        assert_eq!(summary.players, vec![1]);

        let early_hit = hit_handler(
            State(state.clone()),
            Json(CardActionRequest {
                channel_id: 5,
                player_id: 1,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(early_hit.status, StatusCode::BAD_REQUEST);
        assert_eq!(early_hit.code, "WRONG_STATE");

        let stats = stats_handler(State(state.clone())).await.0;
        assert_eq!(stats.active_card_games, 1);
        assert_eq!(stats.active_guessing_games, 0);

        let stopped = stop_card_game_handler(
            State(state.clone()),
            Json(ForceStopRequest {
                channel_id: 5,
                requester_id: MODERATOR_ID,
            }),
        )
        .await
        .unwrap()
        .0;
        assert!(stopped.stopped);

        let missing = session_handler(State(state.clone()), Path(5)).await.unwrap_err();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
        assert_eq!(stats_handler(State(state)).await.0.sessions_finished, 1);
    }

    #[tokio::test]
    async fn guessing_handlers_validate_and_report_conflicts() {
        let harness = harness(SubjectCatalog::new(vec![subject(
            1,
            "Irene",
            Gender::Female,
            Difficulty::Easy,
        )]));
        let state = harness.state.clone();
        let request = StartGuessingRequest {
            channel_id: 9,
            host_id: 2,
            gender: Some("girl".to_string()),
            difficulty: None,
            rounds: Some(3),
            timeout_seconds: Some(10),
        };

        let started = start_guessing_handler(State(state.clone()), Json(request.clone()))
            .await
            .unwrap()
            .0;
        assert_eq!(started.difficulty, Difficulty::Medium);
        assert_eq!(started.max_rounds, 3);

        let conflict = start_guessing_handler(State(state.clone()), Json(request))
            .await
            .unwrap_err();
        assert_eq!(conflict.status, StatusCode::CONFLICT);

        let wrong_kind = stop_card_game_handler(
            State(state.clone()),
            Json(ForceStopRequest {
                channel_id: 9,
                requester_id: 2,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(wrong_kind.status, StatusCode::NOT_FOUND);

        let stopped = stop_guessing_handler(
            State(state.clone()),
            Json(ForceStopRequest {
                channel_id: 9,
                requester_id: 2,
            }),
        )
        .await
        .unwrap()
        .0;
        assert!(stopped.stopped);
        assert!(state.registry.find(9).await.is_none());
    }

    #[tokio::test]
    async fn balances_and_leaderboards_are_readable() {
        let harness = harness(SubjectCatalog::default());
        harness.storage.set_balance(3, 42);

        let balance = balance_handler(State(harness.state.clone()), Path(3))
            .await
            .unwrap()
            .0;
        assert_eq!(balance.balance, 42);

        let board = leaderboard_handler(State(harness.state.clone()), Path("hard".to_string()))
            .await
            .unwrap()
            .0;
        assert_eq!(board.difficulty, Difficulty::Hard);
        assert!(board.entries.is_empty());

        let invalid = leaderboard_handler(State(harness.state), Path("extreme".to_string()))
            .await
            .unwrap_err();
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn default_settings_use_documented_values() {
        let settings = ServiceSettings::default();
        assert_eq!(settings.house_player_id, 0);
        assert_eq!(settings.card_turn_timeout, Duration::from_secs(120));
        assert_eq!(settings.force_stop_grace, Duration::from_secs(5));
        assert_eq!(settings.event_buffer, 1024);
    }
}
