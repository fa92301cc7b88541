use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, warn};

use crate::ai_code::{
    AiCodeError, AiCodeRepository, AiCodeService, InMemoryAiCodeRepository,
    PostgresAiCodeRepository,
};
use crate::battle::{
    BattleError, BattleOrchestrator, BattleRepository, InMemoryBattleRepository, MoveProvider,
    PostgresBattleRepository, ReconciliationQueue, Reconciler,
};
use crate::config::ArenaConfig;
use crate::event::EventBus;
use crate::game::GameRegistry;
use crate::rating::{
    GameStatsRepository, InMemoryGameStatsRepository, PostgresGameStatsRepository, RatingEngine,
    RatingError,
};

pub type UserId = i64;
pub type AiCodeId = i64;
pub type BattleId = i64;

/// Header carrying the caller's user id, set by the upstream auth layer
pub const USER_ID_HEADER: &str = "x-user-id";
/// `admin` grants administrative actions
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Who is asking for a battle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub is_admin: bool,
}

impl Actor {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            is_admin: false,
        }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            is_admin: true,
        }
    }

    /// The service itself, e.g. when a turn timeout expires
    pub fn system() -> Self {
        Self::admin(0)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<UserId>().ok())
            .ok_or_else(|| {
                warn!("Request without a usable {USER_ID_HEADER} header");
                AppError::Unauthorized("Missing or invalid user id".to_string())
            })?;

        let is_admin = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|role| role.eq_ignore_ascii_case("admin"));

        Ok(Actor { user_id, is_admin })
    }
}

/// Storage backends for every domain
#[derive(Clone)]
pub struct Repositories {
    pub battles: Arc<dyn BattleRepository>,
    pub stats: Arc<dyn GameStatsRepository>,
    pub ai_codes: Arc<dyn AiCodeRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            battles: Arc::new(InMemoryBattleRepository::new()),
            stats: Arc::new(InMemoryGameStatsRepository::new()),
            ai_codes: Arc::new(InMemoryAiCodeRepository::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            battles: Arc::new(PostgresBattleRepository::new(pool.clone())),
            stats: Arc::new(PostgresGameStatsRepository::new(pool.clone())),
            ai_codes: Arc::new(PostgresAiCodeRepository::new(pool)),
        }
    }
}

/// Shared application state containing all dependencies
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<BattleOrchestrator>,
    pub ratings: Arc<RatingEngine>,
    pub ai_codes: Arc<AiCodeService>,
    pub reconciler: Arc<Reconciler>,
    pub event_bus: EventBus,
}

impl AppState {
    pub fn new(
        repositories: Repositories,
        config: &ArenaConfig,
        event_bus: EventBus,
        move_provider: Arc<dyn MoveProvider>,
    ) -> Self {
        let registry = GameRegistry::with_builtin_games();
        let ratings = Arc::new(RatingEngine::new(
            Arc::clone(&repositories.stats),
            Arc::clone(&repositories.ai_codes),
            config.rating,
        ));
        let ai_codes = Arc::new(AiCodeService::new(Arc::clone(&repositories.ai_codes)));
        let queue = ReconciliationQueue::new();

        let orchestrator = BattleOrchestrator::builder(
            Arc::clone(&repositories.battles),
            registry,
            Arc::clone(&ratings),
            Arc::clone(&repositories.ai_codes),
        )
        .with_ownership(ai_codes.clone())
        .with_move_provider(move_provider)
        .with_reconciliation_queue(queue.clone())
        .with_event_bus(event_bus.clone())
        .with_config(config.orchestrator)
        .build();

        let reconciler = Arc::new(Reconciler::new(
            queue,
            Arc::clone(&ratings),
            repositories.battles,
            event_bus.clone(),
        ));

        Self {
            orchestrator: Arc::new(orchestrator),
            ratings,
            ai_codes,
            reconciler,
            event_bus,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::DatabaseError(msg) => {
                error!(error = %msg, "Request failed on storage");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}

impl From<BattleError> for AppError {
    fn from(err: BattleError) -> Self {
        match err {
            BattleError::Validation(e) => AppError::Validation(e.to_string()),
            BattleError::NotFound(_) => AppError::NotFound(err.to_string()),
            BattleError::Forbidden(msg) => AppError::Forbidden(msg),
            BattleError::InvalidTransition { .. }
            | BattleError::ConcurrencyConflict(_)
            | BattleError::Cancelled(_) => AppError::Conflict(err.to_string()),
            BattleError::Persistence(msg) => AppError::DatabaseError(msg),
            BattleError::RefereeFault(msg) => {
                error!(error = %msg, "Referee fault surfaced to request");
                AppError::Internal
            }
        }
    }
}

impl From<AiCodeError> for AppError {
    fn from(err: AiCodeError) -> Self {
        match err {
            AiCodeError::NotFound(_) => AppError::NotFound(err.to_string()),
            AiCodeError::Forbidden { .. } => AppError::Forbidden(err.to_string()),
            AiCodeError::Repository(msg) => AppError::DatabaseError(msg),
        }
    }
}

impl From<RatingError> for AppError {
    fn from(err: RatingError) -> Self {
        match err {
            RatingError::CodeNotFound(_) => AppError::NotFound(err.to_string()),
            RatingError::Unscorable(_) => AppError::Validation(err.to_string()),
            RatingError::ConcurrencyConflict(_) => AppError::Conflict(err.to_string()),
            RatingError::Repository(msg) => AppError::DatabaseError(msg),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::ValidationError;
    use axum::http::Request;

    async fn actor_from(headers: &[(&str, &str)]) -> Result<Actor, AppError> {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Actor::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_actor_from_headers() {
        let actor = actor_from(&[(USER_ID_HEADER, "42")]).await.unwrap();
        assert_eq!(actor, Actor::user(42));

        let admin = actor_from(&[(USER_ID_HEADER, "7"), (USER_ROLE_HEADER, "Admin")])
            .await
            .unwrap();
        assert_eq!(admin, Actor::admin(7));

        assert!(matches!(
            actor_from(&[(USER_ID_HEADER, "abc")]).await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(actor_from(&[]).await, Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_unsupported_game_type_is_a_bad_request() {
        let err = AppError::from(BattleError::from(ValidationError::UnsupportedGameType(
            "avalon".to_string(),
        )));
        assert!(matches!(err, AppError::Validation(ref msg) if msg == "unsupported game type: avalon"));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_internal_faults_stay_generic() {
        let response =
            AppError::from(BattleError::RefereeFault("index out of bounds".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
