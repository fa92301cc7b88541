use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use tracing::instrument;

use super::{models::GameStats, StatsKey, DEFAULT_RANKING_ID};
use crate::shared::{AppError, AppState, UserId};

const DEFAULT_LEADERBOARD_LIMIT: usize = 20;
const MAX_LEADERBOARD_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(default)]
    pub ranking_id: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default)]
    pub ranking_id: Option<i32>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// GET /stats/:user_id/:game_type?ranking_id=
#[instrument(skip(state))]
pub async fn get_stats(
    State(state): State<AppState>,
    Path((user_id, game_type)): Path<(UserId, String)>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<GameStats>, AppError> {
    let key = StatsKey::new(
        user_id,
        game_type,
        query.ranking_id.unwrap_or(DEFAULT_RANKING_ID),
    );

    state
        .ratings
        .get_stats(&key)
        .await?
        .map(Json)
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "No stats for user {} in {} (ranking {})",
                key.user_id, key.game_type, key.ranking_id
            ))
        })
}

/// Highest ELO first
///
/// GET /leaderboard/:game_type?ranking_id=&limit=
#[instrument(skip(state))]
pub async fn leaderboard(
    State(state): State<AppState>,
    Path(game_type): Path<String>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<GameStats>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .clamp(1, MAX_LEADERBOARD_LIMIT);

    let rows = state
        .ratings
        .leaderboard(
            &game_type,
            query.ranking_id.unwrap_or(DEFAULT_RANKING_ID),
            limit,
        )
        .await?;
    Ok(Json(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_code::AiCode;
    use crate::battle::{CreateBattleRequest, JoinBattleRequest};
    use crate::shared::{test_utils::AppStateBuilder, Actor};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        routing::get,
        Router,
    };
    use tower::ServiceExt; // for `oneshot`

    fn app(state: AppState) -> Router {
        Router::new()
            .route("/stats/:user_id/:game_type", get(get_stats))
            .route("/leaderboard/:game_type", get(leaderboard))
            .with_state(state)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_stats_missing_until_first_rated_battle() {
        let state = AppStateBuilder::new().build();

        let (status, _) = get_json(app(state.clone()), "/stats/1/rock_paper_scissors").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let a = state
            .ai_codes
            .register_code(AiCode::new(1, "a", "rock_paper_scissors", "a.py", 1200))
            .await
            .unwrap();
        let b = state
            .ai_codes
            .register_code(AiCode::new(2, "b", "rock_paper_scissors", "b.py", 1200))
            .await
            .unwrap();
        let created = state
            .orchestrator
            .create_battle(
                Actor::user(1),
                CreateBattleRequest::new("rock_paper_scissors", Some(a.id)),
            )
            .await
            .unwrap();
        state
            .orchestrator
            .join_battle(
                Actor::user(2),
                created.battle.id,
                JoinBattleRequest { ai_code_id: Some(b.id) },
            )
            .await
            .unwrap();
        state
            .orchestrator
            .play_battle(Actor::user(1), created.battle.id)
            .await
            .unwrap();

        let (status, stats) = get_json(app(state.clone()), "/stats/1/rock_paper_scissors?ranking_id=0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["games_played"], 1);

        let (status, board) = get_json(app(state), "/leaderboard/rock_paper_scissors?limit=5").await;
        assert_eq!(status, StatusCode::OK);
        let board = board.as_array().unwrap();
        assert_eq!(board.len(), 2);
        assert!(board[0]["elo_score"].as_i64() >= board[1]["elo_score"].as_i64());
    }
}
