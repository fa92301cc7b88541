use serde::Deserialize;

use super::models::DEFAULT_BATTLE_TYPE;
use crate::rating::DEFAULT_RANKING_ID;
use crate::shared::AiCodeId;

/// Request payload for creating a battle; the creator takes seat 1
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBattleRequest {
    pub game_type: String,
    #[serde(default = "default_ranking_id")]
    pub ranking_id: i32,
    #[serde(default = "default_battle_type")]
    pub battle_type: String,
    #[serde(default)]
    pub is_elo_exempt: bool,
    pub ai_code_id: Option<AiCodeId>,
}

impl CreateBattleRequest {
    pub fn new(game_type: impl Into<String>, ai_code_id: Option<AiCodeId>) -> Self {
        Self {
            game_type: game_type.into(),
            ranking_id: DEFAULT_RANKING_ID,
            battle_type: DEFAULT_BATTLE_TYPE.to_string(),
            is_elo_exempt: false,
            ai_code_id,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinBattleRequest {
    pub ai_code_id: Option<AiCodeId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelBattleRequest {
    pub reason: Option<String>,
}

fn default_ranking_id() -> i32 {
    DEFAULT_RANKING_ID
}

fn default_battle_type() -> String {
    DEFAULT_BATTLE_TYPE.to_string()
}
