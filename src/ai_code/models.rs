use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::game::Outcome;
use crate::rating::RatingError;
use crate::shared::{AiCodeId, UserId};

const CODE_EXTENSIONS: &[&str] = &["py", "js", "java", "cpp", "c"];
const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "rar"];

/// Database model for the ai_code table: one uploaded program version
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct AiCode {
    pub id: AiCodeId,
    pub user_id: UserId,
    pub name: String,
    pub description: Option<String>,
    pub game_type: String,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub file_hash: Option<String>,
    pub version: i32,
    pub is_active: bool,
    pub is_public: bool,
    pub last_used: Option<DateTime<Utc>>,
    pub win_count: i32,
    pub loss_count: i32,
    pub draw_count: i32,
    pub total_games: i32,
    pub win_rate: f64,
    pub elo_score: i32,
    /// Optimistic-lock counter for the rating columns
    pub rating_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AiCode {
    /// Creates an unsaved, inactive code record; the repository assigns the id
    pub fn new(
        user_id: UserId,
        name: impl Into<String>,
        game_type: impl Into<String>,
        file_name: impl Into<String>,
        initial_elo: i32,
    ) -> Self {
        let now = Utc::now();
        let file_name = file_name.into();

        Self {
            id: 0,
            user_id,
            name: name.into(),
            description: None,
            game_type: game_type.into(),
            file_path: format!("ai_codes/{}/{}", user_id, file_name),
            file_name,
            file_size: 0,
            file_hash: None,
            version: 1,
            is_active: false,
            is_public: false,
            last_used: None,
            win_count: 0,
            loss_count: 0,
            draw_count: 0,
            total_games: 0,
            win_rate: 0.0,
            elo_score: initial_elo,
            rating_version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }

    pub fn is_code_file(&self) -> bool {
        self.extension()
            .is_some_and(|ext| CODE_EXTENSIONS.contains(&ext.as_str()))
    }

    pub fn is_archive_file(&self) -> bool {
        self.extension()
            .is_some_and(|ext| ARCHIVE_EXTENSIONS.contains(&ext.as_str()))
    }

    /// Whether the battle runner knows how to execute this upload
    pub fn is_executable(&self) -> bool {
        self.is_code_file() || self.is_archive_file()
    }

    /// Mirrors one scored game into the code's own counters and ELO
    pub fn record_result(
        &mut self,
        outcome: Outcome,
        new_elo: i32,
        played_at: DateTime<Utc>,
    ) -> Result<(), RatingError> {
        match outcome {
            Outcome::Win => self.win_count += 1,
            Outcome::Loss => self.loss_count += 1,
            Outcome::Draw => self.draw_count += 1,
            Outcome::Error => return Err(RatingError::Unscorable(outcome)),
        }

        self.total_games += 1;
        self.win_rate = self.win_count as f64 / self.total_games as f64;
        self.elo_score = new_elo;
        self.last_used = Some(played_at);
        self.updated_at = played_at;
        Ok(())
    }
}
