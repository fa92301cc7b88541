use std::str::FromStr;
use std::time::Duration;

/// ELO parameters shared by the per-user and per-code ratings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingConfig {
    pub k_factor: f64,
    pub initial_elo: i32,
    /// Optimistic-conflict retries before an update is handed to reconciliation
    pub max_retries: u32,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            k_factor: 32.0,
            initial_elo: 1200,
            max_retries: 5,
        }
    }
}

/// Timing knobs for running battles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Upper bound for a single seat's move provider
    pub move_timeout: Duration,
    /// Upper bound for collecting every seat's move; expiry cancels the battle
    pub turn_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            move_timeout: Duration::from_millis(5_000),
            turn_timeout: Duration::from_millis(30_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArenaConfig {
    pub rating: RatingConfig,
    pub orchestrator: OrchestratorConfig,
    pub reconcile_interval: Duration,
    pub bind_addr: String,
    pub database_url: Option<String>,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            rating: RatingConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            reconcile_interval: Duration::from_secs(30),
            bind_addr: "0.0.0.0:3000".to_string(),
            database_url: None,
        }
    }
}

/// `tokio::time::interval` panics on a zero period
const MIN_RECONCILE_INTERVAL_SECS: u64 = 1;

impl ArenaConfig {
    /// Reads the configuration from `ARENA_*` environment variables,
    /// falling back to defaults for anything unset or unparsable
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            rating: RatingConfig {
                k_factor: env_or("ARENA_ELO_K_FACTOR", defaults.rating.k_factor),
                initial_elo: env_or("ARENA_INITIAL_ELO", defaults.rating.initial_elo),
                max_retries: env_or("ARENA_RATING_MAX_RETRIES", defaults.rating.max_retries),
            },
            orchestrator: OrchestratorConfig {
                move_timeout: Duration::from_millis(env_or(
                    "ARENA_MOVE_TIMEOUT_MS",
                    defaults.orchestrator.move_timeout.as_millis() as u64,
                )),
                turn_timeout: Duration::from_millis(env_or(
                    "ARENA_TURN_TIMEOUT_MS",
                    defaults.orchestrator.turn_timeout.as_millis() as u64,
                )),
            },
            reconcile_interval: Duration::from_secs(
                env_or(
                    "ARENA_RECONCILE_INTERVAL_SECS",
                    defaults.reconcile_interval.as_secs(),
                )
                .max(MIN_RECONCILE_INTERVAL_SECS),
            ),
            bind_addr: std::env::var("ARENA_BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: std::env::var("DATABASE_URL").ok(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
