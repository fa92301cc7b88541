use async_trait::async_trait;
use tracing::{info, warn};

use super::{
    events::BattleEvent,
    handler::{EventError, EventHandler},
};

/// Writes one structured log line per battle event
pub struct AuditLogHandler;

#[async_trait]
impl EventHandler for AuditLogHandler {
    async fn handle(&self, event: &BattleEvent) -> Result<(), EventError> {
        let battle_id = event.battle_id();
        match event {
            BattleEvent::BattleCreated {
                game_type,
                creator_id,
                ..
            } => info!(target: "arena::audit", battle_id, creator_id, game_type = %game_type, "battle created"),
            BattleEvent::PlayerJoined {
                user_id, position, ..
            } => info!(target: "arena::audit", battle_id, user_id, position, "player joined"),
            BattleEvent::BattleStarted { players, .. } => {
                info!(target: "arena::audit", battle_id, ?players, "battle started")
            }
            BattleEvent::BattleFinished {
                results,
                pending_reconciliation,
                ..
            } => {
                for seat in results {
                    info!(
                        target: "arena::audit",
                        battle_id,
                        user_id = seat.user_id,
                        outcome = %seat.outcome,
                        elo_change = ?seat.elo_change,
                        "battle result"
                    );
                }
                if *pending_reconciliation {
                    warn!(target: "arena::audit", battle_id, "ratings deferred to reconciliation");
                }
            }
            BattleEvent::BattleCancelled { reason, .. } => {
                info!(target: "arena::audit", battle_id, reason = %reason, "battle cancelled")
            }
            BattleEvent::BattleErrored { reason, .. } => {
                warn!(target: "arena::audit", battle_id, reason = %reason, "battle errored")
            }
            BattleEvent::RatingReconciled {
                user_id,
                elo_change,
                ..
            } => info!(target: "arena::audit", battle_id, user_id, elo_change, "rating reconciled"),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "AuditLogHandler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SeatResult;
    use crate::game::Outcome;

    #[tokio::test]
    async fn test_audit_accepts_every_event_kind() {
        let events = vec![
            BattleEvent::BattleStarted {
                battle_id: 1,
                players: vec![1, 2],
            },
            BattleEvent::BattleFinished {
                battle_id: 1,
                results: vec![SeatResult {
                    user_id: 1,
                    outcome: Outcome::Win,
                    elo_change: None,
                }],
                pending_reconciliation: true,
            },
            BattleEvent::BattleErrored {
                battle_id: 2,
                reason: "invalid move".to_string(),
            },
        ];

        for event in &events {
            assert!(AuditLogHandler.handle(event).await.is_ok());
        }
    }
}
