use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{error, info, instrument, warn};

use super::{
    models::{Battle, BattlePlayer},
    repository::BattleRepository,
    BattleError,
};
use crate::event::{BattleEvent, EventBus};
use crate::game::Outcome;
use crate::rating::{RatingEngine, RatingUpdate};
use crate::shared::{BattleId, UserId};

/// Builds the rating update for `seat`, rated against every other seat's
/// starting ELO
pub(crate) fn seat_rating_update(
    battle: &Battle,
    players: &[BattlePlayer],
    seat: &BattlePlayer,
    outcome: Outcome,
    default_elo: i32,
) -> RatingUpdate {
    let opponents = players.iter().filter(|p| p.user_id != seat.user_id);

    RatingUpdate {
        battle_id: battle.id,
        user_id: seat.user_id,
        ai_code_id: seat.selected_ai_code_id,
        game_type: battle.game_type.clone(),
        ranking_id: battle.ranking_id,
        outcome,
        opponent_elos: opponents
            .clone()
            .map(|p| p.initial_elo.unwrap_or(default_elo))
            .collect(),
        opponent_code_elos: opponents.filter_map(|p| p.initial_code_elo).collect(),
        played_at: battle.ended_at.unwrap_or(battle.updated_at),
        play_time_secs: battle.duration_secs(),
    }
}

/// Rating updates that could not be applied when their battle finished.
/// Keyed by (battle, user): enqueueing the same key twice keeps one entry.
#[derive(Clone, Default)]
pub struct ReconciliationQueue {
    pending: Arc<Mutex<BTreeMap<(BattleId, UserId), RatingUpdate>>>,
}

impl ReconciliationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the key was not queued yet
    pub async fn enqueue(&self, update: RatingUpdate) -> bool {
        let key = (update.battle_id, update.user_id);
        self.pending.lock().await.insert(key, update).is_none()
    }

    pub async fn remove(&self, battle_id: BattleId, user_id: UserId) {
        self.pending.lock().await.remove(&(battle_id, user_id));
    }

    pub async fn has_battle(&self, battle_id: BattleId) -> bool {
        self.pending
            .lock()
            .await
            .keys()
            .any(|(pending_battle, _)| *pending_battle == battle_id)
    }

    /// Queued updates ordered by battle, then user
    pub async fn snapshot(&self) -> Vec<RatingUpdate> {
        self.pending.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileReport {
    pub applied: usize,
    pub remaining: usize,
}

/// Re-applies deferred rating updates until they stick
pub struct Reconciler {
    queue: ReconciliationQueue,
    ratings: Arc<RatingEngine>,
    repository: Arc<dyn BattleRepository>,
    event_bus: EventBus,
}

impl Reconciler {
    pub fn new(
        queue: ReconciliationQueue,
        ratings: Arc<RatingEngine>,
        repository: Arc<dyn BattleRepository>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            queue,
            ratings,
            repository,
            event_bus,
        }
    }

    pub fn queue(&self) -> &ReconciliationQueue {
        &self.queue
    }

    /// Re-queues unrated seats of battles persisted as pending, e.g. after a restart
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize, BattleError> {
        let default_elo = self.ratings.config().initial_elo;
        let mut recovered = 0;

        for battle in self.repository.list_pending_reconciliation().await? {
            let players = self.repository.list_players(battle.id).await?;
            for seat in players.iter().filter(|p| p.elo_change.is_none()) {
                let Some(outcome) = seat.outcome.filter(|o| o.score().is_some()) else {
                    continue;
                };
                let update = seat_rating_update(&battle, &players, seat, outcome, default_elo);
                if self.queue.enqueue(update).await {
                    recovered += 1;
                }
            }
        }

        if recovered > 0 {
            info!(recovered, "Recovered deferred rating updates");
        }
        Ok(recovered)
    }

    /// One pass over the queue. Updates that fail again stay queued.
    #[instrument(skip(self))]
    pub async fn drain(&self) -> Result<ReconcileReport, BattleError> {
        let mut applied = 0;
        let mut touched = BTreeSet::new();

        for update in self.queue.snapshot().await {
            let change = match self.ratings.apply_outcome(&update).await {
                Ok(change) => change,
                Err(e) => {
                    warn!(
                        battle_id = update.battle_id,
                        user_id = update.user_id,
                        error = %e,
                        "Deferred rating update failed again"
                    );
                    continue;
                }
            };

            if let Err(e) = self
                .repository
                .record_elo_change(update.battle_id, update.user_id, change.elo_change)
                .await
            {
                // the ledger makes the next attempt a no-op for the rating itself
                warn!(battle_id = update.battle_id, error = %e, "Could not record reconciled ELO change");
                continue;
            }

            self.queue.remove(update.battle_id, update.user_id).await;
            touched.insert(update.battle_id);
            applied += 1;

            self.event_bus
                .emit(BattleEvent::RatingReconciled {
                    battle_id: update.battle_id,
                    user_id: update.user_id,
                    elo_change: change.elo_change,
                })
                .await;
        }

        for battle_id in touched {
            if !self.queue.has_battle(battle_id).await {
                self.repository.clear_pending_reconciliation(battle_id).await?;
                info!(battle_id, "Battle fully reconciled");
            }
        }

        Ok(ReconcileReport {
            applied,
            remaining: self.queue.len().await,
        })
    }
}

/// Background loop: recovers persisted backlog once, then drains on every tick
#[instrument(skip(reconciler))]
pub async fn start_reconciliation_task(reconciler: Arc<Reconciler>, every: Duration) {
    info!(interval_secs = every.as_secs(), "Starting rating reconciliation task");

    if let Err(e) = reconciler.recover().await {
        error!(error = %e, "Could not recover pending rating updates");
    }

    let mut ticker = interval(every);
    loop {
        ticker.tick().await;
        if reconciler.queue().is_empty().await {
            continue;
        }

        match reconciler.drain().await {
            Ok(report) => info!(
                applied = report.applied,
                remaining = report.remaining,
                "Reconciliation pass completed"
            ),
            Err(e) => error!(error = %e, "Reconciliation pass failed"),
        }
    }
}
