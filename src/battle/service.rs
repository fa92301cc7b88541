use chrono::Utc;
use futures::future::join_all;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{watch, Mutex as AsyncMutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::{
    models::{Battle, BattleDetail, BattlePlayer, BattleResults, BattleStatus},
    move_provider::{MoveProvider, MoveRequest, RandomMoveProvider},
    reconciliation::{seat_rating_update, ReconciliationQueue},
    repository::{BattleRepository, JoinBattleResult},
    types::{CancelBattleRequest, CreateBattleRequest, JoinBattleRequest},
    BattleError, ValidationError,
};
use crate::ai_code::{AiCodeRepository, AiCodeService, OwnershipVerifier};
use crate::config::OrchestratorConfig;
use crate::event::{BattleEvent, EventBus, SeatResult};
use crate::game::{GameRegistry, Outcome, Referee, RefereeOutcome, SubmittedMove};
use crate::rating::RatingEngine;
use crate::shared::{Actor, AiCodeId, BattleId, UserId};

/// Versioned battle writes re-read and retry this many times before giving up
const WRITE_ATTEMPTS: usize = 3;

/// Drives battles through their lifecycle and feeds finished ones into the
/// rating engine. Every state change for one battle happens under that
/// battle's mutex, and every write is a versioned compare-and-swap.
pub struct BattleOrchestrator {
    repository: Arc<dyn BattleRepository>,
    registry: GameRegistry,
    ratings: Arc<RatingEngine>,
    codes: Arc<dyn AiCodeRepository>,
    ownership: Arc<dyn OwnershipVerifier>,
    move_provider: Arc<dyn MoveProvider>,
    reconciliation: ReconciliationQueue,
    event_bus: EventBus,
    config: OrchestratorConfig,
    battle_mutexes: Arc<RwLock<HashMap<BattleId, Arc<AsyncMutex<()>>>>>,
    cancel_signals: Arc<RwLock<HashMap<BattleId, watch::Sender<bool>>>>,
}

impl BattleOrchestrator {
    pub fn builder(
        repository: Arc<dyn BattleRepository>,
        registry: GameRegistry,
        ratings: Arc<RatingEngine>,
        codes: Arc<dyn AiCodeRepository>,
    ) -> BattleOrchestratorBuilder {
        BattleOrchestratorBuilder::new(repository, registry, ratings, codes)
    }

    pub fn registry(&self) -> &GameRegistry {
        &self.registry
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn reconciliation_queue(&self) -> &ReconciliationQueue {
        &self.reconciliation
    }

    /// Creates a battle in `waiting` and seats the creator at position 1
    #[instrument(skip(self, request), fields(user_id = actor.user_id, game_type = %request.game_type))]
    pub async fn create_battle(
        &self,
        actor: Actor,
        request: CreateBattleRequest,
    ) -> Result<BattleDetail, BattleError> {
        let referee = self.registry.lookup(&request.game_type)?;

        let battle = self
            .repository
            .create_battle(Battle::new(
                request.game_type,
                actor.user_id,
                request.ranking_id,
                request.battle_type,
                request.is_elo_exempt,
            ))
            .await?;
        info!(battle_id = battle.id, "Battle created");

        self.event_bus
            .emit(BattleEvent::BattleCreated {
                battle_id: battle.id,
                game_type: battle.game_type.clone(),
                creator_id: actor.user_id,
            })
            .await;

        self.seat(
            battle.id,
            actor.user_id,
            request.ai_code_id,
            referee.info().player_count,
        )
        .await?;

        self.get_battle(battle.id).await
    }

    /// Takes the next free seat in a waiting battle
    #[instrument(skip(self, request), fields(user_id = actor.user_id))]
    pub async fn join_battle(
        &self,
        actor: Actor,
        battle_id: BattleId,
        request: JoinBattleRequest,
    ) -> Result<BattleDetail, BattleError> {
        let lock = self.battle_lock(battle_id).await;
        let _guard = lock.lock().await;

        let battle = self.load(battle_id).await?;
        let referee = self.registry.lookup(&battle.game_type)?;

        self.seat(
            battle_id,
            actor.user_id,
            request.ai_code_id,
            referee.info().player_count,
        )
        .await?;

        self.get_battle(battle_id).await
    }

    /// waiting -> starting -> running.
    ///
    /// Every seat must be filled with an executable AI code owned by its
    /// player; otherwise the battle stays in `waiting`. A game type that no
    /// longer resolves to a referee sends the battle to `error`.
    #[instrument(skip(self), fields(user_id = actor.user_id))]
    pub async fn start_battle(&self, actor: Actor, battle_id: BattleId) -> Result<BattleDetail, BattleError> {
        let lock = self.battle_lock(battle_id).await;
        let _guard = lock.lock().await;

        let battle = self.load(battle_id).await?;
        if battle.status != BattleStatus::Waiting {
            return Err(BattleError::InvalidTransition {
                from: battle.status,
                to: BattleStatus::Starting,
            });
        }

        let players = self.repository.list_players(battle_id).await?;
        ensure_may_start(&actor, &battle, &players)?;

        let referee = match self.registry.lookup(&battle.game_type) {
            Ok(referee) => referee,
            Err(e) => {
                let starting = self.update_battle(&battle, BattleStatus::Starting, |_| {}).await?;
                self.fail_battle(&starting, &players, e.to_string()).await?;
                return Err(e.into());
            }
        };

        let required = referee.info().player_count;
        if players.len() != required {
            return Err(ValidationError::SeatsNotFilled {
                required,
                seated: players.len(),
            }
            .into());
        }
        let players = self.prepare_seats(&battle, players).await?;

        self.repository.save_players(&players).await?;
        let starting = self.update_battle(&battle, BattleStatus::Starting, |_| {}).await?;

        let started_at = Utc::now();
        let game_log_id = Uuid::new_v4();
        let running = self
            .update_battle(&starting, BattleStatus::Running, |b| {
                b.started_at = Some(started_at);
                b.game_log_id = Some(game_log_id);
            })
            .await?;
        self.open_cancel_channel(battle_id).await;

        info!(battle_id, %game_log_id, seats = players.len(), "Battle running");
        self.event_bus
            .emit(BattleEvent::BattleStarted {
                battle_id,
                players: players.iter().map(|p| p.user_id).collect(),
            })
            .await;

        Ok(BattleDetail {
            battle: running,
            players,
        })
    }

    /// Collects one move per seat from the move provider, in position order,
    /// then finalizes. Expiry of the turn timeout cancels the battle. A battle
    /// whose ratings are already committed skips straight to finalizing from
    /// its stored outcome.
    #[instrument(skip(self))]
    pub async fn run_battle(&self, battle_id: BattleId) -> Result<BattleDetail, BattleError> {
        let battle = self.load(battle_id).await?;
        if battle.status != BattleStatus::Running {
            return Err(BattleError::InvalidTransition {
                from: battle.status,
                to: BattleStatus::Finished,
            });
        }
        if battle.ratings_committed {
            return self.finalize_battle(battle_id, Vec::new()).await;
        }
        let players = self.repository.list_players(battle_id).await?;
        let cancelled = self.cancel_receiver(battle_id).await;

        let moves = tokio::select! {
            collected = timeout(self.config.turn_timeout, self.collect_moves(&battle, &players)) => {
                match collected {
                    Ok(moves) => moves,
                    Err(_elapsed) => {
                        warn!(battle_id, "Turn timeout expired, cancelling battle");
                        let request = CancelBattleRequest {
                            reason: Some("turn timeout".to_string()),
                        };
                        self.cancel_battle(Actor::system(), battle_id, request).await?;
                        return Err(BattleError::Cancelled(battle_id));
                    }
                }
            }
            _ = wait_for_cancel(cancelled) => {
                info!(battle_id, "Move collection interrupted by cancellation");
                return Err(BattleError::Cancelled(battle_id));
            }
        };

        self.finalize_battle(battle_id, moves).await
    }

    /// Starts and runs a battle in one call. Replaying it on a battle left
    /// running with committed ratings finishes that battle.
    pub async fn play_battle(&self, actor: Actor, battle_id: BattleId) -> Result<BattleDetail, BattleError> {
        let battle = self.load(battle_id).await?;
        if battle.status == BattleStatus::Running && battle.ratings_committed {
            let players = self.repository.list_players(battle_id).await?;
            ensure_may_start(&actor, &battle, &players)?;
            return self.run_battle(battle_id).await;
        }

        self.start_battle(actor, battle_id).await?;
        self.run_battle(battle_id).await
    }

    /// Resolves the submitted moves and commits the terminal state.
    ///
    /// An invalid move or a referee failure ends the battle in `error` with
    /// nobody rated. Otherwise every seat is rated in position order (unless
    /// the battle is ELO exempt) before the battle is durably `finished`;
    /// rating updates that fail are queued for reconciliation instead of
    /// blocking completion. Once ratings are committed the stored outcome
    /// wins and `moves` is ignored.
    #[instrument(skip(self, moves))]
    pub async fn finalize_battle(
        &self,
        battle_id: BattleId,
        moves: Vec<SubmittedMove>,
    ) -> Result<BattleDetail, BattleError> {
        let lock = self.battle_lock(battle_id).await;
        let _guard = lock.lock().await;

        let battle = self.load(battle_id).await?;
        match battle.status {
            BattleStatus::Running => {}
            BattleStatus::Cancelled => return Err(BattleError::Cancelled(battle_id)),
            other => {
                return Err(BattleError::InvalidTransition {
                    from: other,
                    to: BattleStatus::Finished,
                })
            }
        }

        let players = self.repository.list_players(battle_id).await?;
        if let Some(results) = committed_results(&battle) {
            info!(battle_id, "Ratings already committed, replaying the stored outcome");
            return self.complete_battle(battle, players, results).await;
        }
        let ordered = order_by_position(&players, moves)?;

        let referee = match self.registry.lookup(&battle.game_type) {
            Ok(referee) => referee,
            Err(e) => {
                self.fail_battle(&battle, &players, e.to_string()).await?;
                return Err(e.into());
            }
        };

        let outcome = match resolve_guarded(referee.as_ref(), &ordered, &players) {
            Ok(outcome) if !outcome.has_error() => outcome,
            Ok(outcome) => {
                let reason = outcome
                    .metadata
                    .get("reason")
                    .and_then(|r| r.as_str())
                    .unwrap_or("invalid move")
                    .to_string();
                info!(battle_id, reason = %reason, "Referee rejected a submission");
                let (battle, players) = self.fail_battle(&battle, &players, reason).await?;
                return Ok(BattleDetail { battle, players });
            }
            Err(fault) => {
                error!(battle_id, fault = %fault, "Referee fault");
                self.fail_battle(&battle, &players, format!("referee fault: {fault}"))
                    .await?;
                return Err(BattleError::RefereeFault(fault));
            }
        };

        let results = BattleResults::from_outcome(&players, outcome);
        self.complete_battle(battle, players, results).await
    }

    /// Cancels a battle that has not reached a terminal state.
    ///
    /// Waiting and starting battles can be cancelled by their creator or an
    /// administrator, running ones only by an administrator. Refused once
    /// any rating has been applied.
    #[instrument(skip(self, request), fields(user_id = actor.user_id))]
    pub async fn cancel_battle(
        &self,
        actor: Actor,
        battle_id: BattleId,
        request: CancelBattleRequest,
    ) -> Result<BattleDetail, BattleError> {
        let lock = self.battle_lock(battle_id).await;
        let _guard = lock.lock().await;

        let battle = self.load(battle_id).await?;
        if battle.status.is_terminal() {
            return Err(BattleError::InvalidTransition {
                from: battle.status,
                to: BattleStatus::Cancelled,
            });
        }
        if battle.ratings_committed {
            return Err(ValidationError::RatingsAlreadyApplied.into());
        }

        let allowed = match battle.status {
            BattleStatus::Running => actor.is_admin,
            _ => actor.is_admin || actor.user_id == battle.creator_id,
        };
        if !allowed {
            warn!(battle_id, status = %battle.status, "Cancellation refused");
            return Err(BattleError::Forbidden(format!(
                "user {} cannot cancel a {} battle",
                actor.user_id, battle.status
            )));
        }

        let reason = request
            .reason
            .unwrap_or_else(|| "cancelled by user".to_string());
        let cancelled = self
            .update_battle(&battle, BattleStatus::Cancelled, |b| {
                b.failure_reason = Some(reason.clone());
            })
            .await?;
        self.signal_cancel(battle_id).await;

        let players = self.repository.list_players(battle_id).await?;
        let counted = join_all(players.iter().map(|seat| {
            self.ratings
                .record_cancellation(seat.user_id, &battle.game_type, battle.ranking_id)
        }))
        .await;
        for (seat, result) in players.iter().zip(counted) {
            if let Err(e) = result {
                warn!(battle_id, user_id = seat.user_id, error = %e, "Could not count cancelled game");
            }
        }

        info!(battle_id, reason = %reason, "Battle cancelled");
        self.event_bus
            .emit(BattleEvent::BattleCancelled { battle_id, reason })
            .await;
        self.clear_battle_lock(battle_id).await;

        Ok(BattleDetail {
            battle: cancelled,
            players,
        })
    }

    pub async fn get_battle(&self, battle_id: BattleId) -> Result<BattleDetail, BattleError> {
        let battle = self.load(battle_id).await?;
        let players = self.repository.list_players(battle_id).await?;
        Ok(BattleDetail { battle, players })
    }

    /// Rates every seat and writes `finished`.
    ///
    /// The frozen results go out in the same versioned write that sets
    /// `ratings_committed`, so a retry after a partial failure replays the
    /// stored outcome instead of resolving again. Seats rated on an earlier
    /// attempt hit the rating ledger and get their original change back.
    async fn complete_battle(
        &self,
        battle: Battle,
        players: Vec<BattlePlayer>,
        results: BattleResults,
    ) -> Result<BattleDetail, BattleError> {
        let battle_id = battle.id;
        let ended_at = Utc::now();
        let default_elo = self.ratings.config().initial_elo;

        let mut seats = players.clone();
        for seat in seats.iter_mut() {
            seat.outcome = results.outcome_for(seat.user_id);
        }

        let mut battle = battle;
        let mut pending = false;
        if battle.is_elo_exempt {
            for seat in seats.iter_mut() {
                seat.elo_change = Some(0);
            }
        } else {
            if !battle.ratings_committed {
                battle = self
                    .update_battle(&battle, BattleStatus::Running, |b| {
                        b.ratings_committed = true;
                        b.results = Some(results.clone());
                    })
                    .await?;
            }

            let mut scored = battle.clone();
            scored.ended_at = Some(ended_at);
            for seat in seats.iter_mut() {
                let Some(seat_outcome) = seat.outcome else {
                    continue;
                };
                let update = seat_rating_update(&scored, &players, seat, seat_outcome, default_elo);
                match self.ratings.apply_outcome(&update).await {
                    Ok(change) => {
                        seat.elo_change = Some(change.elo_change);
                        self.reconciliation.remove(battle_id, seat.user_id).await;
                    }
                    Err(e) => {
                        warn!(
                            battle_id,
                            user_id = seat.user_id,
                            error = %e,
                            "Rating update deferred to reconciliation"
                        );
                        self.reconciliation.enqueue(update).await;
                        seat.elo_change = None;
                        pending = true;
                    }
                }
            }
        }

        self.repository.save_players(&seats).await?;

        let finished = self
            .update_battle(&battle, BattleStatus::Finished, |b| {
                b.ended_at = Some(ended_at);
                b.results = Some(results.clone());
                b.pending_reconciliation = pending;
            })
            .await?;
        self.close_cancel_channel(battle_id).await;

        info!(battle_id, is_draw = results.is_draw, pending, "Battle finished");
        self.event_bus
            .emit(BattleEvent::BattleFinished {
                battle_id,
                results: seats
                    .iter()
                    .map(|seat| SeatResult {
                        user_id: seat.user_id,
                        outcome: seat.outcome.unwrap_or(Outcome::Error),
                        elo_change: seat.elo_change,
                    })
                    .collect(),
                pending_reconciliation: pending,
            })
            .await;
        self.clear_battle_lock(battle_id).await;

        Ok(BattleDetail {
            battle: finished,
            players: seats,
        })
    }

    /// Marks every seat as ERROR with no rating change and moves the battle to `error`
    async fn fail_battle(
        &self,
        battle: &Battle,
        players: &[BattlePlayer],
        reason: String,
    ) -> Result<(Battle, Vec<BattlePlayer>), BattleError> {
        let seats: Vec<BattlePlayer> = players
            .iter()
            .cloned()
            .map(|mut seat| {
                seat.outcome = Some(Outcome::Error);
                seat.elo_change = Some(0);
                seat
            })
            .collect();
        self.repository.save_players(&seats).await?;

        let failed = self
            .update_battle(battle, BattleStatus::Error, |b| {
                b.failure_reason = Some(reason.clone());
            })
            .await?;
        self.close_cancel_channel(battle.id).await;

        warn!(battle_id = battle.id, reason = %reason, "Battle ended in error");
        self.event_bus
            .emit(BattleEvent::BattleErrored {
                battle_id: battle.id,
                reason,
            })
            .await;
        self.clear_battle_lock(battle.id).await;

        Ok((failed, seats))
    }

    /// Checks every seat's AI code and snapshots the starting ELOs
    async fn prepare_seats(
        &self,
        battle: &Battle,
        players: Vec<BattlePlayer>,
    ) -> Result<Vec<BattlePlayer>, BattleError> {
        let mut prepared = Vec::with_capacity(players.len());

        for mut seat in players {
            let ai_code_id = seat
                .selected_ai_code_id
                .ok_or(ValidationError::MissingAiCode {
                    position: seat.position,
                })?;
            let code = self
                .codes
                .get_code(ai_code_id)
                .await?
                .ok_or(ValidationError::UnknownAiCode(ai_code_id))?;

            if !self.ownership.verify_ownership(seat.user_id, ai_code_id).await? {
                return Err(ValidationError::NotOwner {
                    user_id: seat.user_id,
                    ai_code_id,
                }
                .into());
            }
            if !code.is_executable() {
                return Err(ValidationError::NotExecutable(ai_code_id).into());
            }
            if code.game_type != battle.game_type {
                return Err(ValidationError::WrongGameType {
                    ai_code_id,
                    expected: battle.game_type.clone(),
                    actual: code.game_type,
                }
                .into());
            }

            seat.initial_elo = Some(
                self.ratings
                    .current_elo(seat.user_id, &battle.game_type, battle.ranking_id)
                    .await?,
            );
            seat.initial_code_elo = Some(code.elo_score);
            prepared.push(seat);
        }

        Ok(prepared)
    }

    /// A failed or slow provider forfeits the seat with an empty, illegal move
    async fn collect_moves(&self, battle: &Battle, players: &[BattlePlayer]) -> Vec<SubmittedMove> {
        let mut moves = Vec::with_capacity(players.len());

        for seat in players {
            let request = MoveRequest {
                battle_id: battle.id,
                game_type: battle.game_type.clone(),
                user_id: seat.user_id,
                ai_code_id: seat.selected_ai_code_id,
                position: seat.position,
            };

            let value = match timeout(
                self.config.move_timeout,
                self.move_provider.request_move(&request),
            )
            .await
            {
                Ok(Ok(value)) => value,
                Ok(Err(e)) => {
                    warn!(battle_id = battle.id, user_id = seat.user_id, error = %e, "Move provider failed");
                    String::new()
                }
                Err(_elapsed) => {
                    warn!(battle_id = battle.id, user_id = seat.user_id, "Move provider timed out");
                    String::new()
                }
            };
            debug!(battle_id = battle.id, user_id = seat.user_id, "Move collected");
            moves.push(SubmittedMove::new(seat.user_id, value));
        }

        moves
    }

    async fn seat(
        &self,
        battle_id: BattleId,
        user_id: UserId,
        ai_code_id: Option<AiCodeId>,
        capacity: usize,
    ) -> Result<BattlePlayer, BattleError> {
        match self
            .repository
            .try_join(battle_id, user_id, ai_code_id, capacity)
            .await?
        {
            JoinBattleResult::Success(player) => {
                self.event_bus
                    .emit(BattleEvent::PlayerJoined {
                        battle_id,
                        user_id,
                        position: player.position,
                    })
                    .await;
                Ok(player)
            }
            JoinBattleResult::AlreadySeated(_) => Err(ValidationError::AlreadySeated(user_id).into()),
            JoinBattleResult::BattleFull => Err(ValidationError::BattleFull.into()),
            JoinBattleResult::NotJoinable(status) => Err(ValidationError::NotJoinable(status).into()),
            JoinBattleResult::BattleNotFound => Err(BattleError::NotFound(battle_id)),
        }
    }

    async fn load(&self, battle_id: BattleId) -> Result<Battle, BattleError> {
        self.repository
            .get_battle(battle_id)
            .await?
            .ok_or(BattleError::NotFound(battle_id))
    }

    /// Versioned write moving `battle` to `next` (or rewriting it in place when
    /// `next` is its current status). A lost race re-reads the row and tries
    /// again from the fresh state, which surfaces as InvalidTransition if the
    /// other writer already moved the battle on.
    async fn update_battle(
        &self,
        battle: &Battle,
        next: BattleStatus,
        edit: impl Fn(&mut Battle) + Send,
    ) -> Result<Battle, BattleError> {
        let mut current = battle.clone();

        for _ in 0..WRITE_ATTEMPTS {
            if current.status != next && !current.status.can_transition_to(next) {
                return Err(BattleError::InvalidTransition {
                    from: current.status,
                    to: next,
                });
            }

            let mut updated = current.transitioned(next);
            edit(&mut updated);
            if self.repository.compare_and_swap(current.version, &updated).await? {
                debug!(battle_id = battle.id, from = %current.status, to = %next, "Battle written");
                return Ok(updated);
            }

            debug!(battle_id = battle.id, "Battle row moved underneath, re-reading");
            current = self.load(battle.id).await?;
        }

        Err(BattleError::ConcurrencyConflict(battle.id))
    }

    async fn battle_lock(&self, battle_id: BattleId) -> Arc<AsyncMutex<()>> {
        {
            let guard = self.battle_mutexes.read().await;
            if let Some(lock) = guard.get(&battle_id) {
                return lock.clone();
            }
        }

        let mut guard = self.battle_mutexes.write().await;
        guard
            .entry(battle_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn clear_battle_lock(&self, battle_id: BattleId) {
        self.battle_mutexes.write().await.remove(&battle_id);
    }

    async fn open_cancel_channel(&self, battle_id: BattleId) {
        let (sender, _) = watch::channel(false);
        self.cancel_signals.write().await.insert(battle_id, sender);
    }

    async fn cancel_receiver(&self, battle_id: BattleId) -> watch::Receiver<bool> {
        {
            let signals = self.cancel_signals.read().await;
            if let Some(sender) = signals.get(&battle_id) {
                return sender.subscribe();
            }
        }

        // Held across the reload so a cancel cannot slip in between the
        // status check and the insert.
        let mut signals = self.cancel_signals.write().await;
        if let Some(sender) = signals.get(&battle_id) {
            return sender.subscribe();
        }
        match self.repository.get_battle(battle_id).await {
            Ok(Some(battle)) if battle.status == BattleStatus::Running => {
                let (sender, receiver) = watch::channel(false);
                signals.insert(battle_id, sender);
                receiver
            }
            Ok(_) => watch::channel(true).1,
            Err(e) => {
                warn!(battle_id, error = %e, "Could not recheck battle before collecting moves");
                watch::channel(false).1
            }
        }
    }

    async fn signal_cancel(&self, battle_id: BattleId) {
        if let Some(sender) = self.cancel_signals.write().await.remove(&battle_id) {
            sender.send_replace(true);
        }
    }

    async fn close_cancel_channel(&self, battle_id: BattleId) {
        self.cancel_signals.write().await.remove(&battle_id);
    }
}

/// Resolves once a cancellation is signalled. A channel closed without a
/// signal means the battle ended another way, so this never resolves.
async fn wait_for_cancel(mut receiver: watch::Receiver<bool>) {
    if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn ensure_may_start(actor: &Actor, battle: &Battle, players: &[BattlePlayer]) -> Result<(), BattleError> {
    if actor.is_admin
        || actor.user_id == battle.creator_id
        || players.iter().any(|p| p.user_id == actor.user_id)
    {
        Ok(())
    } else {
        Err(BattleError::Forbidden(
            "only a seated player or an administrator can start this battle".to_string(),
        ))
    }
}

/// Results frozen by an earlier finalize that committed ratings but never finished
fn committed_results(battle: &Battle) -> Option<BattleResults> {
    if battle.status == BattleStatus::Running && battle.ratings_committed {
        battle.results.clone()
    } else {
        None
    }
}

/// Puts one move per seated player into seat order
fn order_by_position(
    players: &[BattlePlayer],
    moves: Vec<SubmittedMove>,
) -> Result<Vec<SubmittedMove>, BattleError> {
    if moves.len() != players.len() {
        return Err(ValidationError::ParticipantMismatch.into());
    }

    let mut by_participant: HashMap<UserId, SubmittedMove> = HashMap::with_capacity(moves.len());
    for submitted in moves {
        if by_participant
            .insert(submitted.participant_id, submitted)
            .is_some()
        {
            return Err(ValidationError::ParticipantMismatch.into());
        }
    }

    players
        .iter()
        .map(|seat| {
            by_participant
                .remove(&seat.user_id)
                .ok_or(BattleError::Validation(ValidationError::ParticipantMismatch))
        })
        .collect()
}

/// Runs the referee, turning an `Err`, a panic, or a missing seat into a fault message
fn resolve_guarded(
    referee: &dyn Referee,
    moves: &[SubmittedMove],
    players: &[BattlePlayer],
) -> Result<RefereeOutcome, String> {
    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| referee.resolve(moves))) {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => return Err(e.to_string()),
        Err(payload) => return Err(panic_message(payload)),
    };

    match players.iter().find(|p| outcome.outcome_for(p.user_id).is_none()) {
        Some(missing) => Err(format!("no outcome for user {}", missing.user_id)),
        None => Ok(outcome),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("referee panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("referee panicked: {message}")
    } else {
        "referee panicked".to_string()
    }
}

pub struct BattleOrchestratorBuilder {
    repository: Arc<dyn BattleRepository>,
    registry: GameRegistry,
    ratings: Arc<RatingEngine>,
    codes: Arc<dyn AiCodeRepository>,
    ownership: Option<Arc<dyn OwnershipVerifier>>,
    move_provider: Option<Arc<dyn MoveProvider>>,
    reconciliation: ReconciliationQueue,
    event_bus: EventBus,
    config: OrchestratorConfig,
}

impl BattleOrchestratorBuilder {
    fn new(
        repository: Arc<dyn BattleRepository>,
        registry: GameRegistry,
        ratings: Arc<RatingEngine>,
        codes: Arc<dyn AiCodeRepository>,
    ) -> Self {
        Self {
            repository,
            registry,
            ratings,
            codes,
            ownership: None,
            move_provider: None,
            reconciliation: ReconciliationQueue::new(),
            event_bus: EventBus::with_default_capacity(),
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_ownership(mut self, ownership: Arc<dyn OwnershipVerifier>) -> Self {
        self.ownership = Some(ownership);
        self
    }

    pub fn with_move_provider(mut self, move_provider: Arc<dyn MoveProvider>) -> Self {
        self.move_provider = Some(move_provider);
        self
    }

    pub fn with_reconciliation_queue(mut self, queue: ReconciliationQueue) -> Self {
        self.reconciliation = queue;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> BattleOrchestrator {
        let ownership = self
            .ownership
            .unwrap_or_else(|| Arc::new(AiCodeService::new(Arc::clone(&self.codes))));
        let move_provider = self
            .move_provider
            .unwrap_or_else(|| Arc::new(RandomMoveProvider::new(self.registry.clone())));

        BattleOrchestrator {
            repository: self.repository,
            registry: self.registry,
            ratings: self.ratings,
            codes: self.codes,
            ownership,
            move_provider,
            reconciliation: self.reconciliation,
            event_bus: self.event_bus,
            config: self.config,
            battle_mutexes: Arc::new(RwLock::new(HashMap::new())),
            cancel_signals: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}
