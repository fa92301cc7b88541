use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::events::BattleEvent;
use crate::shared::BattleId;

const DEFAULT_CAPACITY: usize = 1024;
const BATTLE_CHANNEL_CAPACITY: usize = 64;

/// Event bus for distributing battle events throughout the application
#[derive(Debug, Clone)]
pub struct EventBus {
    /// Every event, for application-wide observers
    sender: broadcast::Sender<BattleEvent>,
    /// Battle-specific channels: battle_id -> sender
    battle_channels: Arc<RwLock<HashMap<BattleId, broadcast::Sender<BattleEvent>>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            battle_channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Publishes an event to global subscribers and to the battle's own channel.
    /// Terminal events close the battle channel afterwards.
    pub async fn emit(&self, event: BattleEvent) {
        let battle_id = event.battle_id();

        match self.sender.send(event.clone()) {
            Ok(receivers) => debug!(
                battle_id,
                event_type = event.event_type(),
                receivers,
                "Battle event emitted"
            ),
            Err(_) => debug!(
                battle_id,
                event_type = event.event_type(),
                "Battle event emitted with no receivers"
            ),
        }

        let terminal = event.is_terminal();
        {
            let channels = self.battle_channels.read().await;
            if let Some(sender) = channels.get(&battle_id) {
                // no receivers is fine
                let _ = sender.send(event);
            }
        }

        if terminal {
            self.battle_channels.write().await.remove(&battle_id);
        }
    }

    /// Subscribe to every battle event
    pub fn subscribe(&self) -> broadcast::Receiver<BattleEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to events for a specific battle
    pub async fn subscribe_to_battle(&self, battle_id: BattleId) -> broadcast::Receiver<BattleEvent> {
        {
            let channels = self.battle_channels.read().await;
            if let Some(sender) = channels.get(&battle_id) {
                return sender.subscribe();
            }
        }

        debug!(battle_id, "Creating new battle channel for subscription");
        let mut channels = self.battle_channels.write().await;
        channels
            .entry(battle_id)
            .or_insert_with(|| broadcast::channel(BATTLE_CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
