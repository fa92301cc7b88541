use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{
    bus::EventBus,
    events::BattleEvent,
    handler::{EventError, EventHandler},
};

/// Routes events from the EventBus to registered handlers
///
/// Each handler runs on its own task with a timeout and retry budget, so a
/// failing handler does not affect the others.
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
    event_bus: EventBus,
    handler_timeout: Duration,
    max_retries: u32,
}

impl EventDispatcher {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            handlers: Vec::new(),
            event_bus,
            handler_timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn add_handler(&mut self, handler: Arc<dyn EventHandler>) {
        info!(handler_name = handler.name(), "Registering event handler");
        self.handlers.push(handler);
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Spawns the dispatch loop; it runs until every bus handle is dropped
    pub fn start_listening(self) -> JoinHandle<()> {
        let handlers = self.handlers;
        let mut receiver = self.event_bus.subscribe();
        let handler_timeout = self.handler_timeout;
        let max_retries = self.max_retries;

        info!(
            handler_count = handlers.len(),
            timeout_ms = handler_timeout.as_millis() as u64,
            max_retries,
            "Starting event dispatcher"
        );

        tokio::spawn(async move {
            loop {
                let event = match receiver.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event dispatcher lagged behind the bus");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                debug!(
                    event_type = event.event_type(),
                    battle_id = event.battle_id(),
                    "Dispatching event to {} handlers",
                    handlers.len()
                );

                for handler in &handlers {
                    let event = event.clone();
                    let handler = handler.clone();

                    tokio::spawn(async move {
                        if let Err(e) =
                            Self::handle_with_retry(handler, event, handler_timeout, max_retries).await
                        {
                            error!(error = ?e, "Handler failed permanently");
                        }
                    });
                }
            }

            info!("Event dispatcher stopped listening");
        })
    }

    async fn handle_with_retry(
        handler: Arc<dyn EventHandler>,
        event: BattleEvent,
        handler_timeout: Duration,
        max_retries: u32,
    ) -> Result<(), EventError> {
        let handler_name = handler.name();
        let event_type = event.event_type();
        let battle_id = event.battle_id();

        let mut attempt = 0;
        loop {
            let error = match timeout(handler_timeout, handler.handle(&event)).await {
                Ok(Ok(())) => {
                    if attempt > 0 {
                        info!(
                            handler = handler_name,
                            event_type,
                            battle_id,
                            attempt = attempt + 1,
                            "Handler succeeded after retry"
                        );
                    }
                    return Ok(());
                }
                Ok(Err(e)) => e,
                Err(_elapsed) => EventError::Timeout,
            };

            if !error.is_retryable() || attempt >= max_retries {
                error!(
                    handler = handler_name,
                    event_type,
                    battle_id,
                    attempt = attempt + 1,
                    error = %error,
                    "Handler gave up"
                );
                return Err(error);
            }

            warn!(
                handler = handler_name,
                event_type,
                battle_id,
                attempt = attempt + 1,
                error = %error,
                "Handler failed, will retry"
            );
            // exponential backoff
            tokio::time::sleep(Duration::from_millis(100 * 2_u64.pow(attempt))).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::sleep;

    struct CountingHandler {
        name: &'static str,
        call_count: AtomicU32,
    }

    impl CountingHandler {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                call_count: AtomicU32::new(0),
            })
        }

        fn call_count(&self) -> u32 {
            self.call_count.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: &BattleEvent) -> Result<(), EventError> {
            self.call_count.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    fn created(battle_id: i64) -> BattleEvent {
        BattleEvent::BattleCreated {
            battle_id,
            game_type: "rock_paper_scissors".to_string(),
            creator_id: 1,
        }
    }

    #[tokio::test]
    async fn test_every_handler_sees_every_event() {
        let event_bus = EventBus::with_default_capacity();
        let mut dispatcher = EventDispatcher::new(event_bus.clone());

        let handler1 = CountingHandler::new("handler1");
        let handler2 = CountingHandler::new("handler2");
        dispatcher.add_handler(handler1.clone());
        dispatcher.add_handler(handler2.clone());
        dispatcher.start_listening();

        event_bus.emit(created(1)).await;
        event_bus.emit(created(2)).await;
        sleep(Duration::from_millis(50)).await;

        assert_eq!(handler1.call_count(), 2);
        assert_eq!(handler2.call_count(), 2);
    }

    struct FailingHandler {
        fail_count: AtomicU32,
        max_failures: u32,
        retryable: bool,
    }

    #[async_trait]
    impl EventHandler for FailingHandler {
        async fn handle(&self, _event: &BattleEvent) -> Result<(), EventError> {
            let current = self.fail_count.fetch_add(1, Ordering::Relaxed);
            match current < self.max_failures {
                true if self.retryable => Err(EventError::retryable("simulated failure")),
                true => Err(EventError::non_retryable("simulated failure")),
                false => Ok(()),
            }
        }

        fn name(&self) -> &'static str {
            "FailingHandler"
        }
    }

    #[tokio::test]
    async fn test_retryable_failures_are_retried() {
        let event_bus = EventBus::with_default_capacity();
        let mut dispatcher = EventDispatcher::new(event_bus.clone())
            .with_max_retries(3)
            .with_handler_timeout(Duration::from_millis(100));

        let handler = Arc::new(FailingHandler {
            fail_count: AtomicU32::new(0),
            max_failures: 2,
            retryable: true,
        });
        dispatcher.add_handler(handler.clone());
        dispatcher.start_listening();

        event_bus.emit(created(1)).await;
        // backoff is 100ms then 200ms
        sleep(Duration::from_millis(600)).await;

        assert_eq!(handler.fail_count.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_is_attempted_once() {
        let event_bus = EventBus::with_default_capacity();
        let mut dispatcher = EventDispatcher::new(event_bus.clone()).with_max_retries(3);

        let handler = Arc::new(FailingHandler {
            fail_count: AtomicU32::new(0),
            max_failures: 5,
            retryable: false,
        });
        dispatcher.add_handler(handler.clone());
        dispatcher.start_listening();

        event_bus.emit(created(1)).await;
        sleep(Duration::from_millis(300)).await;

        assert_eq!(handler.fail_count.load(Ordering::Relaxed), 1);
    }
}
