// Event-driven plumbing between the orchestrator and its observers
//
// The orchestrator publishes a BattleEvent for every lifecycle change;
// subscribers (the audit log, tests, future notifiers) react on their own
// tasks so a slow observer never holds up a battle.

// Public API - what other modules can use
pub use audit::AuditLogHandler;
pub use bus::EventBus;
pub use dispatcher::EventDispatcher;
pub use events::{BattleEvent, SeatResult};
pub use handler::{EventError, EventHandler};

// Internal modules
mod audit;
mod bus;
mod dispatcher;
mod events;
mod handler;
