use arena::{
    battle::{start_reconciliation_task, RandomMoveProvider},
    event::{AuditLogHandler, EventDispatcher},
    ArenaConfig, AppState, EventBus, GameRegistry, Repositories,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arena=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting battle arena server");
    let config = ArenaConfig::from_env();

    let repositories = match config.database_url.as_deref() {
        Some(database_url) => match sqlx::PgPool::connect(database_url).await {
            Ok(pool) => {
                info!("Using PostgreSQL repositories");
                Repositories::postgres(pool)
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to database");
                return;
            }
        },
        None => {
            info!("DATABASE_URL not set, using in-memory repositories");
            Repositories::in_memory()
        }
    };

    let event_bus = EventBus::with_default_capacity();
    let move_provider = Arc::new(RandomMoveProvider::new(GameRegistry::with_builtin_games()));
    let app_state = AppState::new(repositories, &config, event_bus.clone(), move_provider);

    // Audit log subscriber
    let mut dispatcher = EventDispatcher::new(event_bus);
    dispatcher.add_handler(Arc::new(AuditLogHandler));
    let _audit_task = dispatcher.start_listening();

    tokio::spawn(start_reconciliation_task(
        Arc::clone(&app_state.reconciler),
        config.reconcile_interval,
    ));

    let app = arena::router(app_state);

    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(bind_addr = %config.bind_addr, error = %e, "Failed to bind");
            return;
        }
    };
    info!("Server running on http://{}", config.bind_addr);
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "Server stopped");
    }
}
