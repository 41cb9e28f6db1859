//! Application state wiring the engine to its concrete infrastructure.
//!
//! The engine and repositories are generic in `conveyor-core`; AppState pins
//! them to the SQLite implementations and shares the same repository
//! instances between the engine and the HTTP handlers.

use std::path::PathBuf;
use std::sync::Arc;

use conveyor_core::engine::executor::Engine;
use conveyor_core::engine::registry::HandlerRegistry;
use conveyor_core::event::EventBus;
use conveyor_infra::config::{load_global_config, resolve_data_dir};
use conveyor_infra::sqlite::flow::SqliteFlowRepository;
use conveyor_infra::sqlite::pool::DatabasePool;
use conveyor_infra::sqlite::run::SqliteRunRepository;
use conveyor_types::config::GlobalConfig;

/// The engine pinned to the SQLite repositories.
pub type ConcreteEngine = Engine<SqliteFlowRepository, SqliteRunRepository>;

/// Shared application state holding the engine and repositories.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConcreteEngine>,
    pub flows: Arc<SqliteFlowRepository>,
    pub runs: Arc<SqliteRunRepository>,
    pub db_pool: DatabasePool,
    pub data_dir: PathBuf,
    pub config: GlobalConfig,
}

impl AppState {
    /// Initialize the application state: connect to the database, wire the
    /// repositories, and build the engine around the given handler registry.
    pub async fn init(registry: HandlerRegistry) -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_global_config(&data_dir).await;

        let db_url = format!(
            "sqlite://{}?mode=rwc",
            data_dir.join("conveyor.db").display()
        );
        let db_pool = DatabasePool::new(&db_url).await?;

        let flows = Arc::new(SqliteFlowRepository::new(db_pool.clone()));
        let runs = Arc::new(SqliteRunRepository::new(db_pool.clone()));

        let engine = Arc::new(Engine::new(
            Arc::clone(&flows),
            Arc::clone(&runs),
            registry,
            EventBus::default(),
            config.worker_count,
        ));

        Ok(Self {
            engine,
            flows,
            runs,
            db_pool,
            data_dir,
            config,
        })
    }
}
