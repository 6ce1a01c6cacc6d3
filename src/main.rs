use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

mod config;
mod error;
mod logging;
mod models;
mod routes;
mod services;

use services::catalog::{CatalogStore, SqliteCatalog};
use services::excel::WorkbookAnalyzer;
use services::orchestrator::ImportOrchestrator;
use services::session::SessionRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging()?;
    let config = config::load_config()?;

    let catalog = SqliteCatalog::open(&config.database_path)?;

    let state = Arc::new(AppState::new(config, Arc::new(catalog)));
    spawn_reaper(state.clone());

    let addr = state.config.bind_addr;
    let app = routes::router(state);

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Drops sessions nobody has touched for the configured TTL.
fn spawn_reaper(state: Arc<AppState>) {
    let ttl = Duration::from_secs(state.config.session_ttl_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ttl.min(Duration::from_secs(60)).max(Duration::from_secs(1)));
        loop {
            interval.tick().await;
            let reaped = state.sessions.reap_idle(ttl);
            if reaped > 0 {
                tracing::info!("Reaped {} idle sessions, {} remain", reaped, state.sessions.len());
            }
        }
    });
}

pub struct AppState {
    pub config: config::Config,
    pub analyzer: WorkbookAnalyzer,
    pub catalog: Arc<dyn CatalogStore>,
    pub sessions: SessionRegistry,
    pub orchestrator: ImportOrchestrator,
}

impl AppState {
    fn new(config: config::Config, catalog: Arc<dyn CatalogStore>) -> Self {
        Self {
            analyzer: WorkbookAnalyzer::new(config.max_file_size),
            orchestrator: ImportOrchestrator::new(catalog.clone(), config.progress_batch_size),
            sessions: SessionRegistry::default(),
            catalog,
            config,
        }
    }
}
