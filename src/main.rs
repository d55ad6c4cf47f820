mod coach;
mod config;
mod db;
mod frame;
mod routes;
mod services;
mod state;
mod store;

use std::sync::Arc;

use coach::{CoachBackend, CoachClient, CoachError};
use store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = config::AppConfig::from_env();

    let store: Arc<dyn Store> = if let Some(database_url) = &config.database_url {
        let pool = db::init_pool(database_url)
            .await
            .expect("database init failed");
        tracing::info!("store: postgres");
        Arc::new(PgStore::new(pool))
    } else {
        tracing::warn!("store: DATABASE_URL not set; using in-memory store");
        Arc::new(MemoryStore::new())
    };

    let coach: Option<Arc<dyn CoachBackend>> = match CoachClient::from_env() {
        Ok(client) => {
            tracing::info!(url = %client.url(), "coach: enabled");
            Some(Arc::new(client))
        }
        Err(CoachError::NotConfigured) => {
            tracing::warn!("coach: COACH_URL not set; coaching disabled");
            None
        }
        Err(e) => panic!("coach init failed: {e}"),
    };

    let port = config.port;
    let state = state::AppState::new(store, coach, config);
    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "converse listening");
    axum::serve(listener, app).await.expect("server failed");
}
