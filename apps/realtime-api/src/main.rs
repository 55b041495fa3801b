use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use realtime_api::config::Config;
use realtime_api::store::external::{
    MemoryCallHistoryStore, MemoryNotificationStore, MemoryUserDirectory,
};
use realtime_api::store::presence::{MemoryPresenceStore, PresenceStore, RedisPresenceStore};
use realtime_api::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing — env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    // Shared Redis presence store when configured; in-process fallback keeps
    // single-node deployments working without one.
    let presence: Arc<dyn PresenceStore> = match &config.redis_url {
        Some(url) => {
            let store = RedisPresenceStore::open(url)
                .await
                .expect("failed to connect to redis");
            tracing::info!(redis_url = %url, "presence store backed by redis");
            Arc::new(store)
        }
        None => {
            tracing::info!("REDIS_URL unset, using in-process presence store");
            Arc::new(MemoryPresenceStore::new())
        }
    };

    // In-memory collaborators until the CRUD tier's document-store adapters
    // are wired in.
    let state = AppState::new(
        config,
        presence,
        Arc::new(MemoryUserDirectory::new()),
        Arc::new(MemoryNotificationStore::new()),
        Arc::new(MemoryCallHistoryStore::new()),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(realtime_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "realtime-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
