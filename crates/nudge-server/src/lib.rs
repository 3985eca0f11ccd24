//! HTTP surface and process wiring for the nudge escalation engine.
//!
//! ```text
//! POST /v1/replies               reply webhook (acknowledge/snooze/reschedule/skip)
//! POST /v1/tasks                 start tracking a task
//! GET  /v1/tasks/{id}            current snapshot
//! GET  /v1/escalation/config     ladders and auto-miss rules
//! GET  /v1/escalation/preview    timing for ?priority=&multiplier=
//! GET  /v1/metrics               engine counters
//! GET  /health
//! ```

pub mod config;
pub mod http;

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use nudge_escalation::{
    Channel, DispatchGateway, EscalationEngine, HttpDispatcher, HttpTaskStore, JsonFileTaskStore,
    LogDispatcher, MemoryTaskStore, StoreError, TaskStore,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::{ServerConfig, StoreConfig};

/// Shared handler state.
pub struct AppState {
    pub engine: Arc<EscalationEngine>,
}

impl AppState {
    pub fn new(engine: Arc<EscalationEngine>) -> Self {
        Self { engine }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(http::health))
        .route("/v1/replies", post(http::post_reply))
        .route("/v1/tasks", post(http::post_task))
        .route("/v1/tasks/{id}", get(http::get_task))
        .route("/v1/escalation/config", get(http::get_config))
        .route("/v1/escalation/preview", get(http::get_preview))
        .route("/v1/metrics", get(http::get_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve(
    addr: &str,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Open the configured task store.
pub async fn build_store(config: &StoreConfig) -> Result<Arc<dyn TaskStore>, StoreError> {
    let store: Arc<dyn TaskStore> = match config {
        StoreConfig::Memory => Arc::new(MemoryTaskStore::new()),
        StoreConfig::File { path } => Arc::new(JsonFileTaskStore::open(path.clone()).await?),
        StoreConfig::Http {
            base_url,
            api_key,
            timeout_secs,
        } => {
            let mut store =
                HttpTaskStore::new(base_url.clone(), std::time::Duration::from_secs(*timeout_secs))?;
            if let Some(key) = api_key {
                store = store.with_api_key(key.clone());
            }
            Arc::new(store)
        }
    };
    Ok(store)
}

/// Route each channel with a configured URL to its webhook; everything else
/// is logged only.
pub fn build_gateway(config: &ServerConfig) -> Result<DispatchGateway, reqwest::Error> {
    let timeout = config.engine.dispatch_timeout();
    let mut gateway = DispatchGateway::new(timeout).with_fallback(Arc::new(LogDispatcher));

    for &channel in Channel::all() {
        let Some(url) = config.dispatch.url_for(channel) else {
            continue;
        };
        let mut dispatcher = HttpDispatcher::new(url, timeout)?;
        if let Some(key) = &config.dispatch.api_key {
            dispatcher = dispatcher.with_api_key(key.clone());
        }
        info!(%channel, url, "Routing channel to webhook");
        gateway = gateway.with_route(channel, Arc::new(dispatcher));
    }

    Ok(gateway)
}
