use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::middleware;
use axum::routing::{any, get};

use crate::bus::PubSub;
use crate::config::{CheckOrigin, Config};
use crate::handlers;
use crate::session::SessionRegistry;
use crate::transport::{Transport, dispatch};

// ============================================================================
// Application State
// ============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub transport: Arc<Transport>,
    pub registry: SessionRegistry,
    pub bus: PubSub,
    pub check_origin: CheckOrigin,
}

impl AppState {
    pub fn from_config(config: &Config) -> Self {
        let bus = PubSub::new();
        // Sessions outlive their client by one missed poll before the idle
        // sweep reclaims them.
        let idle_timeout = Duration::from_millis(config.transport.window_ms * 2);
        let registry = SessionRegistry::new(bus.clone(), idle_timeout);
        let transport = Arc::new(Transport::new(
            &config.transport,
            bus.clone(),
            registry.clone(),
        ));

        Self {
            transport,
            registry,
            bus,
            check_origin: config.transport.check_origin.clone(),
        }
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn build_app(state: AppState, mount_path: &str) -> Router {
    // The origin guard wraps only the long-poll mount; operational
    // endpoints stay reachable from anywhere.
    let longpoll = Router::new()
        .route(mount_path, any(dispatch::poll))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            dispatch::origin_guard,
        ));

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/version", get(handlers::version))
        .merge(longpoll)
        .with_state(state)
}
