//! Common test utilities.

use axum::Router;

use pollrelay::config::{CheckOrigin, Config};
use pollrelay::server::{self, AppState};

/// Windows are shortened so no-content paths finish in tens of
/// milliseconds instead of the production ten seconds.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.transport.window_ms = 100;
    config.transport.pubsub_timeout_ms = 100;
    config.transport.secret = Some("test-secret".to_string());
    config
}

/// Create a test app with fast poll windows.
pub fn test_app() -> (Router, AppState) {
    test_app_with(test_config())
}

pub fn test_app_with(config: Config) -> (Router, AppState) {
    let state = AppState::from_config(&config);
    let app = server::build_app(state.clone(), &config.transport.mount_path);
    (app, state)
}

#[allow(dead_code)]
pub fn origin_config(check_origin: CheckOrigin) -> Config {
    let mut config = test_config();
    config.transport.check_origin = check_origin;
    config
}
