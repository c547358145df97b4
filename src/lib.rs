//! Pollrelay - a long-polling message relay server.
//!
//! Clients without WebSocket support poll an HTTP endpoint instead: GET
//! creates or drains a session, POST publishes a frame into it. Sessions
//! are resumable across requests via a signed credential, and frames fan
//! out between sessions through named rooms on an in-process pub/sub bus.

pub mod bus;
pub mod config;
pub mod handlers;
pub mod relay;
pub mod server;
pub mod session;
pub mod token;
pub mod transport;
