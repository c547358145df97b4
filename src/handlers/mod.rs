//! HTTP request handlers for the operational endpoints.

mod health;
mod version;

pub use health::livez;
pub use version::version;
