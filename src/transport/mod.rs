//! Long-poll transport.
//!
//! The transport turns single-shot HTTP requests into a resumable session
//! stream: GET without a credential creates a session and mints a signed
//! token, GET with one long-polls the session's frame buffer, POST hands a
//! frame to the session. Every session interaction is a correlated,
//! deadline-bounded round trip.

pub mod correlate;
pub mod dispatch;
pub mod envelope;
pub mod ops;
pub mod resolver;

pub use envelope::Status;
pub use ops::{CreateOutcome, ResumedSession, Transport};
pub use resolver::SessionAddress;
