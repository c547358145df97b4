//! Session actors and their lifecycle.
//!
//! - **SessionActor** — owns the frame buffer, the parked-flush slot, and
//!   room memberships; processes requests sequentially so no locks are held
//!   across await points.
//! - **SessionHandle** — cloneable sender used for direct, in-process
//!   addressing.
//! - **SessionRegistry** — maps session ids to handles; validates the
//!   creation handshake and manages actor shutdown.
//! - **protocol** — the tagged request/reply vocabulary shared with the
//!   transport layer.

mod actor;
mod handle;
pub mod protocol;
mod registry;

pub use handle::SessionHandle;
pub use protocol::{ActorError, ClientRef, CorrelationId, SessionRequest, TransportReply};
pub use registry::SessionRegistry;
