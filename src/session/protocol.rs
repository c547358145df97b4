//! Session request/reply protocol.
//!
//! Handlers talk to session actors by sending a tagged request and waiting
//! for exactly one reply carrying the same correlation reference. Requests
//! arrive either on the actor's direct command channel or as bus payloads on
//! the session's private topic; replies always travel back on the client
//! reference embedded in the request.

use thiserror::Error;
use tokio::sync::mpsc;
use ulid::Ulid;

// ============================================================================
// Correlation
// ============================================================================

/// Single-use tag matching an async reply to the request that minted it.
///
/// Never reused; a waiting request accepts only replies carrying its own
/// reference and silently drops anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(Ulid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a session sends replies for one outstanding request.
///
/// The in-process bus carries the sender verbatim, so the same reference
/// works whether the session was addressed directly or via its topic.
#[derive(Clone)]
pub struct ClientRef(mpsc::UnboundedSender<TaggedReply>);

impl ClientRef {
    pub(crate) fn new(tx: mpsc::UnboundedSender<TaggedReply>) -> Self {
        Self(tx)
    }

    /// Send a reply. A closed mailbox means the request already returned;
    /// the reply is dropped, which is the required late-reply behavior.
    pub fn send(&self, reference: CorrelationId, reply: TransportReply) {
        let _ = self.0.send(TaggedReply { reference, reply });
    }
}

impl std::fmt::Debug for ClientRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ClientRef")
    }
}

// ============================================================================
// Requests & Replies
// ============================================================================

/// Requests a handler sends to a session.
#[derive(Debug, Clone)]
pub enum SessionRequest {
    /// Confirm the session is alive and reachable.
    Subscribe {
        client: ClientRef,
        reference: CorrelationId,
    },
    /// Drain buffered frames, or park until some arrive.
    Flush {
        client: ClientRef,
        reference: CorrelationId,
    },
    /// Hand the session a client-sent frame body.
    Dispatch {
        client: ClientRef,
        body: String,
        reference: CorrelationId,
    },
}

/// Replies a session sends back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportReply {
    SubscribeAck,
    Messages(Vec<String>),
    /// Frames arrived after the session answered "nothing buffered" but
    /// before the handler's wait ended; re-flush to pick them up.
    NowAvailable,
    AckOk,
    AckError,
}

/// A reply tagged with the reference of the request that produced it.
#[derive(Debug, Clone)]
pub struct TaggedReply {
    pub reference: CorrelationId,
    pub reply: TransportReply,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ActorError {
    #[error("session actor has shut down")]
    ActorShutdown,

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),
}

// ============================================================================
// Constants
// ============================================================================

/// Capacity of an actor's direct command channel.
pub const CHANNEL_CAPACITY: usize = 64;

/// Buffered frames beyond this are dropped oldest-first.
pub const MAX_BUFFERED_FRAMES: usize = 10_000;

/// Protocol version accepted at session creation.
pub const SUPPORTED_VSN: &str = "1.0.0";

/// Prefix for session ids.
pub const SESSION_ID_PREFIX: &str = "session_";
