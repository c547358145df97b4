//! Session addressing.
//!
//! A session is reachable one of two ways: a direct in-process handle (fast
//! path, valid only on the endpoint that created it) or its private bus
//! topic (the durable fallback that works from any process holding the bus).
//! All addressing decisions live here; call sites never compare endpoint
//! identities themselves.

use crate::bus::{BusPayload, PubSub, SubscriberId, Subscription};
use crate::session::protocol::SessionRequest;
use crate::session::{SessionHandle, SessionRegistry};
use crate::token::Claims;

/// How to reach a session for the duration of one request.
#[derive(Debug, Clone)]
pub enum SessionAddress {
    /// In-process handle; valid only on the origin endpoint.
    Direct(SessionHandle),
    /// The session's private bus topic.
    Topic(String),
}

/// Decide the addressing mode for a verified credential.
///
/// Direct addressing requires both that the token was minted by this
/// endpoint instance and that the handle is still registered; anything else
/// falls back to the topic.
pub fn resolve(claims: &Claims, endpoint_id: &str, registry: &SessionRegistry) -> SessionAddress {
    if claims.endpoint == endpoint_id {
        if let Some(handle) = registry.get(&claims.session) {
            return SessionAddress::Direct(handle);
        }
    }
    SessionAddress::Topic(claims.topic.clone())
}

/// Subscribe the handler to the session's topic before any correlated
/// request. A no-op for direct addressing, where delivery is call-response.
pub fn subscribe(bus: &PubSub, address: &SessionAddress) -> Option<Subscription> {
    match address {
        SessionAddress::Direct(_) => None,
        SessionAddress::Topic(topic) => Some(bus.subscribe(topic)),
    }
}

/// Deliver a request to the session.
///
/// Returns false when the session is provably unreachable (closed handle or
/// a topic with no subscribers), letting the caller fall straight through to
/// its timeout branch.
pub async fn deliver(
    bus: &PubSub,
    address: &SessionAddress,
    from: Option<SubscriberId>,
    request: SessionRequest,
) -> bool {
    match address {
        SessionAddress::Direct(handle) => handle.send(request).await.is_ok(),
        SessionAddress::Topic(topic) => {
            bus.broadcast_from(topic, from, BusPayload::Request(request)) > 0
        }
    }
}
