//! Session handle for delivering requests to a session actor.
//!
//! `SessionHandle` is a thin wrapper around an `mpsc::Sender<SessionRequest>`.
//! It is the Direct addressing mode: valid only within the process that
//! created the session, and cheap to clone.

use tokio::sync::mpsc;

use super::protocol::{ActorError, SessionRequest};

#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionRequest>,
    id: String,
}

impl SessionHandle {
    pub(crate) fn new(tx: mpsc::Sender<SessionRequest>, id: String) -> Self {
        Self { tx, id }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Deliver a request straight to the actor's mailbox.
    pub async fn send(&self, request: SessionRequest) -> Result<(), ActorError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| ActorError::ActorShutdown)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}
