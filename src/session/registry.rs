//! Session registry for managing actor lifecycles.
//!
//! The registry validates the creation handshake, spawns actors, resolves
//! ids to live handles for direct addressing, and shuts every actor down on
//! server exit. Idle actors remove their own entries (see the actor's idle
//! timeout), so a lookup miss means the session is only reachable by topic,
//! if at all.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::RngCore;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use ulid::Ulid;

use crate::bus::PubSub;

use super::actor::{ActorConfig, SessionActor};
use super::handle::SessionHandle;
use super::protocol::{ActorError, SESSION_ID_PREFIX, SUPPORTED_VSN};

// ============================================================================
// Session Registry
// ============================================================================

/// Registry for session actors. Thread-safe and cheap to clone.
#[derive(Clone)]
pub struct SessionRegistry {
    /// Session handles by id. Shared with actors so they can self-remove.
    handles: Arc<DashMap<String, SessionHandle>>,
    /// Actor task handles for graceful shutdown.
    task_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    bus: PubSub,
    idle_timeout: Duration,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SessionRegistry {
    pub fn new(bus: PubSub, idle_timeout: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            handles: Arc::new(DashMap::new()),
            task_handles: Arc::new(Mutex::new(Vec::new())),
            bus,
            idle_timeout,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Create a new session.
    ///
    /// Validates the handshake params, mints a fresh private topic, and
    /// spawns the actor subscribed to it. Returns the handle and the topic.
    pub async fn create(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<(SessionHandle, String), ActorError> {
        if let Some(vsn) = params.get("vsn") {
            if vsn != SUPPORTED_VSN {
                return Err(ActorError::UnsupportedVersion(vsn.clone()));
            }
        }

        let id = format!("{}{}", SESSION_ID_PREFIX, Ulid::new());
        let topic = private_topic();

        let config = ActorConfig {
            id: id.clone(),
            topic: topic.clone(),
            bus: self.bus.clone(),
            handles: self.handles.clone(),
            idle_timeout: self.idle_timeout,
        };

        let (tx, task_handle) = SessionActor::spawn(config, self.shutdown_rx.clone());
        let handle = SessionHandle::new(tx, id.clone());
        self.handles.insert(id.clone(), handle.clone());

        let mut guard = self.task_handles.lock().await;
        guard.retain(|h| !h.is_finished());
        guard.push(task_handle);

        info!(session_id = %id, topic = %topic, "session created");
        Ok((handle, topic))
    }

    /// Get a session handle by id.
    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.handles.get(id).map(|r| r.clone())
    }

    /// Remove a session handle from the registry.
    ///
    /// Returns true if a session was removed. When all clones of the handle
    /// are dropped, the actor shuts down naturally.
    pub fn remove(&self, id: &str) -> bool {
        self.handles.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Gracefully shut down all session actors.
    pub async fn shutdown(&self) {
        info!("shutting down session registry");

        if self.shutdown_tx.send(true).is_err() {
            warn!("failed to send shutdown signal");
            return;
        }

        let task_handles = {
            let mut handles = self.task_handles.lock().await;
            std::mem::take(&mut *handles)
        };

        for task_handle in task_handles {
            if let Err(e) = task_handle.await {
                warn!(error = ?e, "actor task panicked during shutdown");
            }
        }

        info!("session registry shutdown complete");
    }
}

/// Cryptographically random private topic name.
fn private_topic() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    format!("lp:{}", hex::encode(bytes))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> SessionRegistry {
        SessionRegistry::new(PubSub::new(), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn create_returns_handle_and_topic() {
        let registry = test_registry();

        let (handle, topic) = registry.create(&HashMap::new()).await.unwrap();
        assert!(handle.id().starts_with(SESSION_ID_PREFIX));
        assert!(topic.starts_with("lp:"));
        assert!(registry.get(handle.id()).is_some());

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn create_validates_protocol_version() {
        let registry = test_registry();

        let ok = HashMap::from([("vsn".to_string(), SUPPORTED_VSN.to_string())]);
        assert!(registry.create(&ok).await.is_ok());

        let bad = HashMap::from([("vsn".to_string(), "9.9.9".to_string())]);
        assert!(matches!(
            registry.create(&bad).await,
            Err(ActorError::UnsupportedVersion(v)) if v == "9.9.9"
        ));

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn topics_are_unique() {
        let registry = test_registry();

        let (_, t1) = registry.create(&HashMap::new()).await.unwrap();
        let (_, t2) = registry.create(&HashMap::new()).await.unwrap();
        assert_ne!(t1, t2);

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn remove_session() {
        let registry = test_registry();

        let (handle, _) = registry.create(&HashMap::new()).await.unwrap();
        let id = handle.id().to_string();

        assert!(registry.remove(&id));
        assert!(registry.get(&id).is_none());
        assert!(!registry.remove(&id));

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_actors() {
        let registry = test_registry();
        let bus = registry.bus.clone();

        let (_, topic) = registry.create(&HashMap::new()).await.unwrap();
        assert_eq!(bus.subscriber_count(&topic), 1);

        registry.shutdown().await;
        assert_eq!(bus.subscriber_count(&topic), 0);
    }
}
