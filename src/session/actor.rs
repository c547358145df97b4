//! Per-session actor.
//!
//! Each session gets a dedicated tokio task that owns the frame buffer, the
//! parked-flush slot, and the session's room memberships. All interaction is
//! message passing; no locks are held across await points.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::bus::{BusPayload, PubSub, TopicGuard};
use crate::relay::{self, Frame};

use super::handle::SessionHandle;
use super::protocol::{
    CHANNEL_CAPACITY, ClientRef, CorrelationId, MAX_BUFFERED_FRAMES, SessionRequest,
    TransportReply,
};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for spawning a new actor.
pub struct ActorConfig {
    pub id: String,
    /// The session's private bus topic.
    pub topic: String,
    pub bus: PubSub,
    /// Registry map, so an idle actor can remove its own entry.
    pub handles: Arc<DashMap<String, SessionHandle>>,
    /// Session stops after this long without subscribe/flush activity.
    pub idle_timeout: Duration,
}

// ============================================================================
// Session Actor
// ============================================================================

pub struct SessionActor {
    id: String,
    topic: String,

    /// Pre-serialized frames awaiting the next flush.
    buffer: VecDeque<String>,
    /// A flush that found the buffer empty and is waiting for frames.
    parked_flush: Option<(ClientRef, CorrelationId)>,

    /// Room memberships: room name to the bus attachment for its topic.
    rooms: HashMap<String, TopicGuard>,

    bus: PubSub,
    /// Inlet shared by the private topic and every room attachment.
    bus_tx: mpsc::UnboundedSender<BusPayload>,
    bus_rx: mpsc::UnboundedReceiver<BusPayload>,
    _topic_guard: TopicGuard,

    command_rx: mpsc::Receiver<SessionRequest>,
    shutdown_rx: watch::Receiver<bool>,

    handles: Arc<DashMap<String, SessionHandle>>,
    idle_timeout: Duration,
    last_activity: Instant,
}

impl SessionActor {
    /// Spawn an actor, subscribed to its private topic before any command
    /// can arrive. Returns the command sender and the task handle.
    pub fn spawn(
        config: ActorConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (mpsc::Sender<SessionRequest>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (bus_tx, bus_rx) = mpsc::unbounded_channel();
        let topic_guard = config.bus.attach(&config.topic, bus_tx.clone());

        let actor = Self {
            id: config.id,
            topic: config.topic,
            buffer: VecDeque::new(),
            parked_flush: None,
            rooms: HashMap::new(),
            bus: config.bus,
            bus_tx,
            bus_rx,
            _topic_guard: topic_guard,
            command_rx: rx,
            shutdown_rx,
            handles: config.handles,
            idle_timeout: config.idle_timeout,
            last_activity: Instant::now(),
        };

        let handle = tokio::spawn(actor.run());
        (tx, handle)
    }

    async fn run(mut self) {
        debug!(session_id = %self.id, topic = %self.topic, "session actor started");

        loop {
            let idle_deadline = self.last_activity + self.idle_timeout;

            // Biased so frames already on the bus are visible to a flush
            // that was queued after them.
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        debug!(session_id = %self.id, "session actor received shutdown signal");
                        break;
                    }
                }

                payload = self.bus_rx.recv() => {
                    match payload {
                        Some(BusPayload::Request(request)) => self.handle_request(request),
                        Some(BusPayload::Frame(frame)) => self.buffer_frame(frame),
                        None => break,
                    }
                }

                request = self.command_rx.recv() => {
                    match request {
                        Some(request) => self.handle_request(request),
                        None => {
                            debug!(session_id = %self.id, "all handles dropped, shutting down");
                            break;
                        }
                    }
                }

                _ = tokio::time::sleep_until(idle_deadline) => {
                    debug!(session_id = %self.id, "session idle timeout");
                    break;
                }
            }
        }

        self.handles.remove(&self.id);
        debug!(session_id = %self.id, "session actor stopped");
    }

    fn handle_request(&mut self, request: SessionRequest) {
        self.last_activity = Instant::now();

        match request {
            SessionRequest::Subscribe { client, reference } => {
                client.send(reference, TransportReply::SubscribeAck);
            }
            SessionRequest::Flush { client, reference } => self.flush(client, reference),
            SessionRequest::Dispatch {
                client,
                body,
                reference,
            } => {
                let reply = if self.dispatch(&body) {
                    TransportReply::AckOk
                } else {
                    TransportReply::AckError
                };
                client.send(reference, reply);
            }
        }
    }

    /// Drain the buffer, or park the flush until a frame arrives.
    ///
    /// Only the most recent flush is parked; an older parked flush belongs
    /// to a request that has moved on, and its reference is stale.
    fn flush(&mut self, client: ClientRef, reference: CorrelationId) {
        if self.buffer.is_empty() {
            self.parked_flush = Some((client, reference));
        } else {
            let messages: Vec<String> = self.buffer.drain(..).collect();
            client.send(reference, TransportReply::Messages(messages));
        }
    }

    /// Buffer a frame for the next flush, waking a parked flush if any.
    fn buffer_frame(&mut self, frame: String) {
        if self.buffer.len() >= MAX_BUFFERED_FRAMES {
            warn!(session_id = %self.id, "frame buffer full, dropping oldest");
            self.buffer.pop_front();
        }
        self.buffer.push_back(frame);

        if let Some((client, reference)) = self.parked_flush.take() {
            client.send(reference, TransportReply::NowAvailable);
        }
    }

    /// Handle a dispatched frame body. Returns false for anything the
    /// session refuses: malformed frames or broadcasts to unjoined rooms.
    fn dispatch(&mut self, body: &str) -> bool {
        let frame = match Frame::parse(body) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(session_id = %self.id, error = %e, "rejecting dispatched frame");
                return false;
            }
        };

        match frame.event.as_str() {
            relay::JOIN_EVENT => {
                // Drop any existing membership first; overlapping attachments
                // would deliver room frames twice.
                self.rooms.remove(&frame.room);
                let guard = self
                    .bus
                    .attach(&relay::room_topic(&frame.room), self.bus_tx.clone());
                self.rooms.insert(frame.room, guard);
                true
            }
            relay::LEAVE_EVENT => {
                self.rooms.remove(&frame.room);
                true
            }
            _ => match self.rooms.get(&frame.room) {
                Some(guard) => {
                    self.bus.broadcast_from(
                        &relay::room_topic(&frame.room),
                        Some(guard.id()),
                        BusPayload::Frame(frame.encode()),
                    );
                    true
                }
                None => {
                    debug!(session_id = %self.id, room = %frame.room, "broadcast to unjoined room");
                    false
                }
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
