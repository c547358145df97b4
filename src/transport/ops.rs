//! The long-poll protocol operations.
//!
//! [`Transport`] owns everything one endpoint instance needs to run the
//! protocol: its own identity, the token codec, the session registry, and
//! the bus. Each operation is one bounded correlated round trip against a
//! session; none of them can block past their deadline.

use std::time::Duration;

use rand::RngCore;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::bus::{PubSub, Subscription};
use crate::config::TransportConfig;
use crate::session::protocol::SessionRequest;
use crate::session::{CorrelationId, SessionRegistry, TransportReply};
use crate::token::{Claims, TokenCodec, TokenError};

use super::correlate::{self, Mailbox};
use super::envelope::Status;
use super::resolver::{self, SessionAddress};

/// One endpoint instance's view of the transport.
pub struct Transport {
    endpoint_id: String,
    bus: PubSub,
    registry: SessionRegistry,
    codec: TokenCodec,
    window: Duration,
    pubsub_timeout: Duration,
    max_age: Duration,
}

/// A verified, reachable session plus the per-request plumbing needed to
/// talk to it. Dropping it releases the topic subscription and closes the
/// mailbox, turning any late reply into a no-op.
pub struct ResumedSession {
    address: SessionAddress,
    /// Held for its unsubscribe-on-drop guard in topic mode.
    subscription: Option<Subscription>,
    mailbox: Mailbox,
}

/// Outcome of session creation.
pub enum CreateOutcome {
    /// The session refused the handshake.
    Forbidden,
    /// Session started; the client must re-poll with this credential.
    Created { token: String },
}

impl Transport {
    pub fn new(config: &TransportConfig, bus: PubSub, registry: SessionRegistry) -> Self {
        let secret = match &config.secret {
            Some(secret) => secret.clone().into_bytes(),
            None => {
                let mut bytes = vec![0u8; 32];
                rand::rng().fill_bytes(&mut bytes);
                bytes
            }
        };

        Self {
            endpoint_id: format!("endpoint_{}", Ulid::new()),
            bus,
            registry,
            codec: TokenCodec::new(secret),
            window: Duration::from_millis(config.window_ms),
            pubsub_timeout: Duration::from_millis(config.pubsub_timeout_ms),
            max_age: Duration::from_secs(config.max_age_secs),
        }
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    /// Verify a presented credential. Expired and tampered tokens are both
    /// just "no session" to the dispatcher.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.codec.verify(token, self.max_age)
    }

    /// Start a new session and mint its resumption credential.
    pub async fn create(
        &self,
        params: &std::collections::HashMap<String, String>,
    ) -> CreateOutcome {
        let (handle, topic) = match self.registry.create(params).await {
            Ok(created) => created,
            Err(error) => {
                warn!(%error, "session refused creation handshake");
                return CreateOutcome::Forbidden;
            }
        };

        let claims = Claims::new(&self.endpoint_id, handle.id(), &topic);
        let token = self.codec.sign(&claims);
        info!(session_id = %handle.id(), "session created, credential minted");
        CreateOutcome::Created { token }
    }

    /// Re-establish contact with the session a credential names.
    ///
    /// Resolves the address, subscribes in topic mode, and waits up to the
    /// pubsub timeout for a subscribe-ack. None means the session is gone.
    pub async fn resume(&self, claims: &Claims) -> Option<ResumedSession> {
        let address = resolver::resolve(claims, &self.endpoint_id, &self.registry);
        let subscription = resolver::subscribe(&self.bus, &address);
        let mut mailbox = Mailbox::new();

        let reply = correlate::call(
            &self.bus,
            &address,
            subscription.as_ref().map(|s| s.id()),
            &mut mailbox,
            Instant::now() + self.pubsub_timeout,
            |client, reference| SessionRequest::Subscribe { client, reference },
        )
        .await;

        match reply {
            Some(TransportReply::SubscribeAck) => Some(ResumedSession {
                address,
                subscription,
                mailbox,
            }),
            _ => {
                debug!(session_id = %claims.session, "session did not ack subscribe");
                None
            }
        }
    }

    /// Long-poll the session for buffered frames.
    ///
    /// A now-available reply means frames raced the session's empty-buffer
    /// answer; exactly one re-flush follows, waiting the full window again
    /// rather than the remainder.
    pub async fn listen(&self, session: &mut ResumedSession) -> (Status, Vec<String>) {
        match self.flush(session).await {
            Some(TransportReply::Messages(messages)) => (Status::Ok, messages),
            Some(TransportReply::NowAvailable) => self.reflush(session).await,
            _ => (Status::NoContent, Vec::new()),
        }
    }

    /// The second flush after a now-available signal. Only a messages reply
    /// ends this wait; anything else tagged with its reference is dropped
    /// and the wait holds until the full window elapses.
    async fn reflush(&self, session: &mut ResumedSession) -> (Status, Vec<String>) {
        let deadline = Instant::now() + self.window;
        let reference = CorrelationId::new();
        let request = SessionRequest::Flush {
            client: session.mailbox.client_ref(),
            reference,
        };

        let delivered = resolver::deliver(
            &self.bus,
            &session.address,
            session.subscription.as_ref().map(|s| s.id()),
            request,
        )
        .await;
        if !delivered {
            return (Status::NoContent, Vec::new());
        }

        loop {
            match session.mailbox.recv(reference, deadline).await {
                Some(TransportReply::Messages(messages)) => return (Status::Ok, messages),
                Some(_) => continue,
                None => return (Status::NoContent, Vec::new()),
            }
        }
    }

    /// Hand a client-sent frame to the session and wait for its ack.
    pub async fn publish(&self, session: &mut ResumedSession, body: String) -> Status {
        let reply = correlate::call(
            &self.bus,
            &session.address,
            session.subscription.as_ref().map(|s| s.id()),
            &mut session.mailbox,
            Instant::now() + self.window,
            |client, reference| SessionRequest::Dispatch {
                client,
                body,
                reference,
            },
        )
        .await;

        match reply {
            Some(TransportReply::AckOk) => Status::Ok,
            Some(TransportReply::AckError) => Status::Unauthorized,
            _ => Status::RequestTimeout,
        }
    }

    async fn flush(&self, session: &mut ResumedSession) -> Option<TransportReply> {
        correlate::call(
            &self.bus,
            &session.address,
            session.subscription.as_ref().map(|s| s.id()),
            &mut session.mailbox,
            Instant::now() + self.window,
            |client, reference| SessionRequest::Flush { client, reference },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::bus::BusPayload;

    fn transport(window_ms: u64, pubsub_timeout_ms: u64) -> Transport {
        let bus = PubSub::new();
        let registry = SessionRegistry::new(bus.clone(), Duration::from_secs(60));
        let config = TransportConfig {
            window_ms,
            pubsub_timeout_ms,
            ..TransportConfig::default()
        };
        Transport::new(&config, bus, registry)
    }

    async fn created_claims(transport: &Transport) -> Claims {
        match transport.create(&HashMap::new()).await {
            CreateOutcome::Created { token } => transport.verify(&token).unwrap(),
            CreateOutcome::Forbidden => panic!("creation refused"),
        }
    }

    #[tokio::test]
    async fn create_mints_verifiable_credential() {
        let transport = transport(100, 100);
        let claims = created_claims(&transport).await;
        assert_eq!(claims.endpoint, transport.endpoint_id());
        assert!(transport.registry.get(&claims.session).is_some());
    }

    #[tokio::test]
    async fn create_refuses_bad_handshake() {
        let transport = transport(100, 100);
        let mut params = HashMap::new();
        params.insert("vsn".to_string(), "0.9.0".to_string());
        assert!(matches!(
            transport.create(&params).await,
            CreateOutcome::Forbidden
        ));
    }

    #[tokio::test]
    async fn resume_acks_live_session() {
        let transport = transport(100, 100);
        let claims = created_claims(&transport).await;
        assert!(transport.resume(&claims).await.is_some());
    }

    #[tokio::test]
    async fn resume_fails_for_dead_session() {
        let transport = transport(100, 100);
        let claims = created_claims(&transport).await;
        transport.registry.remove(&claims.session);
        // Handle dropped with the registry entry; the actor exits and the
        // topic has no subscriber left.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(transport.resume(&claims).await.is_none());
    }

    #[tokio::test]
    async fn listen_returns_no_content_on_quiet_window() {
        let transport = transport(50, 100);
        let claims = created_claims(&transport).await;
        let mut session = transport.resume(&claims).await.unwrap();

        let (status, messages) = transport.listen(&mut session).await;
        assert_eq!(status, Status::NoContent);
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn listen_drains_buffered_frames() {
        let transport = transport(200, 100);
        let claims = created_claims(&transport).await;

        transport.bus.broadcast_from(
            &claims.topic,
            None,
            BusPayload::Frame(r#"{"room":"a","event":"e","payload":1}"#.into()),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut session = transport.resume(&claims).await.unwrap();
        let (status, messages) = transport.listen(&mut session).await;
        assert_eq!(status, Status::Ok);
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn listen_reflushes_on_race() {
        let transport = transport(200, 100);
        let claims = created_claims(&transport).await;
        let mut session = transport.resume(&claims).await.unwrap();

        let bus = transport.bus.clone();
        let topic = claims.topic.clone();
        tokio::spawn(async move {
            // Land after the flush parks but well inside the first window.
            tokio::time::sleep(Duration::from_millis(50)).await;
            bus.broadcast_from(&topic, None, BusPayload::Frame(r#"{"late":true}"#.into()));
        });

        let (status, messages) = transport.listen(&mut session).await;
        assert_eq!(status, Status::Ok);
        assert_eq!(messages, vec![r#"{"late":true}"#.to_string()]);
    }

    #[tokio::test]
    async fn second_wait_holds_through_spurious_now_available() {
        let transport = transport(200, 100);
        let topic = "lp:scripted";
        let mut actor_rx = transport.bus.subscribe(topic);
        // Foreign endpoint forces topic addressing at the scripted session.
        let claims = Claims::new("elsewhere", "session_scripted", topic);

        let drive = async {
            let mut flushes = 0;
            while let Some(payload) = actor_rx.rx.recv().await {
                let BusPayload::Request(request) = payload else {
                    continue;
                };
                match request {
                    SessionRequest::Subscribe { client, reference } => {
                        client.send(reference, TransportReply::SubscribeAck);
                    }
                    SessionRequest::Flush { client, reference } => {
                        flushes += 1;
                        client.send(reference, TransportReply::NowAvailable);
                        if flushes == 2 {
                            // The frames land a beat after the signal, well
                            // inside the second window.
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            client.send(
                                reference,
                                TransportReply::Messages(vec!["\"late\"".into()]),
                            );
                            break;
                        }
                    }
                    SessionRequest::Dispatch { .. } => {}
                }
            }
        };

        let poll = async {
            let mut session = transport.resume(&claims).await.unwrap();
            transport.listen(&mut session).await
        };

        let ((status, messages), _) = tokio::join!(poll, drive);
        assert_eq!(status, Status::Ok);
        assert_eq!(messages, vec!["\"late\"".to_string()]);
    }

    #[tokio::test]
    async fn late_ack_does_not_affect_next_request() {
        let transport = transport(80, 100);
        let topic = "lp:lateack";
        let mut actor_rx = transport.bus.subscribe(topic);
        let claims = Claims::new("elsewhere", "session_late", topic);

        let drive = async {
            let mut dispatches = 0;
            while let Some(payload) = actor_rx.rx.recv().await {
                let BusPayload::Request(request) = payload else {
                    continue;
                };
                match request {
                    SessionRequest::Subscribe { client, reference } => {
                        client.send(reference, TransportReply::SubscribeAck);
                    }
                    SessionRequest::Dispatch {
                        client, reference, ..
                    } => {
                        dispatches += 1;
                        if dispatches == 1 {
                            // Ack only after the publish window has passed.
                            tokio::time::sleep(Duration::from_millis(120)).await;
                            client.send(reference, TransportReply::AckOk);
                        } else {
                            client.send(reference, TransportReply::AckError);
                            break;
                        }
                    }
                    SessionRequest::Flush { .. } => {}
                }
            }
        };

        let poll = async {
            let mut session = transport.resume(&claims).await.unwrap();
            let first = transport.publish(&mut session, "{}".into()).await;
            let second = transport.publish(&mut session, "{}".into()).await;
            (first, second)
        };

        let ((first, second), _) = tokio::join!(poll, drive);
        assert_eq!(first, Status::RequestTimeout);
        // The abandoned first reference's ack is discarded, not mistaken
        // for the second request's reply.
        assert_eq!(second, Status::Unauthorized);
    }

    #[tokio::test]
    async fn publish_against_stopped_session_times_out() {
        let transport = transport(50, 100);
        let claims = created_claims(&transport).await;
        let mut session = transport.resume(&claims).await.unwrap();

        // Stop the actor out from under the resumed session.
        transport.registry.shutdown().await;

        let status = transport
            .publish(&mut session, r#"{"room":"a","event":"msg"}"#.into())
            .await;
        assert_eq!(status, Status::RequestTimeout);
    }
}
