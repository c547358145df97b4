//! Request/reply correlation over the bus.
//!
//! Every HTTP request that needs an answer from a session mints a fresh
//! correlation reference, sends a tagged request, and waits on its own
//! mailbox until the matching reply arrives or a deadline passes. Replies
//! tagged with any other reference are drained and dropped; they belong to
//! requests that already returned.

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::bus::{PubSub, SubscriberId};
use crate::session::protocol::{SessionRequest, TaggedReply};
use crate::session::{ClientRef, CorrelationId, TransportReply};

use super::resolver::{self, SessionAddress};

/// Reply inbox for one HTTP request.
///
/// The sending half is cloned into every [`ClientRef`] this request hands
/// out; dropping the mailbox closes the channel and turns any late reply
/// into a no-op.
pub struct Mailbox {
    tx: mpsc::UnboundedSender<TaggedReply>,
    rx: mpsc::UnboundedReceiver<TaggedReply>,
}

impl Mailbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn client_ref(&self) -> ClientRef {
        ClientRef::new(self.tx.clone())
    }

    /// Wait until `deadline` for the reply matching `reference`.
    ///
    /// Returns None on deadline expiry. Replies carrying a stale reference
    /// are discarded without resetting the deadline.
    pub async fn recv(
        &mut self,
        reference: CorrelationId,
        deadline: Instant,
    ) -> Option<TransportReply> {
        loop {
            let tagged = tokio::time::timeout_at(deadline, self.rx.recv()).await.ok()??;
            if tagged.reference == reference {
                return Some(tagged.reply);
            }
        }
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

/// One correlated round trip: mint a reference, deliver, wait for the reply.
///
/// `make` builds the request around the reference and a client ref bound to
/// `mailbox`. Returns None when the session is unreachable or the deadline
/// passes first.
pub async fn call<F>(
    bus: &PubSub,
    address: &SessionAddress,
    from: Option<SubscriberId>,
    mailbox: &mut Mailbox,
    deadline: Instant,
    make: F,
) -> Option<TransportReply>
where
    F: FnOnce(ClientRef, CorrelationId) -> SessionRequest,
{
    let reference = CorrelationId::new();
    let request = make(mailbox.client_ref(), reference);

    if !resolver::deliver(bus, address, from, request).await {
        return None;
    }
    mailbox.recv(reference, deadline).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn recv_matches_reference() {
        let mut mailbox = Mailbox::new();
        let reference = CorrelationId::new();
        let client = mailbox.client_ref();
        client.send(reference, TransportReply::SubscribeAck);

        let reply = mailbox
            .recv(reference, Instant::now() + Duration::from_millis(50))
            .await;
        assert_eq!(reply, Some(TransportReply::SubscribeAck));
    }

    #[tokio::test]
    async fn recv_discards_stale_references() {
        let mut mailbox = Mailbox::new();
        let reference = CorrelationId::new();
        let client = mailbox.client_ref();
        client.send(CorrelationId::new(), TransportReply::AckError);
        client.send(reference, TransportReply::AckOk);

        let reply = mailbox
            .recv(reference, Instant::now() + Duration::from_millis(50))
            .await;
        assert_eq!(reply, Some(TransportReply::AckOk));
    }

    #[tokio::test]
    async fn recv_times_out_without_reply() {
        let mut mailbox = Mailbox::new();
        let reply = mailbox
            .recv(
                CorrelationId::new(),
                Instant::now() + Duration::from_millis(20),
            )
            .await;
        assert_eq!(reply, None);
    }

    #[tokio::test]
    async fn call_fails_fast_on_unreachable_session() {
        let bus = PubSub::new();
        let mut mailbox = Mailbox::new();
        let started = Instant::now();

        let reply = call(
            &bus,
            &SessionAddress::Topic("lp:nobody".into()),
            None,
            &mut mailbox,
            Instant::now() + Duration::from_secs(5),
            |client, reference| SessionRequest::Subscribe { client, reference },
        )
        .await;

        assert_eq!(reply, None);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
