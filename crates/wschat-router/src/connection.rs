//! Session I/O loops
//!
//! Each registered session runs two tasks:
//!
//! - the read loop decodes inbound frames and submits them to the dispatcher
//! - the write loop drains the mailbox into the transport
//!
//! Whichever finishes first runs [`teardown`]; the second call is a no-op.

use std::sync::Arc;
use tracing::{debug, info, warn};
use wschat_core::{codec, DeliveryFormat};
use wschat_transport::{TransportEvent, TransportReceiver};

use crate::dispatch::{Inbound, InboundSender};
use crate::registry::Registry;
use crate::session::{Mailbox, Session, SessionState};
use crate::stats::RouterStats;

/// Everything a session's loops need from the router
pub(crate) struct SessionContext {
    pub registry: Arc<Registry>,
    pub stats: Arc<RouterStats>,
    pub inbound: InboundSender,
    pub delivery: DeliveryFormat,
    pub error_frames: bool,
}

/// Start both loops for a registered session
pub(crate) fn spawn_session<R>(
    session: Arc<Session>,
    receiver: R,
    mailbox: Mailbox,
    ctx: Arc<SessionContext>,
) where
    R: TransportReceiver + 'static,
{
    session.advance(SessionState::Active);

    tokio::spawn(read_loop(session.clone(), receiver, ctx.clone()));
    tokio::spawn(write_loop(session, mailbox, ctx));
}

async fn read_loop<R>(session: Arc<Session>, mut receiver: R, ctx: Arc<SessionContext>)
where
    R: TransportReceiver,
{
    while let Some(event) = receiver.recv().await {
        if session.is_terminated() {
            break;
        }

        match event {
            TransportEvent::Data(data) => match codec::decode(&data) {
                Ok(message) => {
                    let inbound = Inbound {
                        origin: session.id.clone(),
                        message,
                    };
                    if ctx.inbound.submit(inbound).await.is_err() {
                        debug!(session = %session.id, "dispatcher stopped");
                        break;
                    }
                }
                Err(e) => {
                    ctx.stats.record_malformed();
                    warn!(session = %session.id, identity = session.label(), "rejecting frame: {}", e);
                    if ctx.error_frames {
                        // Fire-and-forget
                        let _ = session.transport().send(codec::error_frame(&e)).await;
                    }
                    break;
                }
            },
            TransportEvent::Connected => {}
            TransportEvent::Disconnected { reason } => {
                debug!(session = %session.id, ?reason, "peer disconnected");
                break;
            }
            TransportEvent::Error(e) => {
                debug!(session = %session.id, "transport error: {}", e);
                break;
            }
        }
    }

    teardown(&session, &ctx).await;
}

async fn write_loop(session: Arc<Session>, mut mailbox: Mailbox, ctx: Arc<SessionContext>) {
    while let Some(message) = mailbox.recv().await {
        if !session.is_mailbox_open() {
            break;
        }

        let frame = match codec::encode_outbound(&message, ctx.delivery) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(session = %session.id, "dropping unencodable message: {}", e);
                continue;
            }
        };

        // An evicted session may be stuck behind a peer that stopped reading
        let sent = tokio::select! {
            sent = session.transport().send(frame) => sent,
            _ = session.mailbox_closed() => {
                debug!(session = %session.id, "mailbox closed during write");
                break;
            }
        };
        if let Err(e) = sent {
            debug!(session = %session.id, "write failed: {}", e);
            break;
        }
    }

    teardown(&session, &ctx).await;
}

/// Close the transport, close the mailbox and deregister. Safe to call from
/// both loops.
pub(crate) async fn teardown(session: &Session, ctx: &SessionContext) {
    if !session.terminate() {
        return;
    }

    session.close_mailbox();
    let _ = session.transport().close().await;
    ctx.registry.deregister(session);
    ctx.stats.record_closed();

    info!(
        session = %session.id,
        identity = session.label(),
        mode = ?session.mode(),
        "session closed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Dispatcher, Hub};
    use crate::session::SessionMode;
    use crate::testing::RecordingSender;
    use bytes::Bytes;
    use tokio::sync::mpsc;
    use wschat_core::Message;
    use wschat_transport::TransportSender;

    struct ChannelReceiver(mpsc::Receiver<TransportEvent>);

    #[async_trait::async_trait]
    impl TransportReceiver for ChannelReceiver {
        async fn recv(&mut self) -> Option<TransportEvent> {
            self.0.recv().await
        }
    }

    fn context(delivery: DeliveryFormat) -> (Arc<SessionContext>, Dispatcher) {
        let registry = Arc::new(Registry::default());
        let stats = Arc::new(RouterStats::new());
        let (inbound, dispatcher) = Dispatcher::new(Hub::new(registry.clone(), stats.clone()), 8);
        let ctx = Arc::new(SessionContext {
            registry,
            stats,
            inbound,
            delivery,
            error_frames: true,
        });
        (ctx, dispatcher)
    }

    fn session(
        mode: SessionMode,
        identity: &str,
        ctx: &SessionContext,
    ) -> (Arc<Session>, Arc<RecordingSender>, Mailbox) {
        let sender = Arc::new(RecordingSender::default());
        let (session, mailbox) = Session::new(mode, Some(identity.to_string()), sender.clone(), 4);
        let session = Arc::new(session);
        ctx.registry.register(session.clone()).unwrap();
        (session, sender, mailbox)
    }

    async fn settle<F: Fn() -> bool>(check: F) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_error_and_teardown() {
        let (ctx, _dispatcher) = context(DeliveryFormat::Text);
        let (session, sender, mailbox) = session(SessionMode::Private, "user1", &ctx);
        let (events, rx) = mpsc::channel(4);

        spawn_session(session.clone(), ChannelReceiver(rx), mailbox, ctx.clone());
        events
            .send(TransportEvent::Data(Bytes::from_static(b"{not json")))
            .await
            .unwrap();

        assert!(settle(|| session.is_terminated()).await);
        assert_eq!(
            sender.frames.lock().clone(),
            vec!["Error : Please provide 'Receiver' & 'Text' Field to start chat".to_string()]
        );
        assert!(*sender.closed.lock());
        assert!(ctx.registry.lookup("user1").is_none());
        assert_eq!(ctx.stats.snapshot().malformed, 1);
        assert_eq!(ctx.stats.snapshot().closed, 1);
    }

    #[tokio::test]
    async fn test_end_to_end_through_dispatcher() {
        let (ctx, dispatcher) = context(DeliveryFormat::Json);
        tokio::spawn(dispatcher.run());

        let (alice, _alice_out, alice_mailbox) = session(SessionMode::Private, "alice", &ctx);
        let (bob, bob_out, bob_mailbox) = session(SessionMode::Private, "bob", &ctx);
        let (alice_events, alice_rx) = mpsc::channel(4);
        let (_bob_events, bob_rx) = mpsc::channel(4);

        spawn_session(alice.clone(), ChannelReceiver(alice_rx), alice_mailbox, ctx.clone());
        spawn_session(bob.clone(), ChannelReceiver(bob_rx), bob_mailbox, ctx.clone());
        assert_eq!(bob.state(), SessionState::Active);

        let msg = Message::private("bob", "hi").with_sender("alice");
        let frame = codec::encode(&msg).unwrap();
        alice_events
            .send(TransportEvent::Data(Bytes::from(frame.clone())))
            .await
            .unwrap();

        assert!(settle(|| !bob_out.frames.lock().is_empty()).await);
        assert_eq!(bob_out.frames.lock()[0], frame);
    }

    #[tokio::test]
    async fn test_closed_mailbox_ends_session() {
        let (ctx, _dispatcher) = context(DeliveryFormat::Text);
        let (session, sender, mailbox) = session(SessionMode::Broadcast, "b1", &ctx);
        let (_events, rx) = mpsc::channel(4);

        spawn_session(session.clone(), ChannelReceiver(rx), mailbox, ctx.clone());
        session.close_mailbox();

        assert!(settle(|| session.is_terminated()).await);
        assert!(*sender.closed.lock());
        assert_eq!(ctx.registry.member_count(), 0);
    }

    /// Accepts nothing: every send waits forever
    #[derive(Default)]
    struct StalledSender {
        closed: parking_lot::Mutex<bool>,
    }

    #[async_trait::async_trait]
    impl TransportSender for StalledSender {
        async fn send(&self, _text: String) -> wschat_transport::Result<()> {
            std::future::pending().await
        }

        fn is_connected(&self) -> bool {
            !*self.closed.lock()
        }

        async fn close(&self) -> wschat_transport::Result<()> {
            *self.closed.lock() = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_eviction_tears_down_stalled_writer() {
        let (ctx, _dispatcher) = context(DeliveryFormat::Text);
        let transport = Arc::new(StalledSender::default());
        let (session, mailbox) = Session::new(
            SessionMode::Private,
            Some("slow".to_string()),
            transport.clone(),
            1,
        );
        let session = Arc::new(session);
        ctx.registry.register(session.clone()).unwrap();
        let (_events, rx) = mpsc::channel(4);
        spawn_session(session.clone(), ChannelReceiver(rx), mailbox, ctx.clone());

        // First message is picked up by the write loop and never finishes
        session
            .try_deliver(Arc::new(Message::private("slow", "1")))
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!session.is_terminated());

        // The router evicts by closing the mailbox
        session.close_mailbox();
        ctx.registry.deregister(&session);

        assert!(settle(|| session.is_terminated()).await);
        assert!(settle(|| *transport.closed.lock()).await);
        assert!(settle(|| ctx.stats.snapshot().closed == 1).await);
    }

    #[tokio::test]
    async fn test_teardown_runs_once() {
        let (ctx, _dispatcher) = context(DeliveryFormat::Text);
        let (session, _sender, _mailbox) = session(SessionMode::Private, "user1", &ctx);

        teardown(&session, &ctx).await;
        teardown(&session, &ctx).await;

        assert_eq!(ctx.stats.snapshot().closed, 1);
        assert!(ctx.registry.is_empty());
    }
}
