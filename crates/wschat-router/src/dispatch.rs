//! Message routing
//!
//! Every session's read loop feeds one of two inbound channels (broadcast or
//! private). A single [`Dispatcher`] task drains both and makes one routing
//! decision per message. Delivery into a mailbox never waits: a full or
//! closed mailbox gets its session evicted instead.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use wschat_core::Message;

use crate::registry::Registry;
use crate::session::{DeliveryFailure, Session, SessionId};
use crate::stats::RouterStats;

/// A decoded message together with the session it came from
#[derive(Debug, Clone)]
pub struct Inbound {
    pub origin: SessionId,
    pub message: Message,
}

/// Cloneable handle used by read loops to reach the dispatcher
#[derive(Clone)]
pub struct InboundSender {
    broadcast: mpsc::Sender<Inbound>,
    private: mpsc::Sender<Inbound>,
}

/// The dispatcher is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherClosed;

impl InboundSender {
    /// Queue a message for routing, waiting for room if the dispatcher is
    /// behind.
    pub async fn submit(&self, inbound: Inbound) -> Result<(), DispatcherClosed> {
        let tx = if inbound.message.is_broadcast() {
            &self.broadcast
        } else {
            &self.private
        };
        tx.send(inbound).await.map_err(|_| DispatcherClosed)
    }
}

/// Routing decisions against a registry
#[derive(Clone)]
pub struct Hub {
    registry: Arc<Registry>,
    stats: Arc<RouterStats>,
}

impl Hub {
    pub fn new(registry: Arc<Registry>, stats: Arc<RouterStats>) -> Self {
        Self { registry, stats }
    }

    /// Route one message. Returns the number of mailboxes it was placed in.
    pub fn route(&self, inbound: Inbound) -> usize {
        let Inbound { origin, message } = inbound;
        let message = Arc::new(message);

        if message.is_broadcast() {
            self.broadcast(&origin, message)
        } else {
            self.deliver_private(message)
        }
    }

    fn broadcast(&self, origin: &SessionId, message: Arc<Message>) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();

        self.registry.for_each_session(|session| {
            if session.id == *origin {
                return;
            }
            match session.try_deliver(message.clone()) {
                Ok(()) => delivered += 1,
                Err(reason) => failed.push((session.clone(), reason)),
            }
        });

        // Evict outside the iteration: deregistering takes the registry lock
        for (session, reason) in failed {
            self.evict(&session, reason);
        }

        self.stats.record_delivered(delivered);
        debug!(origin = %origin, delivered, "broadcast routed");
        delivered
    }

    fn deliver_private(&self, message: Arc<Message>) -> usize {
        let receiver = message.receiver.clone();

        let Some(session) = self.registry.lookup(&receiver) else {
            self.stats.record_offline();
            warn!(
                receiver = %receiver,
                online = ?self.registry.online_identities(),
                "receiver offline, message dropped"
            );
            return 0;
        };

        match session.try_deliver(message) {
            Ok(()) => {
                self.stats.record_delivered(1);
                debug!(receiver = %receiver, session = %session.id, "private message routed");
                1
            }
            Err(reason) => {
                self.evict(&session, reason);
                0
            }
        }
    }

    /// Backpressure-as-disconnect. Closing the mailbox wakes the write loop,
    /// which tears the session down and closes the connection.
    fn evict(&self, session: &Session, reason: DeliveryFailure) {
        session.close_mailbox();
        if self.registry.deregister(session) {
            self.stats.record_evicted();
            warn!(
                session = %session.id,
                identity = session.label(),
                ?reason,
                "mailbox unavailable, session dropped"
            );
        }
    }
}

/// The single routing task
pub struct Dispatcher {
    hub: Hub,
    broadcast_rx: mpsc::Receiver<Inbound>,
    private_rx: mpsc::Receiver<Inbound>,
}

impl Dispatcher {
    /// Create a dispatcher and the sender half its read loops use
    pub fn new(hub: Hub, capacity: usize) -> (InboundSender, Self) {
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity.max(1));
        let (private_tx, private_rx) = mpsc::channel(capacity.max(1));

        let sender = InboundSender {
            broadcast: broadcast_tx,
            private: private_tx,
        };
        let dispatcher = Self {
            hub,
            broadcast_rx,
            private_rx,
        };
        (sender, dispatcher)
    }

    /// Route until every [`InboundSender`] is gone
    pub async fn run(self) {
        let Dispatcher {
            hub,
            mut broadcast_rx,
            mut private_rx,
        } = self;

        loop {
            tokio::select! {
                Some(inbound) = broadcast_rx.recv() => {
                    hub.route(inbound);
                }
                Some(inbound) = private_rx.recv() => {
                    hub.route(inbound);
                }
                else => break,
            }
        }

        debug!("dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionMode;
    use crate::testing::null_session;

    fn hub() -> (Hub, Arc<Registry>, Arc<RouterStats>) {
        let registry = Arc::new(Registry::default());
        let stats = Arc::new(RouterStats::new());
        (Hub::new(registry.clone(), stats.clone()), registry, stats)
    }

    fn from(origin: &Session, message: Message) -> Inbound {
        Inbound {
            origin: origin.id.clone(),
            message,
        }
    }

    #[test]
    fn test_private_reaches_only_receiver() {
        let (hub, registry, _) = hub();
        let (user1, _m1) = null_session(SessionMode::Private, Some("user1"), 4);
        let (user2, mut m2) = null_session(SessionMode::Private, Some("user2"), 4);
        let (user3, mut m3) = null_session(SessionMode::Private, Some("user3"), 4);
        for s in [&user1, &user2, &user3] {
            registry.register(s.clone()).unwrap();
        }

        assert_eq!(hub.route(from(&user1, Message::private("user2", "hi"))), 1);
        assert_eq!(m2.try_recv().unwrap().text, "hi");
        assert!(m3.try_recv().is_err());

        assert_eq!(hub.route(from(&user1, Message::private("user3", "yo"))), 1);
        assert_eq!(m3.try_recv().unwrap().text, "yo");
        assert!(m2.try_recv().is_err());
    }

    #[test]
    fn test_private_to_offline_receiver() {
        let (hub, registry, stats) = hub();
        let (user1, mut m1) = null_session(SessionMode::Private, Some("user1"), 4);
        registry.register(user1.clone()).unwrap();

        assert_eq!(hub.route(from(&user1, Message::private("ghost", "boo"))), 0);
        assert!(m1.try_recv().is_err());
        assert_eq!(stats.snapshot().offline, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_broadcast_skips_origin() {
        let (hub, registry, stats) = hub();
        let (c1, mut m1) = null_session(SessionMode::Broadcast, None, 4);
        let (c2, mut m2) = null_session(SessionMode::Broadcast, None, 4);
        let (c3, mut m3) = null_session(SessionMode::Broadcast, None, 4);
        for s in [&c1, &c2, &c3] {
            registry.register(s.clone()).unwrap();
        }

        assert_eq!(hub.route(from(&c1, Message::broadcast("hello all"))), 2);
        assert_eq!(m2.try_recv().unwrap().text, "hello all");
        assert_eq!(m3.try_recv().unwrap().text, "hello all");
        assert!(m1.try_recv().is_err());
        assert_eq!(stats.snapshot().delivered, 2);
    }

    #[test]
    fn test_broadcast_reaches_private_sessions() {
        let (hub, registry, _) = hub();
        let (member, _m) = null_session(SessionMode::Broadcast, None, 4);
        let (named, mut named_mailbox) = null_session(SessionMode::Private, Some("user1"), 4);
        let (other, mut other_mailbox) = null_session(SessionMode::Private, Some("user2"), 4);
        for s in [&member, &named, &other] {
            registry.register(s.clone()).unwrap();
        }

        assert_eq!(hub.route(from(&member, Message::broadcast("x"))), 2);
        assert_eq!(named_mailbox.try_recv().unwrap().text, "x");
        assert_eq!(other_mailbox.try_recv().unwrap().text, "x");

        // A named origin is skipped like any other
        assert_eq!(hub.route(from(&named, Message::broadcast("y"))), 2);
        assert!(named_mailbox.try_recv().is_err());
        assert_eq!(other_mailbox.try_recv().unwrap().text, "y");
    }

    #[test]
    fn test_broadcast_preserves_sender_order() {
        let (hub, registry, _) = hub();
        let (a, _ma) = null_session(SessionMode::Broadcast, None, 16);
        let (b, mut mb) = null_session(SessionMode::Broadcast, None, 16);
        registry.register(a.clone()).unwrap();
        registry.register(b.clone()).unwrap();

        for i in 0..10 {
            hub.route(from(&a, Message::broadcast(format!("m{}", i))));
        }
        for i in 0..10 {
            assert_eq!(mb.try_recv().unwrap().text, format!("m{}", i));
        }
    }

    #[test]
    fn test_full_mailbox_evicts_receiver() {
        let (hub, registry, stats) = hub();
        let (sender, _ms) = null_session(SessionMode::Private, Some("fast"), 4);
        let (slow, _slow_mailbox) = null_session(SessionMode::Private, Some("slow"), 1);
        registry.register(sender.clone()).unwrap();
        registry.register(slow.clone()).unwrap();

        assert_eq!(hub.route(from(&sender, Message::private("slow", "1"))), 1);
        // Mailbox is full now
        assert_eq!(hub.route(from(&sender, Message::private("slow", "2"))), 0);

        assert!(!slow.is_mailbox_open());
        assert!(registry.lookup("slow").is_none());
        assert_eq!(stats.snapshot().evicted, 1);

        // Later messages are treated as offline
        assert_eq!(hub.route(from(&sender, Message::private("slow", "3"))), 0);
        assert_eq!(stats.snapshot().offline, 1);
    }

    #[test]
    fn test_broadcast_evicts_dead_member_and_continues() {
        let (hub, registry, stats) = hub();
        let (origin, _mo) = null_session(SessionMode::Broadcast, None, 4);
        let (dead, dead_mailbox) = null_session(SessionMode::Broadcast, None, 4);
        let (alive, mut alive_mailbox) = null_session(SessionMode::Broadcast, None, 4);
        for s in [&origin, &dead, &alive] {
            registry.register(s.clone()).unwrap();
        }
        drop(dead_mailbox);

        assert_eq!(hub.route(from(&origin, Message::broadcast("still here"))), 1);
        assert_eq!(alive_mailbox.try_recv().unwrap().text, "still here");
        assert_eq!(registry.member_count(), 2);
        assert_eq!(stats.snapshot().evicted, 1);
    }

    #[tokio::test]
    async fn test_dispatcher_drains_both_streams() {
        let (hub, registry, _) = hub();
        let (a, _ma) = null_session(SessionMode::Broadcast, None, 8);
        let (b, mut mb) = null_session(SessionMode::Broadcast, None, 8);
        let (named, mut mn) = null_session(SessionMode::Private, Some("named"), 8);
        for s in [&a, &b, &named] {
            registry.register(s.clone()).unwrap();
        }

        let (tx, dispatcher) = Dispatcher::new(hub, 8);
        let task = tokio::spawn(dispatcher.run());

        tx.submit(from(&a, Message::broadcast("group"))).await.unwrap();
        tx.submit(from(&a, Message::private("named", "direct")))
            .await
            .unwrap();

        assert_eq!(mb.recv().await.unwrap().text, "group");

        // Order across the two streams is not fixed
        let mut named_got = vec![
            mn.recv().await.unwrap().text.clone(),
            mn.recv().await.unwrap().text.clone(),
        ];
        named_got.sort();
        assert_eq!(named_got, vec!["direct", "group"]);

        drop(tx);
        task.await.unwrap();
    }
}
