//! Session management
//!
//! A [`Session`] is one connected peer: its identity, its delivery mode, the
//! outbound mailbox the router fills and the transport handle its write loop
//! drains into. The registry and both I/O loops share it through an `Arc`.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use uuid::Uuid;
use wschat_core::{Identity, Message};
use wschat_transport::TransportSender;

/// Session identifier
pub type SessionId = String;

/// Receiving half of a session mailbox, owned by the write loop
pub type Mailbox = mpsc::Receiver<Arc<Message>>;

/// Which registry a session lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionMode {
    /// Addressable by identity
    Private,
    /// Member of the broadcast group
    Broadcast,
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Registered,
    Active,
    /// Absorbing
    Terminated,
}

/// Why a message could not be placed in a mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The write loop is not keeping up
    Full,
    /// The mailbox was already closed
    Closed,
}

/// A connected client session
pub struct Session {
    /// Unique session ID
    pub id: SessionId,
    identity: Option<Identity>,
    mode: SessionMode,
    mailbox: Mutex<Option<mpsc::Sender<Arc<Message>>>>,
    mailbox_closed: watch::Sender<bool>,
    transport: Arc<dyn TransportSender>,
    state: Mutex<SessionState>,
    /// Session creation time
    pub created_at: Instant,
}

impl Session {
    /// Create a session in the `Connecting` state together with its mailbox receiver
    pub fn new(
        mode: SessionMode,
        identity: Option<Identity>,
        transport: Arc<dyn TransportSender>,
        mailbox_capacity: usize,
    ) -> (Self, Mailbox) {
        let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
        let session = Self {
            id: Uuid::new_v4().to_string(),
            identity: identity.filter(|i| !i.is_empty()),
            mode,
            mailbox: Mutex::new(Some(tx)),
            mailbox_closed: watch::channel(false).0,
            transport,
            state: Mutex::new(SessionState::Connecting),
            created_at: Instant::now(),
        };
        (session, rx)
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn transport(&self) -> &Arc<dyn TransportSender> {
        &self.transport
    }

    /// Identity when known, session ID otherwise
    pub fn label(&self) -> &str {
        self.identity.as_deref().unwrap_or(&self.id)
    }

    /// Move forward in the lifecycle. Returns false for transitions the state
    /// machine does not allow.
    pub fn advance(&self, next: SessionState) -> bool {
        let mut state = self.state.lock();
        let allowed = matches!(
            (*state, next),
            (SessionState::Connecting, SessionState::Registered)
                | (SessionState::Registered, SessionState::Active)
        ) || (next == SessionState::Terminated && *state != SessionState::Terminated);

        if allowed {
            *state = next;
        }
        allowed
    }

    /// Enter `Terminated`. Only the first caller gets `true`.
    pub fn terminate(&self) -> bool {
        self.advance(SessionState::Terminated)
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == SessionState::Terminated
    }

    /// Non-blocking enqueue into the mailbox
    pub fn try_deliver(&self, message: Arc<Message>) -> Result<(), DeliveryFailure> {
        let mailbox = self.mailbox.lock();
        let tx = mailbox.as_ref().ok_or(DeliveryFailure::Closed)?;
        tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryFailure::Full,
            TrySendError::Closed(_) => DeliveryFailure::Closed,
        })
    }

    /// Drop the mailbox sender so the write loop wakes up and exits.
    /// Returns true if the mailbox was open.
    pub fn close_mailbox(&self) -> bool {
        let was_open = self.mailbox.lock().take().is_some();
        self.mailbox_closed.send_replace(true);
        was_open
    }

    /// Resolves once the mailbox has been closed
    pub async fn mailbox_closed(&self) {
        let mut closed = self.mailbox_closed.subscribe();
        while !*closed.borrow_and_update() {
            if closed.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_mailbox_open(&self) -> bool {
        self.mailbox.lock().is_some()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("mode", &self.mode)
            .field("state", &self.state())
            .finish()
    }
}
