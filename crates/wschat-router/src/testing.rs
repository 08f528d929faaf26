//! Helpers for unit tests that need sessions without a network

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use wschat_transport::{Result, TransportSender};

use crate::session::{Mailbox, Session, SessionMode};

/// Transport sender that records frames instead of writing them
#[derive(Default)]
pub struct RecordingSender {
    pub frames: Mutex<Vec<String>>,
    pub closed: Mutex<bool>,
}

#[async_trait]
impl TransportSender for RecordingSender {
    async fn send(&self, text: String) -> Result<()> {
        self.frames.lock().push(text);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !*self.closed.lock()
    }

    async fn close(&self) -> Result<()> {
        *self.closed.lock() = true;
        Ok(())
    }
}

pub fn null_session(
    mode: SessionMode,
    identity: Option<&str>,
    mailbox_capacity: usize,
) -> (Arc<Session>, Mailbox) {
    let (session, mailbox) = Session::new(
        mode,
        identity.map(str::to_string),
        Arc::new(RecordingSender::default()),
        mailbox_capacity,
    );
    (Arc::new(session), mailbox)
}
