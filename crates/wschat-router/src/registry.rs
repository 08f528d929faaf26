//! Client registry
//!
//! Two maps behind one lock: private sessions keyed by identity and broadcast
//! members keyed by session ID. Broadcast delivery iterates while holding the
//! same lock that registration and deregistration take, so iteration never
//! sees a half-applied change.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use wschat_core::Identity;

use crate::error::{Result, RouterError};
use crate::session::{Session, SessionId, SessionMode, SessionState};

/// What happens when a private session connects with an identity that is
/// already registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateIdentityPolicy {
    /// The newer session takes the identity; the older one is torn down
    #[default]
    Replace,
    /// The newer session is refused
    Reject,
}

#[derive(Default)]
struct Maps {
    by_identity: HashMap<Identity, Arc<Session>>,
    members: HashMap<SessionId, Arc<Session>>,
}

impl Maps {
    fn len(&self) -> usize {
        self.by_identity.len() + self.members.len()
    }
}

/// Registry of live sessions
pub struct Registry {
    maps: Mutex<Maps>,
    policy: DuplicateIdentityPolicy,
    /// 0 = unlimited
    max_sessions: usize,
}

impl Registry {
    pub fn new(policy: DuplicateIdentityPolicy, max_sessions: usize) -> Self {
        Self {
            maps: Mutex::new(Maps::default()),
            policy,
            max_sessions,
        }
    }

    /// Check whether a session with this mode and identity would be accepted
    /// right now, without registering anything.
    pub fn check_admission(&self, mode: SessionMode, identity: Option<&str>) -> Result<()> {
        let maps = self.maps.lock();
        self.admit(&maps, mode, identity)
    }

    fn admit(&self, maps: &Maps, mode: SessionMode, identity: Option<&str>) -> Result<()> {
        let replacing = match mode {
            SessionMode::Private => {
                let identity = identity.ok_or(RouterError::MissingIdentity)?;
                let taken = maps.by_identity.contains_key(identity);
                if taken && self.policy == DuplicateIdentityPolicy::Reject {
                    return Err(RouterError::DuplicateIdentity(identity.to_string()));
                }
                taken
            }
            SessionMode::Broadcast => false,
        };

        if self.max_sessions > 0 && !replacing && maps.len() >= self.max_sessions {
            return Err(RouterError::CapacityExceeded(self.max_sessions));
        }

        Ok(())
    }

    /// Add a session. Returns the session it displaced, if any; the caller is
    /// responsible for tearing that one down.
    pub fn register(&self, session: Arc<Session>) -> Result<Option<Arc<Session>>> {
        let mut maps = self.maps.lock();
        self.admit(&maps, session.mode(), session.identity())?;

        if !session.advance(SessionState::Registered) {
            return Err(RouterError::SessionTerminated(session.id.clone()));
        }

        let displaced = match session.mode() {
            SessionMode::Private => {
                let identity = session
                    .identity()
                    .ok_or(RouterError::MissingIdentity)?
                    .to_string();
                maps.by_identity.insert(identity, session)
            }
            SessionMode::Broadcast => maps.members.insert(session.id.clone(), session),
        };

        Ok(displaced)
    }

    /// Remove a session. Absent sessions, and identities now held by a
    /// different session, are left alone.
    pub fn deregister(&self, session: &Session) -> bool {
        let mut maps = self.maps.lock();
        match session.mode() {
            SessionMode::Private => {
                let Some(identity) = session.identity() else {
                    return false;
                };
                let owned = maps
                    .by_identity
                    .get(identity)
                    .is_some_and(|current| current.id == session.id);
                if owned {
                    maps.by_identity.remove(identity);
                }
                owned
            }
            SessionMode::Broadcast => maps.members.remove(&session.id).is_some(),
        }
    }

    /// Find the private session registered under an identity
    pub fn lookup(&self, identity: &str) -> Option<Arc<Session>> {
        self.maps.lock().by_identity.get(identity).cloned()
    }

    /// Visit every broadcast member under the registry lock.
    ///
    /// `f` must not call back into the registry.
    pub fn for_each_member<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Session>),
    {
        let maps = self.maps.lock();
        for session in maps.members.values() {
            f(session);
        }
    }

    /// Visit every registered session, private and broadcast, under the
    /// registry lock.
    ///
    /// `f` must not call back into the registry.
    pub fn for_each_session<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Session>),
    {
        let maps = self.maps.lock();
        for session in maps.by_identity.values().chain(maps.members.values()) {
            f(session);
        }
    }

    /// Sorted identities of the private sessions
    pub fn online_identities(&self) -> Vec<Identity> {
        let mut identities: Vec<Identity> = self.maps.lock().by_identity.keys().cloned().collect();
        identities.sort();
        identities
    }

    pub fn private_count(&self) -> usize {
        self.maps.lock().by_identity.len()
    }

    pub fn member_count(&self) -> usize {
        self.maps.lock().members.len()
    }

    /// Total registered sessions
    pub fn len(&self) -> usize {
        self.maps.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DuplicateIdentityPolicy::default(), 0)
    }
}
