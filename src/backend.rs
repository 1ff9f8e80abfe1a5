//! Remote backend boundary.
//!
//! The sync core never talks to the network directly; it goes through
//! [`RemoteBackend`]. Submissions are idempotent keyed by the command
//! timestamp, so a flush after reconnect may safely resubmit work the
//! backend already holds. [`MemoryBackend`] is the in-process reference
//! implementation used by tests; it delivers push notifications over the
//! same channel a transport would.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::classifier::Notification;
use crate::model::{Hangout, UnixTimeMs, Username};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend rejected the request: {0}")]
    Rejected(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Server-side operations the sync core depends on. One implementation per
/// transport; every method must tolerate retries.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Write both sides of one command atomically: the acknowledgement
    /// record under the issuer and the actionable record under the peer.
    /// The peer's record is delivered over their push channel when they are
    /// connected and parked for [`RemoteBackend::fetch_unread`] otherwise.
    /// `establish_link` is set for INVITE, which creates the relationship
    /// rather than updating it. Idempotent keyed by the shared timestamp.
    async fn write_relation_pair(
        &self,
        issuer: &Username,
        issuer_record: &Hangout,
        peer_record: &Hangout,
        establish_link: bool,
        offline: bool,
    ) -> Result<(), BackendError>;

    /// Park a hangout for a recipient who may be away; it is delivered by
    /// [`RemoteBackend::fetch_unread`] when they return.
    async fn queue_unread(&self, recipient: &Username, hangout: &Hangout)
        -> Result<(), BackendError>;

    /// Everything queued for `user` while away. Never consumes: entries stay
    /// until explicitly deleted.
    async fn fetch_unread(&self, user: &Username) -> Result<Vec<Hangout>, BackendError>;

    /// Drop one parked entry once the client has merged it.
    async fn delete_unread(
        &self,
        user: &Username,
        peer: &Username,
        timestamp: UnixTimeMs,
    ) -> Result<(), BackendError>;

    /// Open the push channel for `user`. The receiver yields classified
    /// notifications until the backend goes away.
    fn subscribe(&self, user: &Username) -> UnboundedReceiver<Notification>;
}

// ============================================================================
// Reference implementation
// ============================================================================

#[derive(Default)]
struct BackendState {
    /// Per-user relationship table, keyed by peer.
    relations: HashMap<Username, BTreeMap<Username, Hangout>>,
    /// Per-user parked hangouts, delivered on fetch.
    unread: HashMap<Username, Vec<Hangout>>,
    subscribers: HashMap<Username, Vec<UnboundedSender<Notification>>>,
}

/// In-process backend. Acknowledgements and peer deliveries are pushed
/// synchronously to whoever is subscribed, which makes two-client tests
/// deterministic.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<BackendState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns whether at least one live subscriber took the notification.
    fn push(state: &mut BackendState, user: &Username, notification: &Notification) -> bool {
        match state.subscribers.get_mut(user) {
            Some(senders) => {
                senders.retain(|tx| tx.send(notification.clone()).is_ok());
                !senders.is_empty()
            }
            None => false,
        }
    }

    fn park(state: &mut BackendState, recipient: &Username, hangout: &Hangout) {
        let queue = state.unread.entry(recipient.clone()).or_default();
        let exists = queue
            .iter()
            .any(|h| h.peer == hangout.peer && h.timestamp == hangout.timestamp);
        if !exists {
            queue.push(hangout.clone());
        }
    }

    /// The stored relationship record `user` holds for `peer`, if any.
    pub fn relation(&self, user: &Username, peer: &Username) -> Option<Hangout> {
        self.lock()
            .relations
            .get(user)
            .and_then(|table| table.get(peer))
            .cloned()
    }
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    async fn write_relation_pair(
        &self,
        issuer: &Username,
        issuer_record: &Hangout,
        peer_record: &Hangout,
        establish_link: bool,
        offline: bool,
    ) -> Result<(), BackendError> {
        let peer = issuer_record.peer.clone();
        let mut state = self.lock();

        if !establish_link {
            let linked = state
                .relations
                .get(issuer)
                .is_some_and(|table| table.contains_key(&peer));
            if !linked {
                return Err(BackendError::Rejected(format!(
                    "no relationship between {issuer} and {peer}"
                )));
            }
        }

        state
            .relations
            .entry(issuer.clone())
            .or_default()
            .insert(peer.clone(), issuer_record.clone());
        state
            .relations
            .entry(peer.clone())
            .or_default()
            .insert(issuer.clone(), peer_record.clone());

        debug!(%issuer, %peer, state = %issuer_record.state, offline, "relation pair written");

        let ack = if offline {
            Notification::OfflineAcknowledgement {
                hangout: issuer_record.clone(),
            }
        } else {
            Notification::Acknowledgement {
                hangout: issuer_record.clone(),
                offline: false,
            }
        };
        Self::push(&mut state, issuer, &ack);
        let delivered = Self::push(
            &mut state,
            &peer,
            &Notification::Hangout {
                hangout: peer_record.clone(),
            },
        );
        if !delivered {
            Self::park(&mut state, &peer, peer_record);
        }
        Ok(())
    }

    async fn queue_unread(
        &self,
        recipient: &Username,
        hangout: &Hangout,
    ) -> Result<(), BackendError> {
        // Resubmission after reconnect must not double the entry.
        Self::park(&mut self.lock(), recipient, hangout);
        Ok(())
    }

    async fn fetch_unread(&self, user: &Username) -> Result<Vec<Hangout>, BackendError> {
        Ok(self.lock().unread.get(user).cloned().unwrap_or_default())
    }

    async fn delete_unread(
        &self,
        user: &Username,
        peer: &Username,
        timestamp: UnixTimeMs,
    ) -> Result<(), BackendError> {
        let mut state = self.lock();
        if let Some(queue) = state.unread.get_mut(user) {
            queue.retain(|h| !(h.peer == *peer && h.timestamp == timestamp));
            if queue.is_empty() {
                state.unread.remove(user);
            }
        }
        Ok(())
    }

    fn subscribe(&self, user: &Username) -> UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock()
            .subscribers
            .entry(user.clone())
            .or_default()
            .push(tx);
        rx
    }
}
