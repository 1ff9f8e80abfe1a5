//! Session orchestration.
//!
//! [`SyncClient`] owns one signed-in user's cache namespace, model and push
//! subscription, and wires the delivery, reception and offline pipelines
//! together. All session state lives here; nothing is global. The host
//! drives it: issue commands, feed it connection changes, and pump the
//! inbox.

use std::sync::Arc;

use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver};
use tracing::{info, warn};

use crate::backend::RemoteBackend;
use crate::cache::{self, CacheKeys, CacheStore};
use crate::classifier::Notification;
use crate::config::SyncConfig;
use crate::delivery;
use crate::model::{
    Command, ConnectionState, DeliveryPhase, Hangout, Identity, PendingCommand, RouteChange,
    UnixTimeMs, Username,
};
use crate::offline;
use crate::reception;
use crate::reducer::{self, Event, Model};
use crate::state_map::map_command;
use crate::SyncError;

pub struct SyncClient<C, B>
where
    C: CacheStore,
    B: RemoteBackend,
{
    identity: Identity,
    config: SyncConfig,
    cache: C,
    backend: Arc<B>,
    keys: CacheKeys,
    model: Model,
    inbox: Option<UnboundedReceiver<Notification>>,
}

impl<C, B> SyncClient<C, B>
where
    C: CacheStore,
    B: RemoteBackend,
{
    /// Build a session and hydrate the model from whatever the cache already
    /// holds, so the list is usable before the first connection.
    pub fn new(
        identity: Identity,
        config: SyncConfig,
        cache: C,
        backend: Arc<B>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let keys = CacheKeys::new(identity.username.clone());

        let mut model = Model::default();
        reducer::update(
            &mut model,
            Event::HangoutsLoaded {
                hangouts: cache::read_table(&cache, &keys.hangouts())?,
            },
        );
        let unread = cache::read_table(&cache, &keys.unread())?;
        reducer::update(
            &mut model,
            Event::UnreadLoaded {
                unread: unread.into_values().collect(),
            },
        );

        info!(user = %identity.username, "sync session created");
        Ok(Self {
            identity,
            config,
            cache,
            backend,
            keys,
            model,
            inbox: None,
        })
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    fn dispatch(&mut self, event: Event) {
        reducer::update(&mut self.model, event);
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Issue a command against `peer`. The optimistic write always succeeds
    /// locally; while disconnected it lands in the offline queue instead.
    /// Backend trouble is logged and left for the flush path, never surfaced
    /// as a command failure.
    pub async fn issue_command(
        &mut self,
        peer: Username,
        email: impl Into<String>,
        command: Command,
        text: Option<String>,
    ) -> Result<(), SyncError> {
        let pending = delivery::begin_command(
            peer,
            email,
            command,
            text,
            self.config.max_message_len,
            UnixTimeMs::now(),
        )?;
        let connected = self.model.readiness == ConnectionState::Open;
        let peer_is_blocking = self.model.peer_is_blocking(&pending.peer);

        self.dispatch(Event::CommandStarted {
            pending: pending.clone(),
        });

        let write = delivery::persist_optimistic(
            &mut self.cache,
            &self.keys,
            &pending,
            connected,
            peer_is_blocking,
            self.config.max_offline_entries,
        )?;

        if write.queued_offline {
            self.dispatch(Event::CommandPhaseChanged {
                phase: DeliveryPhase::Queued,
            });
        } else {
            self.dispatch(Event::HangoutUpserted {
                hangout: write.hangout.clone(),
                message: None,
                unread: false,
            });
        }
        if self.model.is_focused_on(&write.hangout.peer) {
            self.reload_focused_messages()?;
        }

        if connected {
            if let Err(e) = self.submit(&pending, false).await {
                warn!(peer = %pending.peer, error = %e, "submission failed, awaiting flush");
            }
        }
        Ok(())
    }

    /// Write both relationship records and park the peer's copy for delivery.
    async fn submit(&self, pending: &PendingCommand, offline: bool) -> Result<(), SyncError> {
        let pair = map_command(pending.command);
        let issuer_record = delivery::draft_from_pending(pending);
        let peer_record = Hangout {
            peer: self.identity.username.clone(),
            email: self.identity.email.clone(),
            state: pair.target,
            text: pending.text.clone(),
            timestamp: pending.timestamp,
            delivered: true,
            read: false,
        };

        self.backend
            .write_relation_pair(
                &self.identity.username,
                &issuer_record,
                &peer_record,
                pending.command == Command::Invite,
                offline,
            )
            .await?;
        Ok(())
    }

    /// Mark the in-flight command failed after the host gave up waiting.
    /// The optimistic write stays in place; the eventual acknowledgement,
    /// if it does arrive, still settles it.
    pub fn fail_pending(&mut self) {
        let Some(pending) = self.model.pending.clone() else {
            return;
        };
        warn!(
            peer = %pending.peer,
            command = %pending.command,
            timeout_ms = self.config.ack_timeout_ms,
            "command not acknowledged in time"
        );
        self.dispatch(Event::CommandPhaseChanged {
            phase: DeliveryPhase::Failed,
        });
        self.dispatch(Event::ErrorRaised {
            message: format!("{} to {} was not acknowledged", pending.command, pending.peer),
        });
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Subscribe to the push channel and go online.
    pub async fn connect(&mut self) -> Result<Vec<RouteChange>, SyncError> {
        self.inbox = Some(self.backend.subscribe(&self.identity.username));
        self.set_connection(ConnectionState::Open).await
    }

    /// Record the transport's readiness. Exactly one flush and unread drain
    /// run per transition into `Open`; repeated `Open` reports are no-ops.
    pub async fn set_connection(
        &mut self,
        readiness: ConnectionState,
    ) -> Result<Vec<RouteChange>, SyncError> {
        let was_open = self.model.readiness == ConnectionState::Open;
        self.dispatch(Event::ReadinessChanged { readiness });

        if readiness == ConnectionState::Open && !was_open {
            self.flush_offline().await?;
            return self.drain_unread().await;
        }
        Ok(Vec::new())
    }

    /// Resubmit everything queued while disconnected, oldest first. Entries
    /// are not removed here; the acknowledgement path prunes each one, so a
    /// drop before the ack leaves it queued for the next reconnect.
    async fn flush_offline(&mut self) -> Result<(), SyncError> {
        let queued = offline::collect_for_flush(&self.cache, &self.keys)?;
        if queued.is_empty() {
            return Ok(());
        }
        info!(count = queued.len(), "flushing offline queue");

        for pending in queued {
            let tracked = self
                .model
                .pending
                .as_ref()
                .is_some_and(|p| p.peer == pending.peer && p.timestamp == pending.timestamp);
            if tracked {
                self.dispatch(Event::CommandPhaseChanged {
                    phase: DeliveryPhase::Submitted,
                });
            }
            if let Err(e) = self.submit(&pending, true).await {
                warn!(peer = %pending.peer, error = %e, "offline flush submission failed");
            }
        }
        Ok(())
    }

    /// Pull everything peers did while we were away, merge it, and confirm
    /// each entry back to the backend.
    async fn drain_unread(&mut self) -> Result<Vec<RouteChange>, SyncError> {
        let parked = self.backend.fetch_unread(&self.identity.username).await?;
        if parked.is_empty() {
            return Ok(Vec::new());
        }

        let routes = self.handle_notification(Notification::UnreadHangouts {
            hangouts: parked.clone(),
        })?;
        for hangout in &parked {
            self.backend
                .delete_unread(&self.identity.username, &hangout.peer, hangout.timestamp)
                .await?;
        }
        Ok(routes)
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Drain whatever is sitting in the inbox without waiting.
    pub fn pump(&mut self) -> Result<Vec<RouteChange>, SyncError> {
        let mut routes = Vec::new();
        loop {
            let next = match self.inbox.as_mut() {
                Some(inbox) => inbox.try_recv(),
                None => return Ok(routes),
            };
            match next {
                Ok(notification) => routes.extend(self.handle_notification(notification)?),
                Err(TryRecvError::Empty) => return Ok(routes),
                Err(TryRecvError::Disconnected) => {
                    self.inbox = None;
                    self.dispatch(Event::ReadinessChanged {
                        readiness: ConnectionState::Closed,
                    });
                    return Ok(routes);
                }
            }
        }
    }

    /// Run one classified notification through the matching pipeline and
    /// mirror the result into the model.
    pub fn handle_notification(
        &mut self,
        notification: Notification,
    ) -> Result<Vec<RouteChange>, SyncError> {
        match notification {
            Notification::Acknowledgement { hangout, offline } => {
                self.settle_ack(&hangout, offline)
            }
            Notification::OfflineAcknowledgement { hangout } => self.settle_ack(&hangout, true),
            Notification::Hangout { hangout } => {
                let outcome = self.merge_inbound(&hangout)?;
                Ok(outcome.into_iter().collect())
            }
            Notification::UnreadHangouts { hangouts } => {
                let mut routes = Vec::new();
                for hangout in &hangouts {
                    routes.extend(self.merge_inbound(hangout)?);
                }
                Ok(routes)
            }
        }
    }

    fn settle_ack(
        &mut self,
        ack: &Hangout,
        offline: bool,
    ) -> Result<Vec<RouteChange>, SyncError> {
        let outcome = delivery::finalize_on_ack(&mut self.cache, &self.keys, ack, offline)?;

        self.dispatch(Event::HangoutUpserted {
            hangout: outcome.hangout.clone(),
            message: None,
            unread: false,
        });
        if self.model.is_focused_on(&outcome.hangout.peer) {
            self.reload_focused_messages()?;
        }

        let settled = self
            .model
            .pending
            .as_ref()
            .is_some_and(|p| p.matches_ack(&outcome.hangout));
        if settled {
            self.dispatch(Event::CommandPhaseChanged {
                phase: DeliveryPhase::Delivered,
            });
            self.dispatch(Event::CommandFulfilled);
            self.dispatch(Event::ErrorCleared);
        }

        Ok(outcome.route.into_iter().collect())
    }

    fn merge_inbound(&mut self, hangout: &Hangout) -> Result<Option<RouteChange>, SyncError> {
        let is_focused_peer = self.model.is_focused_on(&hangout.peer);
        let outcome = reception::merge_received_hangout(
            &mut self.cache,
            &self.keys,
            hangout,
            is_focused_peer,
            true,
            self.config.max_unread_entries,
        )?;

        self.dispatch(Event::HangoutUpserted {
            hangout: outcome.hangout.clone(),
            message: outcome.message.clone(),
            unread: outcome.queued_unread,
        });
        Ok(outcome.route)
    }

    // ========================================================================
    // Selection & reads
    // ========================================================================

    /// Focus the conversation with `peer`: clears their unread entry, marks
    /// the record and history read, and loads the history into the model.
    pub fn open_conversation(&mut self, peer: &Username) -> Result<(), SyncError> {
        let messages = reception::clear_unread(&mut self.cache, &self.keys, peer)?;
        self.dispatch(Event::UnreadCleared { peer: peer.clone() });

        if let Some(hangout) = self.model.hangouts.get(peer).cloned() {
            self.dispatch(Event::HangoutSelected { hangout });
        }
        self.dispatch(Event::MessagesLoaded { messages });
        Ok(())
    }

    pub fn close_conversation(&mut self) {
        self.dispatch(Event::SelectionCleared);
    }

    pub fn set_search_text(&mut self, text: String) {
        self.dispatch(Event::SearchChanged { text });
    }

    pub fn set_compose_text(&mut self, text: String) {
        self.dispatch(Event::ComposeChanged { text });
    }

    pub fn clear_error(&mut self) {
        self.dispatch(Event::ErrorCleared);
    }

    fn reload_focused_messages(&mut self) -> Result<(), SyncError> {
        let Some(peer) = self.model.focused.as_ref().map(|h| h.peer.clone()) else {
            return Ok(());
        };
        let messages = cache::read_messages(&self.cache, &self.keys.messages(&peer))?;
        self.dispatch(Event::MessagesLoaded { messages });
        Ok(())
    }
}
