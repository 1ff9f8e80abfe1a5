//! In-memory state container.
//!
//! [`update`] is a pure, synchronous transition function: no I/O happens
//! here. The surrounding pipelines mutate the cache and then mirror the
//! result into the model, always by replacing the relevant slice wholesale.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::HangoutTable;
use crate::model::{
    ConnectionState, DeliveryPhase, Hangout, Message, PendingCommand, Username,
};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub hangouts: HangoutTable,
    pub focused: Option<Hangout>,
    /// Conversation history of the focused peer.
    pub messages: Vec<Message>,
    pub unread: Vec<Hangout>,
    pub search_text: String,
    pub compose_text: String,
    pub readiness: ConnectionState,
    pub pending: Option<PendingCommand>,
    pub last_error: Option<String>,
}

impl Model {
    pub fn is_focused_on(&self, peer: &Username) -> bool {
        self.focused.as_ref().is_some_and(|h| &h.peer == peer)
    }

    /// Whether `peer` currently has us blocked, per the cached relationship.
    pub fn peer_is_blocking(&self, peer: &Username) -> bool {
        self.hangouts
            .get(peer)
            .is_some_and(|h| h.state == crate::model::RelationState::Blocker)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // Slice loads (cache hydration); each replaces its slice wholesale.
    HangoutsLoaded { hangouts: HangoutTable },
    MessagesLoaded { messages: Vec<Message> },
    UnreadLoaded { unread: Vec<Hangout> },

    // Selection & text input.
    HangoutSelected { hangout: Hangout },
    SelectionCleared,
    SearchChanged { text: String },
    ComposeChanged { text: String },

    // Outbound command lifecycle.
    CommandStarted { pending: PendingCommand },
    CommandPhaseChanged { phase: DeliveryPhase },
    CommandFulfilled,

    // Inbound merge, mirrored from the cache write.
    HangoutUpserted {
        hangout: Hangout,
        message: Option<Message>,
        unread: bool,
    },
    UnreadCleared { peer: Username },

    // Connection readiness & errors.
    ReadinessChanged { readiness: ConnectionState },
    ErrorRaised { message: String },
    ErrorCleared,
}

pub fn update(model: &mut Model, event: Event) {
    match event {
        Event::HangoutsLoaded { hangouts } => {
            model.hangouts = hangouts;
        }
        Event::MessagesLoaded { messages } => {
            model.messages = messages;
        }
        Event::UnreadLoaded { unread } => {
            model.unread = unread;
        }
        Event::HangoutSelected { hangout } => {
            model.focused = Some(hangout);
        }
        Event::SelectionCleared => {
            model.focused = None;
            model.messages = Vec::new();
        }
        Event::SearchChanged { text } => {
            model.search_text = text;
        }
        Event::ComposeChanged { text } => {
            model.compose_text = text;
        }
        Event::CommandStarted { pending } => {
            model.pending = Some(pending);
            model.compose_text = String::new();
        }
        Event::CommandPhaseChanged { phase } => {
            let Some(pending) = model.pending.as_mut() else {
                warn!(next = phase.state_name(), "phase change without a pending command");
                return;
            };
            if pending.phase.can_transition_to(phase) {
                pending.phase = phase;
            } else {
                warn!(
                    from = pending.phase.state_name(),
                    to = phase.state_name(),
                    "invalid delivery phase transition ignored"
                );
            }
        }
        Event::CommandFulfilled => {
            model.pending = None;
        }
        Event::HangoutUpserted {
            hangout,
            message,
            unread,
        } => {
            model
                .hangouts
                .insert(hangout.peer.clone(), hangout.clone());
            if model.is_focused_on(&hangout.peer) {
                model.focused = Some(hangout.clone());
                if let Some(message) = message {
                    let exists = model.messages.iter().any(|m| {
                        m.timestamp == message.timestamp
                            && m.author == message.author
                            && m.system == message.system
                    });
                    if !exists {
                        model.messages.push(message);
                    }
                }
            }
            if unread {
                // At most one unread entry per peer; whole-record replace.
                model.unread.retain(|h| h.peer != hangout.peer);
                model.unread.push(hangout);
            }
        }
        Event::UnreadCleared { peer } => {
            model.unread.retain(|h| h.peer != peer);
            if let Some(hangout) = model.hangouts.get_mut(&peer) {
                hangout.read = true;
            }
            if model.is_focused_on(&peer) {
                if let Some(focused) = model.focused.as_mut() {
                    focused.read = true;
                }
                for message in &mut model.messages {
                    message.read = true;
                }
            }
        }
        Event::ReadinessChanged { readiness } => {
            model.readiness = readiness;
        }
        Event::ErrorRaised { message } => {
            model.last_error = Some(message);
        }
        Event::ErrorCleared => {
            model.last_error = None;
        }
    }
}
