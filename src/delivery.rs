//! Delivery pipeline (outbound).
//!
//! An outbound command is written locally first (optimistic), submitted to
//! the backend, and finalized when the matching acknowledgement comes back
//! over the push channel. While disconnected the optimistic write lands in
//! the offline queue instead of the live hangout list.

use tracing::{debug, info};

use crate::cache::{self, CacheError, CacheKeys, CacheStore};
use crate::model::{
    Command, CommandError, Hangout, Message, PendingCommand, RelationState, RouteChange,
    UnixTimeMs, Username, BLOCKED_BY_PEER_NOTICE, BLOCKED_PEER_NOTICE,
};
use crate::offline;
use crate::state_map::map_command;

/// Validate and record a new outbound command.
pub fn begin_command(
    peer: Username,
    email: impl Into<String>,
    command: Command,
    text: Option<String>,
    max_message_len: usize,
    now: UnixTimeMs,
) -> Result<PendingCommand, CommandError> {
    if let Some(text) = &text {
        if text.chars().count() > max_message_len {
            return Err(CommandError::MessageTooLong {
                max: max_message_len,
            });
        }
    }
    Ok(PendingCommand::new(peer, email, command, text, now))
}

/// The issuer-side hangout record for a pending command: sender state, not
/// yet delivered.
pub fn draft_from_pending(pending: &PendingCommand) -> Hangout {
    Hangout {
        peer: pending.peer.clone(),
        email: pending.email.clone(),
        state: map_command(pending.command).sender,
        text: pending.text.clone(),
        timestamp: pending.timestamp,
        delivered: false,
        read: true,
    }
}

fn message_from_pending(pending: &PendingCommand, author: &Username) -> Option<Message> {
    pending.text.as_ref().map(|text| Message {
        text: text.clone(),
        timestamp: pending.timestamp,
        delivered: false,
        read: true,
        author: author.clone(),
        system: false,
    })
}

fn system_notice(text: &str, timestamp: UnixTimeMs, author: &Username) -> Message {
    Message {
        text: text.to_string(),
        timestamp,
        delivered: false,
        read: true,
        author: author.clone(),
        system: true,
    }
}

/// What the optimistic write produced, for mirroring into the reducer.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimisticWrite {
    pub hangout: Hangout,
    pub message: Option<Message>,
    /// Local-only notice when the peer has us blocked.
    pub notice: Option<Message>,
    pub queued_offline: bool,
}

/// Upsert the draft into the hangout list, or into the offline queue while
/// disconnected. A blocking peer only gets a cosmetic local notice; the
/// optimistic write itself still happens.
pub fn persist_optimistic<C>(
    cache: &mut C,
    keys: &CacheKeys,
    pending: &PendingCommand,
    connected: bool,
    peer_is_blocking: bool,
    max_offline_entries: usize,
) -> Result<OptimisticWrite, CacheError>
where
    C: CacheStore + ?Sized,
{
    let draft = draft_from_pending(pending);
    let message = message_from_pending(pending, keys.user());

    if connected {
        cache::upsert_into_table(cache, &keys.hangouts(), draft.clone())?;
        if let Some(message) = &message {
            cache::append_message_once(cache, &keys.messages(&draft.peer), message.clone())?;
        }
    } else {
        offline::persist_offline(cache, keys, &draft, message.as_ref(), max_offline_entries)?;
    }

    let notice = if peer_is_blocking {
        let notice = system_notice(BLOCKED_BY_PEER_NOTICE, pending.timestamp, keys.user());
        cache::append_message_once(cache, &keys.messages(&draft.peer), notice.clone())?;
        Some(notice)
    } else {
        None
    };

    debug!(
        peer = %draft.peer,
        state = %draft.state,
        offline = !connected,
        "optimistic write applied"
    );

    Ok(OptimisticWrite {
        hangout: draft,
        message,
        notice,
        queued_offline: !connected,
    })
}

/// What the acknowledgement settled, for mirroring into the reducer.
#[derive(Clone, Debug, PartialEq)]
pub struct AckOutcome {
    pub hangout: Hangout,
    /// Offline-originated message promoted into the live conversation.
    pub promoted_message: Option<Message>,
    /// Local-only notice appended after a BLOCK acknowledgement.
    pub notice: Option<Message>,
    pub route: Option<RouteChange>,
}

/// Settle the hangout on the matching acknowledgement. Applying the same
/// acknowledgement twice leaves the cache unchanged after the first
/// application.
pub fn finalize_on_ack<C>(
    cache: &mut C,
    keys: &CacheKeys,
    ack: &Hangout,
    offline: bool,
) -> Result<AckOutcome, CacheError>
where
    C: CacheStore + ?Sized,
{
    let mut settled = ack.clone();
    settled.delivered = true;
    settled.read = true;
    cache::upsert_into_table(cache, &keys.hangouts(), settled.clone())?;

    let messages_key = keys.messages(&settled.peer);

    let promoted_message = if offline {
        match offline::take_offline_entry(cache, keys, &settled.peer, settled.timestamp)? {
            Some(mut message) => {
                message.delivered = true;
                cache::append_message_once(cache, &messages_key, message.clone())?;
                Some(message)
            }
            None => None,
        }
    } else {
        None
    };

    // Matched by timestamp; already-delivered entries stay untouched.
    cache::flip_delivered(cache, &messages_key, settled.timestamp)?;

    let notice = if settled.state == RelationState::Blocked {
        let notice = system_notice(BLOCKED_PEER_NOTICE, settled.timestamp, keys.user());
        cache::append_message_once(cache, &messages_key, notice.clone())?;
        Some(notice)
    } else {
        None
    };

    // The chat acknowledgement stays on the conversation screen; every other
    // state navigates to its own screen.
    let route = (settled.state != RelationState::Messaged)
        .then(|| RouteChange::for_state(settled.state));

    info!(peer = %settled.peer, state = %settled.state, offline, "command acknowledged");

    Ok(AckOutcome {
        hangout: settled,
        promoted_message,
        notice,
        route,
    })
}
