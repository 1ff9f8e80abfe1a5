//! Offline queue.
//!
//! Commands issued while disconnected are captured under the offline cache
//! keys and never touch the live hangout list. On reconnect every queued
//! entry is resubmitted tagged `offline`, and the acknowledgement path prunes
//! the matching entry. A missing queue means "nothing to flush", not an
//! error.

use tracing::{debug, warn};

use crate::cache::{self, CacheError, CacheKeys, CacheStore};
use crate::model::{Command, DeliveryPhase, Hangout, Message, PendingCommand, UnixTimeMs, Username};

/// Upsert `draft` (and its message, if any) under the offline keys. Same
/// semantics as the optimistic write, different namespace.
pub fn persist_offline<C>(
    cache: &mut C,
    keys: &CacheKeys,
    draft: &Hangout,
    message: Option<&Message>,
    max_entries: usize,
) -> Result<(), CacheError>
where
    C: CacheStore + ?Sized,
{
    let key = keys.offline_hangouts();
    let mut table = cache::read_table(cache, &key)?;
    if !table.contains_key(&draft.peer) && table.len() >= max_entries {
        return Err(CacheError::LimitExceeded {
            what: "offline entries",
            max: max_entries,
        });
    }
    table.insert(draft.peer.clone(), draft.clone());
    cache::write_doc(cache, &key, &table)?;

    if let Some(message) = message {
        cache::append_message_once(cache, &keys.offline_messages(&draft.peer), message.clone())?;
    }

    debug!(peer = %draft.peer, state = %draft.state, "command queued offline");
    Ok(())
}

/// Rebuild the pending commands captured while disconnected, oldest first.
/// Entries whose state is not an acknowledgement tag cannot have originated
/// here and are skipped as corrupted.
pub fn collect_for_flush<C>(cache: &C, keys: &CacheKeys) -> Result<Vec<PendingCommand>, CacheError>
where
    C: CacheStore + ?Sized,
{
    let table = cache::read_table(cache, &keys.offline_hangouts())?;
    let mut commands = Vec::with_capacity(table.len());

    for hangout in table.values() {
        let Some(command) = Command::from_sender_state(hangout.state) else {
            warn!(peer = %hangout.peer, state = %hangout.state, "corrupted offline entry skipped");
            continue;
        };
        let text = cache::read_messages(cache, &keys.offline_messages(&hangout.peer))?
            .into_iter()
            .find(|m| m.timestamp == hangout.timestamp)
            .map(|m| m.text);

        let mut pending = PendingCommand::new(
            hangout.peer.clone(),
            hangout.email.clone(),
            command,
            text,
            hangout.timestamp,
        );
        pending.phase = DeliveryPhase::Queued;
        commands.push(pending);
    }

    commands.sort_by_key(|p| p.timestamp);
    Ok(commands)
}

/// Remove the offline entry settled by an acknowledgement, matched by
/// timestamp. Returns the queued message, if any, so the delivery pipeline
/// can promote it into the live conversation. Idempotent: a missing entry is
/// a no-op.
pub fn take_offline_entry<C>(
    cache: &mut C,
    keys: &CacheKeys,
    peer: &Username,
    timestamp: UnixTimeMs,
) -> Result<Option<Message>, CacheError>
where
    C: CacheStore + ?Sized,
{
    let key = keys.offline_hangouts();
    let mut table = cache::read_table(cache, &key)?;
    if table.get(peer).is_some_and(|h| h.timestamp == timestamp) {
        table.remove(peer);
        if table.is_empty() {
            cache.remove(&key)?;
        } else {
            cache::write_doc(cache, &key, &table)?;
        }
    }

    let messages_key = keys.offline_messages(peer);
    let mut messages = cache::read_messages(cache, &messages_key)?;
    let taken = messages
        .iter()
        .position(|m| m.timestamp == timestamp)
        .map(|i| messages.remove(i));
    if taken.is_some() {
        if messages.is_empty() {
            cache.remove(&messages_key)?;
        } else {
            cache::write_doc(cache, &messages_key, &messages)?;
        }
    }

    Ok(taken)
}
