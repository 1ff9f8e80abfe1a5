//! Reception pipeline (inbound).
//!
//! Peer-initiated notifications merge into the cached hangout list. Whether
//! the merge raises an unread badge, appends to the open conversation, or
//! navigates depends only on the received state tag and on whether the
//! conversation with that peer is currently focused.

use tracing::{debug, warn};

use crate::cache::{self, CacheError, CacheKeys, CacheStore};
use crate::model::{Hangout, Message, RelationState, RouteChange, Username};

/// What an inbound merge produced, for mirroring into the reducer.
#[derive(Clone, Debug, PartialEq)]
pub struct ReceptionOutcome {
    pub hangout: Hangout,
    /// Chat text appended to the focused conversation, if any.
    pub message: Option<Message>,
    /// Whether the merge landed in the unread queue.
    pub queued_unread: bool,
    pub route: Option<RouteChange>,
}

/// Merge one peer-initiated hangout into the cache.
///
/// The record is marked read only while its conversation is focused. Unread
/// entries are capped: past `max_unread` the hangout still merges, only the
/// badge is skipped.
pub fn merge_received_hangout<C>(
    cache: &mut C,
    keys: &CacheKeys,
    incoming: &Hangout,
    is_focused_peer: bool,
    mark_unread: bool,
    max_unread: usize,
) -> Result<ReceptionOutcome, CacheError>
where
    C: CacheStore + ?Sized,
{
    let mut merged = incoming.clone();
    merged.delivered = true;
    merged.read = is_focused_peer;
    cache::upsert_into_table(cache, &keys.hangouts(), merged.clone())?;

    let message = match &merged.text {
        Some(text) => {
            let message = Message {
                text: text.clone(),
                timestamp: merged.timestamp,
                delivered: true,
                read: is_focused_peer,
                author: merged.peer.clone(),
                system: false,
            };
            cache::append_message_once(cache, &keys.messages(&merged.peer), message.clone())?;
            Some(message)
        }
        None => None,
    };

    let queued_unread = if mark_unread && !is_focused_peer && merged.state.raises_unread() {
        queue_unread_entry(cache, keys, &merged, max_unread)?
    } else {
        false
    };

    // A peer action against the open conversation navigates immediately,
    // except for plain chat which stays in place.
    let route = (is_focused_peer && merged.state != RelationState::Messanger)
        .then(|| RouteChange::for_state(merged.state));

    debug!(
        peer = %merged.peer,
        state = %merged.state,
        unread = queued_unread,
        "inbound hangout merged"
    );

    Ok(ReceptionOutcome {
        hangout: merged,
        message,
        queued_unread,
        route,
    })
}

fn queue_unread_entry<C>(
    cache: &mut C,
    keys: &CacheKeys,
    hangout: &Hangout,
    max_unread: usize,
) -> Result<bool, CacheError>
where
    C: CacheStore + ?Sized,
{
    let key = keys.unread();
    let mut table = cache::read_table(cache, &key)?;
    if !table.contains_key(&hangout.peer) && table.len() >= max_unread {
        warn!(peer = %hangout.peer, max = max_unread, "unread queue full, badge skipped");
        return Ok(false);
    }
    table.insert(hangout.peer.clone(), hangout.clone());
    cache::write_doc(cache, &key, &table)?;
    Ok(true)
}

/// Merge a batch of unread hangouts delivered at once, typically right after
/// the push channel opens. Returns the outcome per entry, in batch order.
pub fn merge_unread_batch<C>(
    cache: &mut C,
    keys: &CacheKeys,
    hangouts: &[Hangout],
    focused: Option<&Username>,
    max_unread: usize,
) -> Result<Vec<ReceptionOutcome>, CacheError>
where
    C: CacheStore + ?Sized,
{
    let mut outcomes = Vec::with_capacity(hangouts.len());
    for hangout in hangouts {
        let is_focused_peer = focused == Some(&hangout.peer);
        outcomes.push(merge_received_hangout(
            cache,
            keys,
            hangout,
            is_focused_peer,
            true,
            max_unread,
        )?);
    }
    Ok(outcomes)
}

/// Drop the unread entry for `peer` and mark its record and conversation
/// read. Returns the conversation after the flip. Clearing a peer with no
/// unread entry is a no-op on the queue.
pub fn clear_unread<C>(
    cache: &mut C,
    keys: &CacheKeys,
    peer: &Username,
) -> Result<Vec<Message>, CacheError>
where
    C: CacheStore + ?Sized,
{
    let key = keys.unread();
    let mut table = cache::read_table(cache, &key)?;
    if table.remove(peer).is_some() {
        if table.is_empty() {
            cache.remove(&key)?;
        } else {
            cache::write_doc(cache, &key, &table)?;
        }
    }

    let hangouts_key = keys.hangouts();
    let mut hangouts = cache::read_table(cache, &hangouts_key)?;
    if let Some(hangout) = hangouts.get_mut(peer) {
        if !hangout.read {
            hangout.read = true;
            cache::write_doc(cache, &hangouts_key, &hangouts)?;
        }
    }

    cache::mark_all_read(cache, &keys.messages(peer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::model::UnixTimeMs;

    fn user(name: &str) -> Username {
        Username::new(name).unwrap()
    }

    fn keys() -> CacheKeys {
        CacheKeys::new(user("alice"))
    }

    fn incoming(peer: &str, state: RelationState, text: Option<&str>, ts: u64) -> Hangout {
        Hangout {
            peer: user(peer),
            email: format!("{peer}@mail.test"),
            state,
            text: text.map(String::from),
            timestamp: UnixTimeMs(ts),
            delivered: true,
            read: false,
        }
    }

    #[test]
    fn unfocused_merge_raises_unread() {
        let mut cache = MemoryCache::new();
        let keys = keys();
        let h = incoming("bob", RelationState::Inviter, None, 10);

        let outcome = merge_received_hangout(&mut cache, &keys, &h, false, true, 16).unwrap();
        assert!(outcome.queued_unread);
        assert!(!outcome.hangout.read);
        assert!(outcome.route.is_none());

        let unread = cache::read_table(&cache, &keys.unread()).unwrap();
        assert!(unread.contains_key(&user("bob")));
    }

    #[test]
    fn focused_merge_is_read_and_routes() {
        let mut cache = MemoryCache::new();
        let keys = keys();
        let h = incoming("bob", RelationState::Blocker, None, 10);

        let outcome = merge_received_hangout(&mut cache, &keys, &h, true, true, 16).unwrap();
        assert!(!outcome.queued_unread);
        assert!(outcome.hangout.read);
        assert_eq!(outcome.route.unwrap().feature_route, "/BLOCKER");
        assert!(!cache.contains(&keys.unread()));
    }

    #[test]
    fn focused_chat_appends_without_routing() {
        let mut cache = MemoryCache::new();
        let keys = keys();
        let h = incoming("bob", RelationState::Messanger, Some("yo"), 10);

        let outcome = merge_received_hangout(&mut cache, &keys, &h, true, true, 16).unwrap();
        assert!(outcome.route.is_none());
        let message = outcome.message.unwrap();
        assert_eq!(message.author, user("bob"));
        assert!(message.read);

        let messages = cache::read_messages(&cache, &keys.messages(&user("bob"))).unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn non_actionable_states_never_raise_unread() {
        let mut cache = MemoryCache::new();
        let keys = keys();
        let h = incoming("bob", RelationState::Decliner, None, 10);

        let outcome = merge_received_hangout(&mut cache, &keys, &h, false, true, 16).unwrap();
        assert!(!outcome.queued_unread);
        assert!(!cache.contains(&keys.unread()));

        // The relationship record itself still merged.
        let table = cache::read_table(&cache, &keys.hangouts()).unwrap();
        assert_eq!(table[&user("bob")].state, RelationState::Decliner);
    }

    #[test]
    fn repeated_merge_is_idempotent() {
        let mut cache = MemoryCache::new();
        let keys = keys();
        let h = incoming("bob", RelationState::Messanger, Some("yo"), 10);

        merge_received_hangout(&mut cache, &keys, &h, false, true, 16).unwrap();
        merge_received_hangout(&mut cache, &keys, &h, false, true, 16).unwrap();

        let messages = cache::read_messages(&cache, &keys.messages(&user("bob"))).unwrap();
        assert_eq!(messages.len(), 1);
        let unread = cache::read_table(&cache, &keys.unread()).unwrap();
        assert_eq!(unread.len(), 1);
    }

    #[test]
    fn unread_overflow_merges_without_badge() {
        let mut cache = MemoryCache::new();
        let keys = keys();
        let first = incoming("bob", RelationState::Inviter, None, 10);
        merge_received_hangout(&mut cache, &keys, &first, false, true, 1).unwrap();

        let second = incoming("eve", RelationState::Inviter, None, 11);
        let outcome = merge_received_hangout(&mut cache, &keys, &second, false, true, 1).unwrap();
        assert!(!outcome.queued_unread);

        let table = cache::read_table(&cache, &keys.hangouts()).unwrap();
        assert!(table.contains_key(&user("eve")));
        let unread = cache::read_table(&cache, &keys.unread()).unwrap();
        assert_eq!(unread.len(), 1);
    }

    #[test]
    fn batch_respects_focus() {
        let mut cache = MemoryCache::new();
        let keys = keys();
        let batch = vec![
            incoming("bob", RelationState::Messanger, Some("a"), 10),
            incoming("eve", RelationState::Inviter, None, 11),
        ];

        let focused = user("bob");
        let outcomes =
            merge_unread_batch(&mut cache, &keys, &batch, Some(&focused), 16).unwrap();
        assert!(!outcomes[0].queued_unread);
        assert!(outcomes[0].hangout.read);
        assert!(outcomes[1].queued_unread);
    }

    #[test]
    fn clear_unread_flips_everything() {
        let mut cache = MemoryCache::new();
        let keys = keys();
        let h = incoming("bob", RelationState::Messanger, Some("yo"), 10);
        merge_received_hangout(&mut cache, &keys, &h, false, true, 16).unwrap();

        let messages = clear_unread(&mut cache, &keys, &user("bob")).unwrap();
        assert!(messages.iter().all(|m| m.read));
        assert!(!cache.contains(&keys.unread()));
        let table = cache::read_table(&cache, &keys.hangouts()).unwrap();
        assert!(table[&user("bob")].read);

        // Clearing again is a no-op.
        clear_unread(&mut cache, &keys, &user("bob")).unwrap();
    }
}
