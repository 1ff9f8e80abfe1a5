//! Local cache boundary.
//!
//! The cache is an opaque string-keyed store of JSON documents owned by the
//! host platform. The core only depends on the [`CacheStore`] trait and on
//! the fixed key scheme below; [`MemoryCache`] is the reference
//! implementation used by tests and by hosts without a durable store.
//!
//! Every access is a whole-document read-modify-write. A missing document
//! always reads as empty: a peer notification can legitimately arrive before
//! any local list has been created.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::model::{Hangout, Message, UnixTimeMs, Username};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("serialization error for key {key}: {message}")]
    Serialization { key: String, message: String },

    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("too many {what}: max {max}")]
    LimitExceeded { what: &'static str, max: usize },
}

pub trait CacheStore {
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;
    fn set(&mut self, key: &str, value: Value) -> Result<(), CacheError>;
    fn remove(&mut self, key: &str) -> Result<(), CacheError>;
}

/// The hangout list as cached: one record per peer, upsert-by-peer.
pub type HangoutTable = BTreeMap<Username, Hangout>;

/// Fixed key scheme, one namespace per signed-in user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheKeys {
    user: Username,
}

impl CacheKeys {
    pub fn new(user: Username) -> Self {
        Self { user }
    }

    pub fn user(&self) -> &Username {
        &self.user
    }

    pub fn hangouts(&self) -> String {
        format!("{}-hangouts", self.user)
    }

    pub fn messages(&self, peer: &Username) -> String {
        format!("{}-{}-messages", self.user, peer)
    }

    pub fn unread(&self) -> String {
        format!("{}-unread-hangouts", self.user)
    }

    pub fn offline_hangouts(&self) -> String {
        format!("{}-offline-hangouts", self.user)
    }

    pub fn offline_messages(&self, peer: &Username) -> String {
        format!("{}-{}-offline-messages", self.user, peer)
    }
}

// ============================================================================
// Whole-document helpers
// ============================================================================

pub fn read_doc<C, T>(cache: &C, key: &str) -> Result<Option<T>, CacheError>
where
    C: CacheStore + ?Sized,
    T: DeserializeOwned,
{
    match cache.get(key)? {
        None => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| CacheError::Serialization {
                key: key.to_string(),
                message: e.to_string(),
            }),
    }
}

pub fn write_doc<C, T>(cache: &mut C, key: &str, doc: &T) -> Result<(), CacheError>
where
    C: CacheStore + ?Sized,
    T: Serialize,
{
    let value = serde_json::to_value(doc).map_err(|e| CacheError::Serialization {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    cache.set(key, value)
}

pub fn read_table<C>(cache: &C, key: &str) -> Result<HangoutTable, CacheError>
where
    C: CacheStore + ?Sized,
{
    Ok(read_doc(cache, key)?.unwrap_or_default())
}

/// Whole-record replace keyed by peer; the conflict policy is
/// last-writer-wins, no field merge.
pub fn upsert_into_table<C>(cache: &mut C, key: &str, hangout: Hangout) -> Result<(), CacheError>
where
    C: CacheStore + ?Sized,
{
    let mut table = read_table(cache, key)?;
    table.insert(hangout.peer.clone(), hangout);
    write_doc(cache, key, &table)
}

pub fn read_messages<C>(cache: &C, key: &str) -> Result<Vec<Message>, CacheError>
where
    C: CacheStore + ?Sized,
{
    Ok(read_doc(cache, key)?.unwrap_or_default())
}

/// Append unless an entry with the same timestamp, author and kind already
/// exists. The conversation is append-only, so this is what makes replayed
/// acknowledgements and re-merged pushes harmless.
pub fn append_message_once<C>(cache: &mut C, key: &str, message: Message) -> Result<bool, CacheError>
where
    C: CacheStore + ?Sized,
{
    let mut messages = read_messages(cache, key)?;
    let exists = messages.iter().any(|m| {
        m.timestamp == message.timestamp && m.author == message.author && m.system == message.system
    });
    if exists {
        return Ok(false);
    }
    messages.push(message);
    write_doc(cache, key, &messages)?;
    Ok(true)
}

/// Flip `delivered` on the entry matching `timestamp`. Returns whether a flip
/// happened; flipping an already-delivered entry is a no-op.
pub fn flip_delivered<C>(cache: &mut C, key: &str, timestamp: UnixTimeMs) -> Result<bool, CacheError>
where
    C: CacheStore + ?Sized,
{
    let mut messages = read_messages(cache, key)?;
    let mut flipped = false;
    for message in &mut messages {
        if message.timestamp == timestamp && !message.delivered {
            message.delivered = true;
            flipped = true;
        }
    }
    if flipped {
        write_doc(cache, key, &messages)?;
    }
    Ok(flipped)
}

pub fn mark_all_read<C>(cache: &mut C, key: &str) -> Result<Vec<Message>, CacheError>
where
    C: CacheStore + ?Sized,
{
    let mut messages = read_messages(cache, key)?;
    for message in &mut messages {
        message.read = true;
    }
    write_doc(cache, key, &messages)?;
    Ok(messages)
}

// ============================================================================
// Reference implementation
// ============================================================================

/// In-process cache; never fails.
#[derive(Debug, Default, Clone)]
pub struct MemoryCache {
    entries: HashMap<String, Value>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RelationState;

    fn user(name: &str) -> Username {
        Username::new(name).unwrap()
    }

    fn hangout(peer: &str, state: RelationState) -> Hangout {
        Hangout {
            peer: user(peer),
            email: format!("{peer}@mail.test"),
            state,
            text: None,
            timestamp: UnixTimeMs(1_000),
            delivered: false,
            read: false,
        }
    }

    fn message(author: &str, ts: u64) -> Message {
        Message {
            text: "hi".into(),
            timestamp: UnixTimeMs(ts),
            delivered: false,
            read: false,
            author: user(author),
            system: false,
        }
    }

    #[test]
    fn key_scheme_is_exact() {
        let keys = CacheKeys::new(user("alice"));
        let bob = user("bob");
        assert_eq!(keys.hangouts(), "alice-hangouts");
        assert_eq!(keys.messages(&bob), "alice-bob-messages");
        assert_eq!(keys.unread(), "alice-unread-hangouts");
        assert_eq!(keys.offline_hangouts(), "alice-offline-hangouts");
        assert_eq!(keys.offline_messages(&bob), "alice-bob-offline-messages");
    }

    #[test]
    fn missing_documents_read_as_empty() {
        let cache = MemoryCache::new();
        assert!(read_table(&cache, "alice-hangouts").unwrap().is_empty());
        assert!(read_messages(&cache, "alice-bob-messages").unwrap().is_empty());
    }

    #[test]
    fn upsert_replaces_whole_record() {
        let mut cache = MemoryCache::new();
        upsert_into_table(&mut cache, "k", hangout("bob", RelationState::Invited)).unwrap();
        upsert_into_table(&mut cache, "k", hangout("bob", RelationState::Blocked)).unwrap();

        let table = read_table(&cache, "k").unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table[&user("bob")].state, RelationState::Blocked);
    }

    #[test]
    fn append_once_deduplicates_by_timestamp() {
        let mut cache = MemoryCache::new();
        assert!(append_message_once(&mut cache, "k", message("alice", 5)).unwrap());
        assert!(!append_message_once(&mut cache, "k", message("alice", 5)).unwrap());
        assert!(append_message_once(&mut cache, "k", message("alice", 6)).unwrap());
        assert_eq!(read_messages(&cache, "k").unwrap().len(), 2);
    }

    #[test]
    fn flip_delivered_only_touches_matching_entry() {
        let mut cache = MemoryCache::new();
        append_message_once(&mut cache, "k", message("alice", 5)).unwrap();
        append_message_once(&mut cache, "k", message("alice", 6)).unwrap();

        assert!(flip_delivered(&mut cache, "k", UnixTimeMs(5)).unwrap());
        let messages = read_messages(&cache, "k").unwrap();
        assert!(messages[0].delivered);
        assert!(!messages[1].delivered);

        // Second flip is a no-op.
        assert!(!flip_delivered(&mut cache, "k", UnixTimeMs(5)).unwrap());
    }

    #[test]
    fn mark_all_read_flips_every_entry() {
        let mut cache = MemoryCache::new();
        append_message_once(&mut cache, "k", message("bob", 5)).unwrap();
        append_message_once(&mut cache, "k", message("bob", 6)).unwrap();

        let messages = mark_all_read(&mut cache, "k").unwrap();
        assert!(messages.iter().all(|m| m.read));
    }

    #[test]
    fn remove_is_idempotent() {
        let mut cache = MemoryCache::new();
        cache.set("k", Value::Null).unwrap();
        cache.remove("k").unwrap();
        cache.remove("k").unwrap();
        assert!(!cache.contains("k"));
    }
}
