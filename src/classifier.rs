//! Push notification classifier.
//!
//! Everything arriving on the push channel is a JSON object with a `type`
//! tag. The tag set is closed: anything else on the shared channel belongs
//! to another feature and is dropped here, before any pipeline runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::model::Hangout;

/// The four notification shapes the sync core consumes. `ACKHOWLEDGEMENT`
/// is the tag the backend actually sends; it is part of the wire contract,
/// misspelling included.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notification {
    /// The backend confirmed our own command.
    #[serde(rename = "ACKHOWLEDGEMENT")]
    Acknowledgement {
        hangout: Hangout,
        #[serde(default)]
        offline: bool,
    },

    /// A peer acted on us while we were connected.
    #[serde(rename = "HANGOUT")]
    Hangout { hangout: Hangout },

    /// Everything peers did while we were away, delivered as one batch.
    #[serde(rename = "UNREAD_HANGOUTS")]
    UnreadHangouts { hangouts: Vec<Hangout> },

    /// Confirmation for a command that was flushed from the offline queue.
    #[serde(rename = "OFFLINE_ACKN")]
    OfflineAcknowledgement { hangout: Hangout },
}

impl Notification {
    /// Classify one raw payload. Unknown or malformed payloads are not an
    /// error: the channel is shared, so they are logged and dropped.
    pub fn parse(payload: &Value) -> Option<Self> {
        match serde_json::from_value(payload.clone()) {
            Ok(notification) => Some(notification),
            Err(e) => {
                let tag = payload
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("<missing>");
                debug!(tag, error = %e, "unclassified push payload dropped");
                None
            }
        }
    }
}
