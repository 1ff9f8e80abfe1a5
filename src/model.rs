use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Local-only notice appended when sending to a peer who has blocked us.
pub const BLOCKED_BY_PEER_NOTICE: &str = "you can not send this message because you are blocked";

/// Local-only notice appended after a BLOCK command is acknowledged.
pub const BLOCKED_PEER_NOTICE: &str = "you blocked this user";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid username: {0}")]
    InvalidUsername(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command tag: {0}")]
    Unknown(String),
    #[error("unknown relation state tag: {0}")]
    UnknownState(String),
    #[error("message exceeds {max} characters")]
    MessageTooLong { max: usize },
}

/// Validated peer/user name - immutable after construction.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    const MAX_LENGTH: usize = 128;

    pub fn new(name: impl Into<String>) -> Result<Self, ModelError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(ModelError::InvalidUsername("username cannot be empty".into()));
        }
        if name.len() > Self::MAX_LENGTH {
            return Err(ModelError::InvalidUsername(format!(
                "username exceeds {} characters",
                Self::MAX_LENGTH
            )));
        }
        if name.chars().any(|c| c.is_control() || c == '-') {
            // '-' is the cache key separator, so it cannot appear in names.
            return Err(ModelError::InvalidUsername(
                "username contains invalid characters".into(),
            ));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unix timestamp in milliseconds. Doubles as the idempotency key for a
/// command: both relationship records of one command share it, and message
/// flag flips are matched by it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    pub fn now() -> Self {
        Self(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        )
    }
}

/// The signed-in identity, supplied by the authentication subsystem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: Username,
    pub email: String,
}

impl Identity {
    pub fn new(username: Username, email: impl Into<String>) -> Self {
        Self {
            username,
            email: email.into(),
        }
    }
}

/// A user-initiated action on a peer relationship.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Command {
    Invite,
    Accept,
    Decline,
    Block,
    Unblock,
    Message,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::Invite,
        Command::Accept,
        Command::Decline,
        Command::Block,
        Command::Unblock,
        Command::Message,
    ];

    pub const fn wire_tag(self) -> &'static str {
        match self {
            Command::Invite => "INVITE",
            Command::Accept => "ACCEPT",
            Command::Decline => "DECLINE",
            Command::Block => "BLOCK",
            Command::Unblock => "UNBLOCK",
            Command::Message => "MESSAGE",
        }
    }

    /// Parse a wire tag. Unknown tags are a programming error on the caller's
    /// side and are never retried.
    pub fn from_wire(tag: &str) -> Result<Self, CommandError> {
        match tag {
            "INVITE" => Ok(Command::Invite),
            "ACCEPT" => Ok(Command::Accept),
            "DECLINE" => Ok(Command::Decline),
            "BLOCK" => Ok(Command::Block),
            "UNBLOCK" => Ok(Command::Unblock),
            "MESSAGE" => Ok(Command::Message),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }

    /// Recover the command from the acknowledgement state it produces.
    /// Used when replaying offline drafts, which persist the optimistic
    /// hangout record rather than the command itself.
    pub const fn from_sender_state(state: RelationState) -> Option<Self> {
        match state {
            RelationState::Invited => Some(Command::Invite),
            RelationState::Accepted => Some(Command::Accept),
            RelationState::Declined => Some(Command::Decline),
            RelationState::Blocked => Some(Command::Block),
            RelationState::Unblocked => Some(Command::Unblock),
            RelationState::Messaged => Some(Command::Message),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_tag())
    }
}

/// Relationship state tag. "…ED" tags are acknowledgements recorded on the
/// issuer's own record; "…ER" tags are actionable states delivered to the
/// peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RelationState {
    Invited,
    Inviter,
    Accepted,
    Accepter,
    Declined,
    Decliner,
    Blocked,
    Blocker,
    Unblocked,
    Unblocker,
    Messaged,
    Messanger,
}

impl RelationState {
    pub const ALL: [RelationState; 12] = [
        RelationState::Invited,
        RelationState::Inviter,
        RelationState::Accepted,
        RelationState::Accepter,
        RelationState::Declined,
        RelationState::Decliner,
        RelationState::Blocked,
        RelationState::Blocker,
        RelationState::Unblocked,
        RelationState::Unblocker,
        RelationState::Messaged,
        RelationState::Messanger,
    ];

    pub const fn wire_tag(self) -> &'static str {
        match self {
            RelationState::Invited => "INVITED",
            RelationState::Inviter => "INVITER",
            RelationState::Accepted => "ACCEPTED",
            RelationState::Accepter => "ACCEPTER",
            RelationState::Declined => "DECLINED",
            RelationState::Decliner => "DECLINER",
            RelationState::Blocked => "BLOCKED",
            RelationState::Blocker => "BLOCKER",
            RelationState::Unblocked => "UNBLOCKED",
            RelationState::Unblocker => "UNBLOCKER",
            RelationState::Messaged => "MESSAGED",
            RelationState::Messanger => "MESSANGER",
        }
    }

    pub fn from_wire(tag: &str) -> Result<Self, CommandError> {
        match tag {
            "INVITED" => Ok(RelationState::Invited),
            "INVITER" => Ok(RelationState::Inviter),
            "ACCEPTED" => Ok(RelationState::Accepted),
            "ACCEPTER" => Ok(RelationState::Accepter),
            "DECLINED" => Ok(RelationState::Declined),
            "DECLINER" => Ok(RelationState::Decliner),
            "BLOCKED" => Ok(RelationState::Blocked),
            "BLOCKER" => Ok(RelationState::Blocker),
            "UNBLOCKED" => Ok(RelationState::Unblocked),
            "UNBLOCKER" => Ok(RelationState::Unblocker),
            "MESSAGED" => Ok(RelationState::Messaged),
            "MESSANGER" => Ok(RelationState::Messanger),
            other => Err(CommandError::UnknownState(other.to_string())),
        }
    }

    /// True for the "…ED" tags: the issuer-side acknowledgement states.
    pub const fn is_acknowledgement(self) -> bool {
        matches!(
            self,
            RelationState::Invited
                | RelationState::Accepted
                | RelationState::Declined
                | RelationState::Blocked
                | RelationState::Unblocked
                | RelationState::Messaged
        )
    }

    /// True for the "…ER" tags: peer-initiated, a reaction is expected.
    pub const fn is_actionable(self) -> bool {
        !self.is_acknowledgement()
    }

    /// Only these inbound states raise an unread badge. DECLINER, BLOCKER and
    /// UNBLOCKER never do, and acknowledgement tags never arrive unread.
    pub const fn raises_unread(self) -> bool {
        matches!(
            self,
            RelationState::Accepter | RelationState::Inviter | RelationState::Messanger
        )
    }
}

impl fmt::Display for RelationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_tag())
    }
}

/// The local user's cached view of one peer relationship. Exactly one per
/// (user, peer); replaced wholesale on every state change, never deleted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hangout {
    pub peer: Username,
    pub email: String,
    pub state: RelationState,
    pub text: Option<String>,
    pub timestamp: UnixTimeMs,
    pub delivered: bool,
    pub read: bool,
}

/// One entry of a peer conversation. Append-only: after the fact, only the
/// delivered/read flags are flipped, matched by timestamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub timestamp: UnixTimeMs,
    pub delivered: bool,
    pub read: bool,
    pub author: Username,
    /// Local-only notices (blocking) that never cross the wire.
    #[serde(default)]
    pub system: bool,
}

/// Per-command delivery state machine:
/// `Pending -> Delivered` for an online send, or
/// `Pending -> Queued -> Submitted -> Delivered` for an offline one.
/// `Failed` is reachable from every non-terminal phase when the host gives up
/// waiting for an acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryPhase {
    Pending,
    Queued,
    Submitted,
    Delivered,
    Failed,
}

impl DeliveryPhase {
    pub const fn state_name(self) -> &'static str {
        match self {
            DeliveryPhase::Pending => "pending",
            DeliveryPhase::Queued => "queued",
            DeliveryPhase::Submitted => "submitted",
            DeliveryPhase::Delivered => "delivered",
            DeliveryPhase::Failed => "failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, DeliveryPhase::Delivered | DeliveryPhase::Failed)
    }

    pub const fn can_transition_to(self, next: DeliveryPhase) -> bool {
        matches!(
            (self, next),
            (DeliveryPhase::Pending, DeliveryPhase::Delivered)
                | (DeliveryPhase::Pending, DeliveryPhase::Queued)
                | (DeliveryPhase::Pending, DeliveryPhase::Failed)
                | (DeliveryPhase::Queued, DeliveryPhase::Submitted)
                | (DeliveryPhase::Queued, DeliveryPhase::Failed)
                | (DeliveryPhase::Submitted, DeliveryPhase::Delivered)
                | (DeliveryPhase::Submitted, DeliveryPhase::Failed)
        )
    }
}

/// Ephemeral in-memory record of an outbound command; cleared once the
/// matching acknowledgement arrives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingCommand {
    pub id: Uuid,
    pub peer: Username,
    pub email: String,
    pub text: Option<String>,
    pub command: Command,
    pub timestamp: UnixTimeMs,
    pub phase: DeliveryPhase,
}

impl PendingCommand {
    pub fn new(
        peer: Username,
        email: impl Into<String>,
        command: Command,
        text: Option<String>,
        timestamp: UnixTimeMs,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            email: email.into(),
            text,
            command,
            timestamp,
            phase: DeliveryPhase::Pending,
        }
    }

    /// Whether an inbound acknowledgement settles this command.
    pub fn matches_ack(&self, ack: &Hangout) -> bool {
        self.peer == ack.peer && self.timestamp == ack.timestamp
    }
}

/// Readiness of the push channel to the backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    #[default]
    Closed,
}

/// Navigation signal consumed by the external router. The format is fixed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteChange {
    pub feature_route: String,
    pub route: String,
}

impl RouteChange {
    pub fn for_state(state: RelationState) -> Self {
        Self {
            feature_route: format!("/{}", state.wire_tag()),
            route: "/hangouts".to_string(),
        }
    }
}
