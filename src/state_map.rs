//! Command -> state-pair mapping.
//!
//! Every command produces exactly one acknowledgement state for the issuer
//! and one actionable state for the peer. The function is total over the
//! closed [`Command`] enum; unknown wire tags are rejected earlier, at
//! [`Command::from_wire`].

use crate::model::{Command, RelationState};

/// The two states a single command writes: the issuer's acknowledgement tag
/// and the peer's actionable tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatePair {
    pub sender: RelationState,
    pub target: RelationState,
}

pub const fn map_command(command: Command) -> StatePair {
    match command {
        Command::Invite => StatePair {
            sender: RelationState::Invited,
            target: RelationState::Inviter,
        },
        Command::Accept => StatePair {
            sender: RelationState::Accepted,
            target: RelationState::Accepter,
        },
        Command::Decline => StatePair {
            sender: RelationState::Declined,
            target: RelationState::Decliner,
        },
        Command::Block => StatePair {
            sender: RelationState::Blocked,
            target: RelationState::Blocker,
        },
        Command::Unblock => StatePair {
            sender: RelationState::Unblocked,
            target: RelationState::Unblocker,
        },
        Command::Message => StatePair {
            sender: RelationState::Messaged,
            target: RelationState::Messanger,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_rows() {
        let cases = [
            (Command::Invite, RelationState::Invited, RelationState::Inviter),
            (Command::Accept, RelationState::Accepted, RelationState::Accepter),
            (Command::Decline, RelationState::Declined, RelationState::Decliner),
            (Command::Block, RelationState::Blocked, RelationState::Blocker),
            (Command::Unblock, RelationState::Unblocked, RelationState::Unblocker),
            (Command::Message, RelationState::Messaged, RelationState::Messanger),
        ];
        for (cmd, sender, target) in cases {
            let pair = map_command(cmd);
            assert_eq!(pair.sender, sender);
            assert_eq!(pair.target, target);
        }
    }

    #[test]
    fn sender_is_ack_target_is_actionable() {
        for cmd in Command::ALL {
            let pair = map_command(cmd);
            assert!(pair.sender.is_acknowledgement(), "{cmd}");
            assert!(pair.target.is_actionable(), "{cmd}");
        }
    }

    #[test]
    fn pairs_are_distinct_across_commands() {
        for a in Command::ALL {
            for b in Command::ALL {
                if a != b {
                    assert_ne!(map_command(a).sender, map_command(b).sender);
                    assert_ne!(map_command(a).target, map_command(b).target);
                }
            }
        }
    }
}
