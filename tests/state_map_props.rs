use proptest::prelude::*;

use hangout_sync::{map_command, Command, RelationState};

fn any_command() -> impl Strategy<Value = Command> {
    prop::sample::select(Command::ALL.to_vec())
}

fn any_state() -> impl Strategy<Value = RelationState> {
    prop::sample::select(RelationState::ALL.to_vec())
}

proptest! {
    #[test]
    fn every_command_maps_to_one_ack_and_one_actionable(cmd in any_command()) {
        let pair = map_command(cmd);
        prop_assert!(pair.sender.is_acknowledgement());
        prop_assert!(pair.target.is_actionable());
        prop_assert!(pair.sender.wire_tag().ends_with("ED"));
        prop_assert!(pair.target.wire_tag().ends_with("ER"));
    }

    #[test]
    fn sender_state_recovers_the_command(cmd in any_command()) {
        let pair = map_command(cmd);
        prop_assert_eq!(Command::from_sender_state(pair.sender), Some(cmd));
        prop_assert_eq!(Command::from_sender_state(pair.target), None);
    }

    #[test]
    fn state_tags_round_trip_the_wire(state in any_state()) {
        let tag = state.wire_tag();
        prop_assert_eq!(RelationState::from_wire(tag), Ok(state));

        let json = serde_json::to_string(&state).unwrap();
        prop_assert_eq!(json, format!("\"{tag}\""));
    }

    #[test]
    fn unread_badges_come_only_from_actionable_tags(state in any_state()) {
        if state.raises_unread() {
            prop_assert!(state.is_actionable());
        }
        if state.is_acknowledgement() {
            prop_assert!(!state.raises_unread());
        }
    }

    #[test]
    fn command_tags_round_trip_the_wire(cmd in any_command()) {
        prop_assert_eq!(Command::from_wire(cmd.wire_tag()), Ok(cmd));
    }
}
