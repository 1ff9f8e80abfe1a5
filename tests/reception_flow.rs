use std::sync::Arc;

use hangout_sync::{
    Command, Identity, MemoryBackend, MemoryCache, RelationState, RemoteBackend, SyncClient,
    SyncConfig, Username,
};

fn user(name: &str) -> Username {
    Username::new(name).unwrap()
}

fn client(name: &str, backend: Arc<MemoryBackend>) -> SyncClient<MemoryCache, MemoryBackend> {
    let identity = Identity::new(user(name), format!("{name}@mail.test"));
    SyncClient::new(identity, SyncConfig::default(), MemoryCache::new(), backend).unwrap()
}

#[tokio::test]
async fn block_against_open_conversation_routes_instead_of_unread() {
    let backend = Arc::new(MemoryBackend::new());
    let mut alice = client("alice", backend.clone());
    let mut bob = client("bob", backend.clone());
    alice.connect().await.unwrap();
    bob.connect().await.unwrap();

    // Relationship up, Bob sitting in the conversation with Alice.
    alice
        .issue_command(user("bob"), "bob@mail.test", Command::Invite, None)
        .await
        .unwrap();
    alice.pump().unwrap();
    bob.pump().unwrap();
    bob.open_conversation(&user("alice")).unwrap();

    // Alice blocks him mid-conversation.
    alice
        .issue_command(user("bob"), "bob@mail.test", Command::Block, None)
        .await
        .unwrap();
    alice.pump().unwrap();

    let routes = bob.pump().unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].feature_route, "/BLOCKER");
    assert_eq!(routes[0].route, "/hangouts");

    // BLOCKER never raises a badge, and the focused record refreshed in place.
    assert!(bob.model().unread.is_empty());
    assert_eq!(
        bob.model().focused.as_ref().unwrap().state,
        RelationState::Blocker
    );
    // Merged while focused, so it reads as seen.
    assert!(bob.model().hangouts[&user("alice")].read);
}

#[tokio::test]
async fn unread_badge_lifecycle() {
    let backend = Arc::new(MemoryBackend::new());
    let mut alice = client("alice", backend.clone());
    let mut bob = client("bob", backend.clone());
    alice.connect().await.unwrap();
    bob.connect().await.unwrap();

    alice
        .issue_command(user("bob"), "bob@mail.test", Command::Invite, None)
        .await
        .unwrap();
    alice.pump().unwrap();
    bob.pump().unwrap();
    bob.issue_command(user("alice"), "alice@mail.test", Command::Accept, None)
        .await
        .unwrap();
    bob.pump().unwrap();
    alice.pump().unwrap();

    // 1. A message lands while Bob is elsewhere: unread entry, record unread.
    alice
        .issue_command(
            user("bob"),
            "bob@mail.test",
            Command::Message,
            Some("ping".into()),
        )
        .await
        .unwrap();
    alice.pump().unwrap();

    bob.pump().unwrap();
    assert_eq!(bob.model().unread.len(), 1);
    assert_eq!(bob.model().unread[0].state, RelationState::Messanger);
    assert!(!bob.model().hangouts[&user("alice")].read);

    // 2. Opening the conversation clears the badge and flips everything read.
    bob.open_conversation(&user("alice")).unwrap();
    assert!(bob.model().unread.is_empty());
    assert!(bob.model().hangouts[&user("alice")].read);
    assert!(bob.model().messages.iter().all(|m| m.read));
    assert_eq!(bob.model().messages.len(), 1);

    // 3. The next message while focused appends read, with no badge.
    alice
        .issue_command(
            user("bob"),
            "bob@mail.test",
            Command::Message,
            Some("still there?".into()),
        )
        .await
        .unwrap();
    alice.pump().unwrap();
    let routes = bob.pump().unwrap();
    assert!(routes.is_empty());
    assert!(bob.model().unread.is_empty());
    assert_eq!(bob.model().messages.len(), 2);
    assert!(bob.model().messages.iter().all(|m| m.read));
}

#[tokio::test]
async fn away_peer_catches_up_on_connect() {
    let backend = Arc::new(MemoryBackend::new());
    let mut alice = client("alice", backend.clone());
    alice.connect().await.unwrap();

    // Bob has never connected; his copy is parked server-side.
    alice
        .issue_command(
            user("bob"),
            "bob@mail.test",
            Command::Invite,
            Some("join us".into()),
        )
        .await
        .unwrap();
    alice.pump().unwrap();

    let mut bob = client("bob", backend.clone());
    bob.connect().await.unwrap();
    bob.pump().unwrap();

    assert_eq!(
        bob.model().hangouts[&user("alice")].state,
        RelationState::Inviter
    );
    assert_eq!(bob.model().unread.len(), 1);
    assert_eq!(
        bob.model().unread[0].text.as_deref(),
        Some("join us")
    );

    // The catch-up consumed the parked copy; a reconnect replays nothing.
    assert!(backend.fetch_unread(&user("bob")).await.unwrap().is_empty());
    let mut bob_again = client("bob", backend.clone());
    bob_again.connect().await.unwrap();
    assert!(bob_again.model().unread.is_empty());
}

#[tokio::test]
async fn decline_merges_silently() {
    let backend = Arc::new(MemoryBackend::new());
    let mut alice = client("alice", backend.clone());
    let mut bob = client("bob", backend.clone());
    alice.connect().await.unwrap();
    bob.connect().await.unwrap();

    alice
        .issue_command(user("bob"), "bob@mail.test", Command::Invite, None)
        .await
        .unwrap();
    alice.pump().unwrap();
    bob.pump().unwrap();

    bob.issue_command(user("alice"), "alice@mail.test", Command::Decline, None)
        .await
        .unwrap();
    bob.pump().unwrap();

    // DECLINER merges without badge or navigation on Alice's side.
    let routes = alice.pump().unwrap();
    assert!(routes.is_empty());
    assert!(alice.model().unread.is_empty());
    assert_eq!(
        alice.model().hangouts[&user("bob")].state,
        RelationState::Decliner
    );
}
