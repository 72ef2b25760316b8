//! End-to-end store flow over a shared data directory: the same sequence a
//! message handler runs — admission, mode lock, history, clear.

use tempfile::tempdir;

use xmsbot::modes::Mode;
use xmsbot::store::{ConversationStore, ModeDecision, Role, UsageStore};

const WINDOW: i64 = 1800;

#[tokio::test]
async fn full_request_lifecycle() {
    let dir = tempdir().unwrap();
    let usage = UsageStore::new(
        dir.path().join("users.json"),
        "@GustyxPower".to_string(),
        30,
        WINDOW,
    );
    let conversations = ConversationStore::local(dir.path().join("conversations.json"), 30);
    let now = 1_700_000_000;

    // 30 admitted requests, counting 1..=30, each recording an exchange.
    for i in 1..=30u32 {
        let adm = usage.check_and_consume_at("u1", "alice", now);
        assert!(adm.allowed);
        assert_eq!(adm.count, i);
    }

    if let ModeDecision::Conflict(m) = conversations.try_set_mode("u1", Mode::Kasar, "alice").await {
        panic!("fresh identity should lock a mode, got conflict with {m}");
    }
    conversations.append_at("u1", Role::User, "hello", now).await;
    conversations
        .append_at("u1", Role::Assistant, "yo", now + 1)
        .await;

    // The 31st is denied at the ceiling; the denial does not disturb state.
    let denied = usage.check_and_consume_at("u1", "alice", now);
    assert!(!denied.allowed);
    assert_eq!(denied.count, 30);
    assert_eq!(conversations.get("u1").await.messages.len(), 2);

    // Showing up under the admin name grants a sticky bypass.
    let adm = usage.check_and_consume_at("u1", "GustyxPower", now);
    assert!(adm.allowed);
    assert_eq!(adm.count, 30);
    let adm = usage.check_and_consume_at("u1", "alice", now);
    assert!(adm.allowed);
    assert_eq!(adm.count, 30);

    // Mode switch is rejected until /clear.
    assert_eq!(
        conversations.try_set_mode("u1", Mode::Halus, "alice").await,
        ModeDecision::Conflict(Mode::Kasar)
    );
    let cleared = conversations.clear("u1").await;
    assert_eq!(cleared.mode, Some(Mode::Kasar));
    assert_eq!(
        conversations.try_set_mode("u1", Mode::Halus, "alice").await,
        ModeDecision::Set
    );

    // Clear did not touch the usage counters.
    assert_eq!(usage.get("u1").unwrap().count, 30);
}

#[tokio::test]
async fn stores_reopen_from_the_same_directory() {
    let dir = tempdir().unwrap();
    let now = 1_700_000_000;

    {
        let usage = UsageStore::new(dir.path().join("users.json"), "boss".to_string(), 30, WINDOW);
        let conversations =
            ConversationStore::local(dir.path().join("conversations.json"), 30);
        usage.check_and_consume_at("u1", "alice", now);
        conversations
            .try_set_mode("u1", Mode::Informasi, "alice")
            .await;
        conversations.append_at("u1", Role::User, "what's new", now).await;
    }

    // A fresh process over the same data_dir sees everything.
    let usage = UsageStore::new(dir.path().join("users.json"), "boss".to_string(), 30, WINDOW);
    let conversations = ConversationStore::local(dir.path().join("conversations.json"), 30);

    assert_eq!(usage.check_and_consume_at("u1", "alice", now).count, 2);
    let record = conversations.get("u1").await;
    assert_eq!(record.mode, Some(Mode::Informasi));
    assert_eq!(record.messages.len(), 1);
    assert_eq!(record.username.as_deref(), Some("alice"));
}
