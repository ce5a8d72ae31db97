use super::message::ServerMessage;
use super::session::Session;
use super::SessionRegistry;
use crate::utils::Code;
use tokio::sync::mpsc;

fn registered(registry: &SessionRegistry, login: &str, token: &str) {
    registry.insert(Session::new(login, token.to_string()));
}

#[test]
fn test_registry_new() {
    let registry = SessionRegistry::new();
    assert!(registry.is_empty());
    assert_eq!(registry.len(), 0);
}

#[test]
fn test_registry_insert_lookup_and_remove() {
    let registry = SessionRegistry::default();
    registered(&registry, "alice", "t1");

    let info = registry.lookup("t1").unwrap();
    assert_eq!(info.login, "alice");
    assert!(!info.streaming);
    assert!(registry.contains("t1"));

    let removed = registry.remove("t1").unwrap();
    assert_eq!(removed.login, "alice");
    assert!(!registry.contains("t1"));
    assert!(registry.remove("t1").is_none());
}

#[test]
fn test_same_login_gets_independent_sessions() {
    let registry = SessionRegistry::new();
    registered(&registry, "alice", "t1");
    registered(&registry, "alice", "t2");
    assert_eq!(registry.len(), 2);

    registry.remove("t1");
    assert_eq!(registry.lookup("t2").unwrap().login, "alice");
}

#[test]
fn test_sink_is_attached_at_most_once() {
    let registry = SessionRegistry::new();
    registered(&registry, "alice", "t1");

    let (tx, _rx) = mpsc::unbounded_channel();
    let info = registry.attach_sink("t1", tx).unwrap();
    assert!(info.streaming);

    let (tx2, _rx2) = mpsc::unbounded_channel();
    let err = registry.attach_sink("t1", tx2).unwrap_err();
    assert_eq!(err.code, Code::FailedPrecondition);
}

#[test]
fn test_attach_sink_to_missing_session() {
    let registry = SessionRegistry::new();
    let (tx, _rx) = mpsc::unbounded_channel();
    let err = registry.attach_sink("nope", tx).unwrap_err();
    assert_eq!(err.code, Code::FailedPrecondition);
}

#[test]
fn test_broadcast_skips_sessions_without_sink() {
    let registry = SessionRegistry::new();
    registered(&registry, "alice", "t1");
    registered(&registry, "bob", "t2");

    let (tx, mut rx) = mpsc::unbounded_channel();
    registry.attach_sink("t1", tx).unwrap();

    let delivered = registry.broadcast(&ServerMessage::stamped("bob", "hello"));
    assert_eq!(delivered, 1);

    let received = rx.try_recv().unwrap();
    assert_eq!(received.from, "bob");
    assert_eq!(received.text, "hello");
}

#[test]
fn test_broadcast_to_closed_sink_does_not_panic() {
    let registry = SessionRegistry::new();
    registered(&registry, "alice", "t1");
    registered(&registry, "bob", "t2");

    let (tx, rx) = mpsc::unbounded_channel();
    registry.attach_sink("t1", tx).unwrap();
    let (tx2, mut rx2) = mpsc::unbounded_channel();
    registry.attach_sink("t2", tx2).unwrap();

    // Drop the receiver to close the channel
    drop(rx);

    let delivered = registry.broadcast(&ServerMessage::notice("still here"));
    assert_eq!(delivered, 1);
    assert!(rx2.try_recv().unwrap().is_notice());
}

#[test]
fn test_notice_is_stamped_by_server() {
    let before = chrono::Utc::now().timestamp();
    let msg = ServerMessage::notice("hi");
    assert_eq!(msg.from, "server");
    assert!(msg.timestamp.seconds >= before);
    assert!(msg.timestamp.nanos < 1_000_000_000);
    assert!(msg.timestamp.to_datetime().is_some());
}

#[test]
fn test_server_message_wire_format() {
    let msg = ServerMessage {
        from: "alice".to_string(),
        text: "hi".to_string(),
        timestamp: super::Timestamp {
            seconds: 1_725_000_000,
            nanos: 42,
        },
    };
    let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["from"], "alice");
    assert_eq!(json["timestamp"]["seconds"], 1_725_000_000);
    assert_eq!(json["timestamp"]["nanos"], 42);
}

#[test]
fn test_evict_unclaimed_keeps_streaming_sessions() {
    let registry = SessionRegistry::new();
    registered(&registry, "alice", "t1");
    registered(&registry, "bob", "t2");
    let (tx, _rx) = mpsc::unbounded_channel();
    registry.attach_sink("t1", tx).unwrap();

    assert_eq!(registry.evict_unclaimed(std::time::Duration::from_secs(60)), 0);
    assert_eq!(registry.evict_unclaimed(std::time::Duration::ZERO), 1);
    assert!(registry.contains("t1"));
    assert!(!registry.contains("t2"));
}
