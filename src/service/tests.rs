use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver};

use super::{ChatCall, ChatService, StreamEnd};
use crate::broker::{ServerMessage, SessionRegistry};
use crate::transport::message::{ClientMessage, PingMessage};
use crate::utils::Code;

fn service() -> ChatService {
    ChatService::new(Arc::new(SessionRegistry::new()))
}

fn join(service: &ChatService, login: &str) -> (ChatCall, UnboundedReceiver<ServerMessage>) {
    let token = service.authenticate(login.to_string()).token;
    let (tx, rx) = mpsc::unbounded_channel();
    let call = service.open_chat(&token, tx).unwrap();
    (call, rx)
}

fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

fn say(text: &str) -> ClientMessage {
    ClientMessage {
        text: text.to_string(),
    }
}

#[test]
fn test_authenticate_registers_session_without_sink() {
    let service = service();
    let token = service.authenticate("alice".to_string()).token;
    let session = service.registry().lookup(&token).unwrap();
    assert_eq!(session.login, "alice");
    assert!(!session.streaming);
}

#[test]
fn test_open_chat_announces_join_to_everyone() {
    let service = service();
    let (_alice, mut alice_rx) = join(&service, "alice");
    let (_bob, mut bob_rx) = join(&service, "bob");

    let alice_seen = drain(&mut alice_rx);
    assert_eq!(alice_seen.len(), 2);
    assert_eq!(alice_seen[1].text, "Client 'bob' has entered the chat");
    assert!(alice_seen[1].is_notice());

    // the newcomer hears its own join notice
    let bob_seen = drain(&mut bob_rx);
    assert_eq!(bob_seen.len(), 1);
    assert_eq!(bob_seen[0].text, "Client 'bob' has entered the chat");
}

#[test]
fn test_open_chat_twice_on_one_session_fails() {
    let service = service();
    let token = service.authenticate("alice".to_string()).token;
    let (tx, _rx) = mpsc::unbounded_channel();
    service.open_chat(&token, tx).unwrap();
    let (tx2, _rx2) = mpsc::unbounded_channel();
    let err = service.open_chat(&token, tx2).unwrap_err();
    assert_eq!(err.code, Code::FailedPrecondition);
}

#[test]
fn test_per_sender_order_is_kept_for_every_recipient() {
    let service = service();
    let (alice, mut alice_rx) = join(&service, "alice");
    let (bob, mut bob_rx) = join(&service, "bob");
    let (_carol, mut carol_rx) = join(&service, "carol");
    for rx in [&mut alice_rx, &mut bob_rx, &mut carol_rx] {
        drain(rx);
    }

    service.receive(&alice, say("a1")).unwrap();
    service.receive(&bob, say("b1")).unwrap();
    service.receive(&alice, say("a2")).unwrap();
    service.receive(&bob, say("b2")).unwrap();
    service.receive(&alice, say("a3")).unwrap();

    let expected: Vec<(&str, &str)> = vec![
        ("alice", "a1"),
        ("bob", "b1"),
        ("alice", "a2"),
        ("bob", "b2"),
        ("alice", "a3"),
    ];
    for rx in [&mut alice_rx, &mut bob_rx, &mut carol_rx] {
        let got: Vec<_> = drain(rx)
            .into_iter()
            .map(|m| (m.from, m.text))
            .collect();
        let got: Vec<(&str, &str)> = got.iter().map(|(f, t)| (f.as_str(), t.as_str())).collect();
        assert_eq!(got, expected);
    }
}

#[test]
fn test_envelope_sender_comes_from_session() {
    let service = service();
    let (alice, mut alice_rx) = join(&service, "alice");
    drain(&mut alice_rx);

    service.receive(&alice, say("server")).unwrap();
    let msg = alice_rx.try_recv().unwrap();
    assert_eq!(msg.from, "alice");
    assert_eq!(msg.text, "server");
}

#[test]
fn test_blank_message_is_not_broadcast() {
    let service = service();
    let (alice, mut alice_rx) = join(&service, "alice");
    drain(&mut alice_rx);

    service.receive(&alice, say("   \t")).unwrap();
    assert!(alice_rx.try_recv().is_err());
}

#[test]
fn test_close_chat_removes_session_and_announces_leave() {
    for end in [StreamEnd::Completed, StreamEnd::Failed("reset".to_string())] {
        let service = service();
        let (alice, mut alice_rx) = join(&service, "alice");
        let (bob, _bob_rx) = join(&service, "bob");
        drain(&mut alice_rx);

        let token = bob.token().to_string();
        service.close_chat(bob, end);

        assert!(!service.registry().contains(&token));
        let seen = drain(&mut alice_rx);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].text, "Disconnected: 'bob'");
        assert!(seen[0].is_notice());
    }
}

#[test]
fn test_same_login_twice_yields_independent_sessions() {
    let service = service();
    let (first, _rx1) = join(&service, "alice");
    let (second, _rx2) = join(&service, "alice");
    assert_ne!(first.token(), second.token());

    service.close_chat(first, StreamEnd::Completed);
    assert!(service.registry().contains(second.token()));
}

#[test]
fn test_ping_acknowledges() {
    let service = service();
    assert_eq!(service.ping(PingMessage { ack: false }), PingMessage { ack: true });
    assert!(service.registry().is_empty());
}
