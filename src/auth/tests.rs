use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use super::{AdmittedCall, AuthGate, Credentials, TokenGenerator};
use crate::broker::{Session, SessionRegistry};
use crate::config::AuthSettings;
use crate::transport::metadata::Metadata;
use crate::utils::Code;

fn gate_with_session(token: &str) -> (AuthGate, Arc<SessionRegistry>) {
    let registry = Arc::new(SessionRegistry::new());
    registry.insert(Session::new("alice", token.to_string()));
    let gate = AuthGate::new(registry.clone(), &AuthSettings::default());
    (gate, registry)
}

#[test]
fn test_credentials_from_basic() {
    let creds = Credentials::from_basic("alice:password").unwrap();
    assert_eq!(creds.login(), "alice");
    assert!(creds.verify("password"));
    assert_eq!(creds.to_basic().as_str(), "alice:password");
}

#[test]
fn test_credentials_rejects_malformed_values() {
    assert!(Credentials::from_basic("alice").is_none());
    assert!(Credentials::from_basic("alice:").is_none());
    assert!(Credentials::from_basic(":password").is_none());
    assert!(Credentials::from_basic("a:b:c").is_none());
}

#[test]
fn test_credentials_debug_is_redacted() {
    let creds = Credentials::new("alice", "hunter2");
    let printed = format!("{creds:?}");
    assert!(printed.contains("alice"));
    assert!(!printed.contains("hunter2"));
}

#[test]
fn test_tokens_are_hex_digests() {
    let token = TokenGenerator::new().generate();
    assert_eq!(token.len(), 64);
    assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_concurrent_tokens_are_distinct() {
    let generator = Arc::new(TokenGenerator::new());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let generator = generator.clone();
            thread::spawn(move || (0..500).map(|_| generator.generate()).collect::<Vec<_>>())
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for token in handle.join().unwrap() {
            assert!(seen.insert(token), "duplicate token issued");
        }
    }
    assert_eq!(seen.len(), 8 * 500);
}

#[test]
fn test_gate_admits_authenticate_with_basic_credentials() {
    let (gate, _) = gate_with_session("t1");
    let creds = Credentials::new("bob", "password");
    let call = gate
        .admit("/authenticate", &Metadata::with_basic(&creds))
        .unwrap();
    assert_eq!(
        call,
        AdmittedCall::Authenticate {
            login: "bob".to_string()
        }
    );
}

#[test]
fn test_gate_rejects_wrong_password() {
    let (gate, _) = gate_with_session("t1");
    let creds = Credentials::new("bob", "nope");
    let err = gate
        .admit("/authenticate", &Metadata::with_basic(&creds))
        .unwrap_err();
    assert_eq!(err.code, Code::Unauthenticated);
}

#[test]
fn test_gate_admits_chat_and_ping_with_live_token() {
    let (gate, _) = gate_with_session("t1");
    let metadata = Metadata::with_token("t1");
    assert_eq!(
        gate.admit("/chat", &metadata).unwrap(),
        AdmittedCall::Chat {
            token: "t1".to_string()
        }
    );
    assert_eq!(
        gate.admit("/ping", &metadata).unwrap(),
        AdmittedCall::Ping {
            token: "t1".to_string()
        }
    );
}

#[test]
fn test_gate_rejects_unknown_token() {
    let (gate, _) = gate_with_session("t1");
    let err = gate.admit("/chat", &Metadata::with_token("t2")).unwrap_err();
    assert_eq!(err.code, Code::Unauthenticated);
}

#[test]
fn test_gate_enforces_metadata_kind_per_method() {
    let (gate, _) = gate_with_session("t1");
    let creds = Credentials::new("bob", "password");

    let err = gate.admit("/chat", &Metadata::with_basic(&creds)).unwrap_err();
    assert_eq!(err.code, Code::PermissionDenied);

    let err = gate
        .admit("/authenticate", &Metadata::with_token("t1"))
        .unwrap_err();
    assert_eq!(err.code, Code::PermissionDenied);
}

#[test]
fn test_gate_rejects_calls_without_metadata_and_leaves_registry_alone() {
    let (gate, registry) = gate_with_session("t1");
    for path in ["/authenticate", "/chat", "/ping"] {
        let err = gate.admit(path, &Metadata::default()).unwrap_err();
        assert_eq!(err.code, Code::PermissionDenied);
    }
    assert_eq!(registry.len(), 1);
    assert!(registry.lookup("t1").is_some_and(|s| !s.streaming));
}

#[test]
fn test_gate_rejects_unknown_method() {
    let (gate, _) = gate_with_session("t1");
    let err = gate
        .admit("/subscribe", &Metadata::with_token("t1"))
        .unwrap_err();
    assert_eq!(err.code, Code::Unimplemented);
}

/// Collects formatted log lines.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

fn warnings_while(run: impl FnOnce()) -> String {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, run);
    captured.text()
}

#[test]
fn test_tokenless_ping_does_not_warn() {
    let (gate, _) = gate_with_session("t1");

    let logged = warnings_while(|| {
        let err = gate.admit("/ping", &Metadata::default()).unwrap_err();
        assert_eq!(err.code, Code::PermissionDenied);
    });
    assert!(logged.is_empty(), "unexpected warning: {logged}");

    let logged = warnings_while(|| {
        let creds = Credentials::new("alice", "wrong");
        assert!(gate.admit("/authenticate", &Metadata::with_basic(&creds)).is_err());
    });
    assert!(logged.contains("invalid login/password"));
}
