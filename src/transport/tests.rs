use serde_json::json;
use tungstenite::http::header::{HeaderMap, HeaderValue};

use crate::auth::Credentials;
use crate::transport::message::{AuthResponse, ClientMessage, PingMessage};
use crate::transport::metadata::{BASIC_AUTH, Metadata, Method, TOKEN_AUTH};

#[test]
fn test_method_from_path() {
    assert_eq!(Method::from_path("/authenticate"), Some(Method::Authenticate));
    assert_eq!(Method::from_path("/chat/"), Some(Method::Chat));
    assert_eq!(Method::from_path("/ping"), Some(Method::Ping));
    assert_eq!(Method::from_path("/publish"), None);
    assert_eq!(Method::from_path(""), None);

    for method in [Method::Authenticate, Method::Chat, Method::Ping] {
        assert_eq!(Method::from_path(method.path()), Some(method));
    }
}

#[test]
fn test_metadata_from_headers() {
    let mut headers = HeaderMap::new();
    headers.insert(BASIC_AUTH, HeaderValue::from_static("alice:password"));
    headers.insert(TOKEN_AUTH, HeaderValue::from_static("   "));

    let metadata = Metadata::from_headers(&headers);
    assert_eq!(metadata.basic(), Some("alice:password"));
    assert_eq!(metadata.token(), None);
    assert!(!metadata.is_empty());

    assert!(Metadata::from_headers(&HeaderMap::new()).is_empty());
}

#[test]
fn test_metadata_apply_then_read() {
    let credentials = Credentials::new("alice", "password");
    let mut headers = HeaderMap::new();
    Metadata::with_basic(&credentials).apply(&mut headers).unwrap();
    assert!(headers.get(BASIC_AUTH).unwrap().is_sensitive());
    assert!(headers.get(TOKEN_AUTH).is_none());

    let metadata = Metadata::from_headers(&headers);
    assert_eq!(metadata.basic(), Some("alice:password"));

    let mut headers = HeaderMap::new();
    Metadata::with_token("abc123").apply(&mut headers).unwrap();
    assert_eq!(Metadata::from_headers(&headers).token(), Some("abc123"));
}

#[test]
fn test_metadata_rejects_unencodable_values() {
    let mut headers = HeaderMap::new();
    let result = Metadata::with_token("line\nbreak").apply(&mut headers);
    assert!(result.is_err());
}

#[test]
fn test_metadata_debug_hides_secrets() {
    let credentials = Credentials::new("alice", "hunter2");
    let rendered = format!("{:?}", Metadata::with_basic(&credentials));
    assert!(!rendered.contains("hunter2"));
    assert!(rendered.contains("basic: true"));
}

#[test]
fn test_parse_client_frames() {
    let msg = json!({ "text": "hello" }).to_string();
    let parsed: ClientMessage = serde_json::from_str(&msg).unwrap();
    assert_eq!(parsed.text, "hello");

    let ping: PingMessage = serde_json::from_str(r#"{"ack":false}"#).unwrap();
    assert!(!ping.ack);

    let invalid = serde_json::from_str::<ClientMessage>(r#"{"topic":"news"}"#);
    assert!(invalid.is_err());
}

#[test]
fn test_auth_response_wire_format() {
    let response = AuthResponse {
        token: "deadbeef".to_string(),
    };
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({ "token": "deadbeef" })
    );
}
