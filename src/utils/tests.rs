use tungstenite::protocol::CloseFrame;
use tungstenite::protocol::frame::coding::CloseCode;

use super::error::MAX_CLOSE_REASON;
use super::*;

#[test]
fn logging_init_accepts_levels() {
    // Should not panic
    logging::init("info");
    logging::init("debug");
    logging::init("warn");
}

#[test]
fn close_frame_carries_code_and_message() {
    let status = Status::unauthenticated("unknown token");
    let frame = status.to_close_frame();
    assert_eq!(frame.code, CloseCode::Policy);
    assert_eq!(Status::from_close_frame(&frame), Some(status));
}

#[test]
fn normal_close_has_no_status() {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    };
    assert_eq!(Status::from_close_frame(&frame), None);
}

#[test]
fn going_away_is_retryable() {
    let frame = CloseFrame {
        code: CloseCode::Away,
        reason: "".into(),
    };
    let status = Status::from_close_frame(&frame).unwrap();
    assert!(status.is_retryable());
}

#[test]
fn long_reasons_are_truncated_on_a_char_boundary() {
    let status = Status::internal("ж".repeat(200));
    let frame = status.to_close_frame();
    assert!(frame.reason.len() <= MAX_CLOSE_REASON);
    assert!(frame.reason.as_str().starts_with("INTERNAL: "));
}

#[test]
fn http_status_round_trips_for_gate_rejections() {
    for code in [Code::Unauthenticated, Code::PermissionDenied, Code::Unimplemented] {
        assert_eq!(Code::from_http_status(code.http_status()), code);
    }
}

#[test]
fn errors_are_classified() {
    assert_eq!(Status::deadline_exceeded("x").class(), ErrorClass::Transport);
    assert_eq!(Status::permission_denied("x").class(), ErrorClass::Auth);
    assert_eq!(Status::internal("x").class(), ErrorClass::Logic);
    assert!(!Status::unauthenticated("x").is_retryable());
}

#[test]
fn config_failures_become_server_errors() {
    let err = ServerError::from(config::ConfigError::Message("missing port".into()));
    assert!(matches!(err, ServerError::Config(_)));
    assert_eq!(err.to_string(), "failed to load configuration: missing port");
}
