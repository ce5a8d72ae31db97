//! The `error` module defines the error types used within `popchat`.
//!
//! Every RPC call fails with a [`Status`], a [`Code`] plus a human readable
//! message. The same value travels over the wire as an HTTP handshake status
//! (calls rejected before they start) or as a WebSocket close-frame reason
//! (calls that fail after they started). Server start-up failures are
//! reported as [`ServerError`].

use std::fmt;
use std::str::FromStr;

use tungstenite::http::StatusCode;
use tungstenite::protocol::CloseFrame;
use tungstenite::protocol::frame::coding::CloseCode;

/// Longest reason a close frame may carry (125 bytes minus the close code).
pub(crate) const MAX_CLOSE_REASON: usize = 123;

/// Status codes for failed calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Unauthenticated,
    PermissionDenied,
    Unavailable,
    DeadlineExceeded,
    Unimplemented,
    InvalidArgument,
    FailedPrecondition,
    Internal,
}

impl Code {
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Unauthenticated => "UNAUTHENTICATED",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::Unavailable => "UNAVAILABLE",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Internal => "INTERNAL",
        }
    }

    /// HTTP status used when the call is refused during the handshake.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Code::Unauthenticated => StatusCode::UNAUTHORIZED,
            Code::PermissionDenied => StatusCode::FORBIDDEN,
            Code::Unimplemented => StatusCode::NOT_FOUND,
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn from_http_status(status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => Code::Unauthenticated,
            StatusCode::FORBIDDEN => Code::PermissionDenied,
            StatusCode::NOT_FOUND => Code::Unimplemented,
            StatusCode::BAD_REQUEST => Code::InvalidArgument,
            StatusCode::PRECONDITION_FAILED => Code::FailedPrecondition,
            StatusCode::SERVICE_UNAVAILABLE => Code::Unavailable,
            StatusCode::GATEWAY_TIMEOUT => Code::DeadlineExceeded,
            _ => Code::Internal,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Code {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "UNAUTHENTICATED" => Code::Unauthenticated,
            "PERMISSION_DENIED" => Code::PermissionDenied,
            "UNAVAILABLE" => Code::Unavailable,
            "DEADLINE_EXCEEDED" => Code::DeadlineExceeded,
            "UNIMPLEMENTED" => Code::Unimplemented,
            "INVALID_ARGUMENT" => Code::InvalidArgument,
            "FAILED_PRECONDITION" => Code::FailedPrecondition,
            "INTERNAL" => Code::Internal,
            _ => return Err(()),
        })
    }
}

/// How a failure should be handled by whoever receives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The server could not be reached in time. Retryable.
    Transport,
    /// The server refused the caller. Terminal for the current attempt.
    Auth,
    /// Anything else: protocol violations and internal failures.
    Logic,
}

/// Outcome of a failed call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Status {
    pub code: Code,
    pub message: String,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(Code::Unauthenticated, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(Code::PermissionDenied, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(Code::FailedPrecondition, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn class(&self) -> ErrorClass {
        match self.code {
            Code::Unavailable | Code::DeadlineExceeded => ErrorClass::Transport,
            Code::Unauthenticated | Code::PermissionDenied => ErrorClass::Auth,
            _ => ErrorClass::Logic,
        }
    }

    /// Deadline-exceeded counts as the server being unreachable.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transport
    }

    /// Encodes the status as `<CODE>: <message>` in a close frame.
    pub fn to_close_frame(&self) -> CloseFrame {
        let code = match self.class() {
            ErrorClass::Auth => CloseCode::Policy,
            ErrorClass::Transport => CloseCode::Again,
            ErrorClass::Logic => CloseCode::Error,
        };
        let mut reason = format!("{}: {}", self.code, self.message);
        if reason.len() > MAX_CLOSE_REASON {
            let mut end = MAX_CLOSE_REASON;
            while !reason.is_char_boundary(end) {
                end -= 1;
            }
            reason.truncate(end);
        }
        CloseFrame {
            code,
            reason: reason.into(),
        }
    }

    /// Decodes a close frame written by [`Status::to_close_frame`].
    ///
    /// Returns `None` for an ordinary close that carries no status.
    pub fn from_close_frame(frame: &CloseFrame) -> Option<Status> {
        match frame.code {
            CloseCode::Normal => return None,
            CloseCode::Away => return Some(Status::unavailable("server is going away")),
            _ => {}
        }
        let reason = frame.reason.as_str();
        let status = match reason.split_once(": ") {
            Some((code, message)) => match code.parse::<Code>() {
                Ok(code) => Status::new(code, message),
                Err(()) => Status::internal(reason),
            },
            None => Status::internal(reason),
        };
        Some(status)
    }
}

/// Errors raised while starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
