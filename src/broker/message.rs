//! Message envelope broadcast by the server.
//!
//! The envelope is always built by the server at broadcast time: only the
//! raw text is taken from the client, the sender identity comes from the
//! session and the timestamp from the server clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sender name used for join and leave notices.
pub const SERVER_SENDER: &str = "server";

/// Point in time as epoch seconds plus the nanosecond remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            seconds: now.timestamp(),
            nanos: now.timestamp_subsec_nanos(),
        }
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.seconds, self.nanos)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub from: String,
    pub text: String,
    pub timestamp: Timestamp,
}

impl ServerMessage {
    pub fn stamped(from: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            text: text.into(),
            timestamp: Timestamp::now(),
        }
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Self::stamped(SERVER_SENDER, text)
    }

    pub fn is_notice(&self) -> bool {
        self.from == SERVER_SENDER
    }
}
