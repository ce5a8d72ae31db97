//! Call routing and metadata.
//!
//! A call is addressed by the request path (`/authenticate`, `/chat`,
//! `/ping`) and carries its credentials as upgrade request headers.

use std::fmt;

use tungstenite::http::header::{HeaderMap, HeaderName, HeaderValue};
use zeroize::Zeroize;

use crate::auth::Credentials;
use crate::utils::Status;

/// Header carrying `"<login>:<password>"`. Only sent on `authenticate`.
pub const BASIC_AUTH: &str = "basic_auth";

/// Header carrying the bearer token. Sent on `chat` and `ping`.
pub const TOKEN_AUTH: &str = "token_auth";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Authenticate,
    Chat,
    Ping,
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Method::Authenticate => "authenticate",
            Method::Chat => "chat",
            Method::Ping => "ping",
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Method::Authenticate => "/authenticate",
            Method::Chat => "/chat",
            Method::Ping => "/ping",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        match path.trim_end_matches('/') {
            "/authenticate" => Some(Method::Authenticate),
            "/chat" => Some(Method::Chat),
            "/ping" => Some(Method::Ping),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Auth headers of one call. Blank header values count as absent.
#[derive(Clone, Default)]
pub struct Metadata {
    basic: Option<String>,
    token: Option<String>,
}

impl Metadata {
    pub fn with_basic(credentials: &Credentials) -> Self {
        Self {
            basic: Some(credentials.to_basic().to_string()),
            token: None,
        }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            basic: None,
            token: Some(token.into()),
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Self {
            basic: read(BASIC_AUTH),
            token: read(TOKEN_AUTH),
        }
    }

    pub fn basic(&self) -> Option<&str> {
        self.basic.as_deref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.basic.is_none() && self.token.is_none()
    }

    /// Writes the metadata into an outgoing request's headers.
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<(), Status> {
        let pairs = [(BASIC_AUTH, &self.basic), (TOKEN_AUTH, &self.token)];
        for (name, value) in pairs {
            let Some(value) = value else {
                continue;
            };
            let mut value = HeaderValue::from_str(value)
                .map_err(|_| Status::invalid_argument(format!("{name} is not a valid header value")))?;
            value.set_sensitive(true);
            headers.insert(HeaderName::from_static(name), value);
        }
        Ok(())
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metadata")
            .field("basic", &self.basic.is_some())
            .field("token", &self.token.is_some())
            .finish()
    }
}

impl Drop for Metadata {
    fn drop(&mut self) {
        if let Some(basic) = self.basic.as_mut() {
            basic.zeroize();
        }
    }
}
