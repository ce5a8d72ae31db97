//! Auth gate
//!
//! Every call passes through [`AuthGate::admit`] before a handler sees it.
//! The gate looks at which metadata key is present:
//! 1. basic credentials: the password must match the configured secret;
//!    the password is scrubbed and only the login goes forward
//! 2. otherwise a bearer token: it must belong to a live session
//! 3. otherwise the call is refused
//!
//! `authenticate` is only reachable with basic credentials, `chat` and
//! `ping` only with a bearer token. The outcome is an [`AdmittedCall`]
//! that carries the bound identity into the handler.

use std::sync::Arc;

use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::auth::credentials::Credentials;
use crate::broker::{SessionRegistry, Token};
use crate::config::AuthSettings;
use crate::transport::metadata::{Metadata, Method};
use crate::utils::Status;

/// A call that passed the gate, with the identity bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmittedCall {
    Authenticate { login: String },
    Chat { token: Token },
    Ping { token: Token },
}

impl AdmittedCall {
    pub fn method(&self) -> Method {
        match self {
            AdmittedCall::Authenticate { .. } => Method::Authenticate,
            AdmittedCall::Chat { .. } => Method::Chat,
            AdmittedCall::Ping { .. } => Method::Ping,
        }
    }
}

pub struct AuthGate {
    registry: Arc<SessionRegistry>,
    password: Zeroizing<String>,
}

impl AuthGate {
    pub fn new(registry: Arc<SessionRegistry>, settings: &AuthSettings) -> Self {
        Self {
            registry,
            password: Zeroizing::new(settings.demo_password.clone()),
        }
    }

    /// Validates the call addressed to `path`. Never mutates the registry.
    pub fn admit(&self, path: &str, metadata: &Metadata) -> Result<AdmittedCall, Status> {
        let method = Method::from_path(path)
            .ok_or_else(|| Status::unimplemented(format!("unknown method '{path}'")))?;

        debug!(
            %method,
            basic = metadata.basic().is_some(),
            bearer = metadata.token().is_some(),
            "incoming call"
        );

        if let Some(basic) = metadata.basic() {
            let credentials = Credentials::from_basic(basic)
                .ok_or_else(|| Status::unauthenticated("malformed basic credentials"))?;
            if !credentials.verify(&self.password) {
                warn!(%method, login = credentials.login(), "invalid login/password");
                return Err(Status::unauthenticated("invalid login/password"));
            }
            let login = credentials.into_login();
            return match method {
                Method::Authenticate => Ok(AdmittedCall::Authenticate { login }),
                other => Err(Status::permission_denied(format!(
                    "{other} requires a session token"
                ))),
            };
        }

        if let Some(token) = metadata.token() {
            if !self.registry.contains(token) {
                warn!(%method, "unknown or expired session token");
                return Err(Status::unauthenticated("unknown or expired session token"));
            }
            let token = token.to_string();
            return match method {
                Method::Chat => Ok(AdmittedCall::Chat { token }),
                Method::Ping => Ok(AdmittedCall::Ping { token }),
                Method::Authenticate => Err(Status::permission_denied(
                    "authenticate requires basic credentials",
                )),
            };
        }

        debug!(%method, "call without credentials");
        Err(Status::permission_denied("invalid login/password"))
    }
}
