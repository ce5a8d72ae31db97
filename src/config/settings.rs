use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the chat server, its auth gate and the client.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub client: ClientSettings,
}

/// Configuration settings for the server.
///
/// Defines the bind address and the transport keepalive policy.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub keepalive_time_secs: u64,
    pub keepalive_timeout_secs: u64,
    /// Connections that have not completed an admitted handshake within
    /// this window are dropped.
    pub max_connection_idle_secs: u64,
}

/// Configuration settings for the auth gate.
#[derive(Deserialize, Clone, PartialEq)]
pub struct AuthSettings {
    /// The single accepted password. Any login is accepted with it.
    pub demo_password: String,
}

/// Configuration settings for the client connection manager.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ClientSettings {
    pub host: String,
    pub port: u16,
    /// Deadline for the unary `authenticate` and `ping` calls.
    pub deadline_secs: u64,
    pub keepalive_time_secs: u64,
    pub keepalive_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_multiplier: f64,
}

impl ServerSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn keepalive_time(&self) -> Duration {
        Duration::from_secs(self.keepalive_time_secs)
    }

    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_secs(self.keepalive_timeout_secs)
    }

    pub fn max_connection_idle(&self) -> Duration {
        Duration::from_secs(self.max_connection_idle_secs)
    }
}

impl ClientSettings {
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn keepalive_time(&self) -> Duration {
        Duration::from_secs(self.keepalive_time_secs)
    }

    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_secs(self.keepalive_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("demo_password", &"<redacted>")
            .finish()
    }
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub auth: Option<PartialAuthSettings>,
    pub client: Option<PartialClientSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub keepalive_time_secs: Option<u64>,
    pub keepalive_timeout_secs: Option<u64>,
    pub max_connection_idle_secs: Option<u64>,
}

#[derive(Deserialize)]
pub struct PartialAuthSettings {
    pub demo_password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialClientSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub deadline_secs: Option<u64>,
    pub keepalive_time_secs: Option<u64>,
    pub keepalive_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub backoff_initial_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

impl std::fmt::Debug for PartialAuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartialAuthSettings").finish_non_exhaustive()
    }
}

impl PartialServerSettings {
    pub fn merge(self, default: ServerSettings) -> ServerSettings {
        ServerSettings {
            host: self.host.unwrap_or(default.host),
            port: self.port.unwrap_or(default.port),
            keepalive_time_secs: self
                .keepalive_time_secs
                .unwrap_or(default.keepalive_time_secs),
            keepalive_timeout_secs: self
                .keepalive_timeout_secs
                .unwrap_or(default.keepalive_timeout_secs),
            max_connection_idle_secs: self
                .max_connection_idle_secs
                .unwrap_or(default.max_connection_idle_secs),
        }
    }
}

impl PartialAuthSettings {
    pub fn merge(self, default: AuthSettings) -> AuthSettings {
        AuthSettings {
            demo_password: self.demo_password.unwrap_or(default.demo_password),
        }
    }
}

impl PartialClientSettings {
    pub fn merge(self, default: ClientSettings) -> ClientSettings {
        ClientSettings {
            host: self.host.unwrap_or(default.host),
            port: self.port.unwrap_or(default.port),
            deadline_secs: self.deadline_secs.unwrap_or(default.deadline_secs),
            keepalive_time_secs: self
                .keepalive_time_secs
                .unwrap_or(default.keepalive_time_secs),
            keepalive_timeout_secs: self
                .keepalive_timeout_secs
                .unwrap_or(default.keepalive_timeout_secs),
            connect_timeout_secs: self
                .connect_timeout_secs
                .unwrap_or(default.connect_timeout_secs),
            backoff_initial_ms: self
                .backoff_initial_ms
                .unwrap_or(default.backoff_initial_ms),
            backoff_max_ms: self.backoff_max_ms.unwrap_or(default.backoff_max_ms),
            backoff_multiplier: self
                .backoff_multiplier
                .unwrap_or(default.backoff_multiplier),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
            keepalive_time_secs: 10,
            keepalive_timeout_secs: 20,
            max_connection_idle_secs: 30,
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            demo_password: "password".to_string(),
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
            deadline_secs: 3,
            keepalive_time_secs: 10,
            keepalive_timeout_secs: 20,
            connect_timeout_secs: 20,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 120_000,
            backoff_multiplier: 1.6,
        }
    }
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            auth: AuthSettings::default(),
            client: ClientSettings::default(),
        }
    }
}
