mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{AuthSettings, ClientSettings, ServerSettings, Settings};

/// Prefix for environment overrides, e.g. `POPCHAT__SERVER__PORT=9000`.
pub const ENV_PREFIX: &str = "POPCHAT";

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
/// Returns a `Settings` struct containing the server, auth and client configurations
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();

    Ok(Settings {
        server: match partial.server {
            Some(server) => server.merge(default.server),
            None => default.server,
        },
        auth: match partial.auth {
            Some(auth) => auth.merge(default.auth),
            None => default.auth,
        },
        client: match partial.client {
            Some(client) => client.merge(default.client),
            None => default.client,
        },
    })
}
