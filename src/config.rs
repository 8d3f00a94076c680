use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub url: String,
    pub ack_timeout: Duration,
    pub reconnect_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub bucket: String,
}

#[derive(Debug, Clone)]
pub struct CompositorSettings {
    pub url: String,
    pub api_key: Option<String>,
}

/// Process configuration, read once from the environment at startup.
#[derive(Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    pub database_pool_size: usize,
    pub jwt_secret: String,
    pub system_token_ttl_secs: usize,
    pub relay: Option<RelaySettings>,
    pub storage: StorageSettings,
    pub compositor: Option<CompositorSettings>,
    pub shapes_file: Option<PathBuf>,
    pub default_countdown_secs: i32,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("database", &self.database_url.is_some())
            .field("relay", &self.relay.as_ref().map(|r| &r.url))
            .field("storage", &self.storage.endpoint)
            .field("compositor", &self.compositor.as_ref().map(|c| &c.url))
            .field("shapes_file", &self.shapes_file)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let relay = match get("RELAY_URL") {
            Some(url) => Some(RelaySettings {
                url,
                ack_timeout: Duration::from_millis(parse_or(&get, "RELAY_ACK_TIMEOUT_MS", 5000)?),
                reconnect_interval: Duration::from_millis(parse_or(
                    &get,
                    "RELAY_RECONNECT_INTERVAL_MS",
                    2000,
                )?),
            }),
            None => None,
        };

        Ok(Config {
            bind_addr: parse_or(&get, "BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000)))?,
            database_url: get("DATABASE_URL"),
            database_pool_size: parse_or(&get, "DATABASE_POOL_SIZE", 10)?,
            jwt_secret: get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?,
            system_token_ttl_secs: parse_or(&get, "SYSTEM_TOKEN_TTL_SECS", 60)?,
            relay,
            storage: StorageSettings {
                endpoint: get("STORAGE_ENDPOINT"),
                api_key: get("STORAGE_API_KEY"),
                bucket: get("STORAGE_BUCKET").unwrap_or_else(|| "snaps".to_string()),
            },
            compositor: get("COMPOSITOR_URL").map(|url| CompositorSettings {
                url,
                api_key: get("COMPOSITOR_API_KEY"),
            }),
            shapes_file: get("SHAPES_FILE").map(PathBuf::from),
            default_countdown_secs: parse_or(&get, "DEFAULT_COUNTDOWN_SECS", 10)?,
        })
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_only_the_secret_is_set() {
        let config = Config::from_lookup(lookup(&[("JWT_SECRET", "s3cret")])).unwrap();
        assert_eq!(config.bind_addr, SocketAddr::from(([127, 0, 0, 1], 3000)));
        assert!(config.database_url.is_none());
        assert!(config.relay.is_none());
        assert!(config.compositor.is_none());
        assert_eq!(config.storage.bucket, "snaps");
        assert_eq!(config.default_countdown_secs, 10);
        assert_eq!(config.system_token_ttl_secs, 60);
    }

    #[test]
    fn missing_secret_fails_fast() {
        let err = Config::from_lookup(lookup(&[("JWT_SECRET", "  ")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("JWT_SECRET")));
    }

    #[test]
    fn relay_timings_are_read_in_milliseconds() {
        let config = Config::from_lookup(lookup(&[
            ("JWT_SECRET", "s"),
            ("RELAY_URL", "ws://relay:9000"),
            ("RELAY_ACK_TIMEOUT_MS", "750"),
        ]))
        .unwrap();
        let relay = config.relay.unwrap();
        assert_eq!(relay.ack_timeout, Duration::from_millis(750));
        assert_eq!(relay.reconnect_interval, Duration::from_millis(2000));
    }

    #[test]
    fn unparsable_numbers_name_the_variable() {
        let err = Config::from_lookup(lookup(&[
            ("JWT_SECRET", "s"),
            ("DEFAULT_COUNTDOWN_SECS", "ten"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { name: "DEFAULT_COUNTDOWN_SECS", .. }
        ));
    }

    #[test]
    fn debug_output_omits_the_secret() {
        let config = Config::from_lookup(lookup(&[("JWT_SECRET", "hunter2")])).unwrap();
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
