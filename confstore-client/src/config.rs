//! Client configuration, loaded from `CONFSTORE_*` environment variables.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};

const DEFAULT_URL: &str = "http://localhost:8080";
const DEFAULT_LONG_POLL_SECS: u64 = 60;
const DEFAULT_RETRY_INTERVAL_MS: u64 = 1000;

const ENV_CONFSTORE_URL: &str = "CONFSTORE_URL";
const ENV_CONFSTORE_USER: &str = "CONFSTORE_USER";
const ENV_CONFSTORE_PASSWORD: &str = "CONFSTORE_PASSWORD";
const ENV_CONFSTORE_LONG_POLL_SECS: &str = "CONFSTORE_LONG_POLL_SECS";
const ENV_CONFSTORE_RETRY_INTERVAL_MS: &str = "CONFSTORE_RETRY_INTERVAL_MS";

/// Connection settings for the remote config store.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// How long the store may hold a watch request open before answering
    /// not-modified. The HTTP client timeout is derived from this.
    pub long_poll_timeout: Duration,
    /// Delay before re-issuing a fetch after a long-poll timeout or a
    /// transient failure.
    pub retry_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            url: DEFAULT_URL.to_string(),
            user: None,
            password: None,
            long_poll_timeout: Duration::from_secs(DEFAULT_LONG_POLL_SECS),
            retry_interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
        }
    }
}

impl ClientConfig {
    pub fn load(
        env_vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Result<Self> {
        let env_vars: HashMap<String, String> = env_vars
            .into_iter()
            .map(|(key, val)| (key.into(), val.into()))
            .filter(|(key, _val)| {
                [
                    ENV_CONFSTORE_URL,
                    ENV_CONFSTORE_USER,
                    ENV_CONFSTORE_PASSWORD,
                    ENV_CONFSTORE_LONG_POLL_SECS,
                    ENV_CONFSTORE_RETRY_INTERVAL_MS,
                ]
                .contains(&key.as_str())
            })
            .collect();

        let mut config = ClientConfig::default();

        if let Some(url) = env_vars.get(ENV_CONFSTORE_URL) {
            config.url = url.trim_end_matches('/').to_string();
        }
        config.user = env_vars.get(ENV_CONFSTORE_USER).cloned();
        config.password = env_vars.get(ENV_CONFSTORE_PASSWORD).cloned();

        if let Some(secs) = env_vars.get(ENV_CONFSTORE_LONG_POLL_SECS) {
            let secs: u64 = secs.parse().map_err(|e| {
                Error::Config(format!("Parsing {ENV_CONFSTORE_LONG_POLL_SECS}: {e}"))
            })?;
            config.long_poll_timeout = Duration::from_secs(secs);
        }

        if let Some(millis) = env_vars.get(ENV_CONFSTORE_RETRY_INTERVAL_MS) {
            let millis: u64 = millis.parse().map_err(|e| {
                Error::Config(format!("Parsing {ENV_CONFSTORE_RETRY_INTERVAL_MS}: {e}"))
            })?;
            config.retry_interval = Duration::from_millis(millis);
        }

        Ok(config)
    }
}
