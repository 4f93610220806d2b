use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;

/// Reconnect policy for the managed loop. Disabled by default: callers that
/// want the loop to survive transport errors opt in explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    /// Max consecutive attempts per outage before the loop fails.
    pub max_attempts: u32,
    /// Delay before the first attempt; doubles per attempt, capped at 60s.
    pub initial_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 5,
            initial_delay_ms: 1_000,
        }
    }
}

impl ReconnectPolicy {
    /// Reconnect with the default attempt budget and backoff.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub api_key: Secret<String>,
    pub api_secret: Secret<String>,
    pub testnet: bool,
    pub base_url: Option<String>,
    pub connect_timeout_ms: u64,
    /// Bound on the wait for the auth acknowledgement frame.
    pub auth_timeout_ms: u64,
    /// Validity window stamped into each login signature.
    pub auth_window_ms: i64,
    pub reconnect: ReconnectPolicy,
}

// Custom Serialize implementation - never expose secrets in serialization
impl Serialize for EngineConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("EngineConfig", 8)?;
        state.serialize_field("api_key", "[REDACTED]")?;
        state.serialize_field("api_secret", "[REDACTED]")?;
        state.serialize_field("testnet", &self.testnet)?;
        state.serialize_field("base_url", &self.base_url)?;
        state.serialize_field("connect_timeout_ms", &self.connect_timeout_ms)?;
        state.serialize_field("auth_timeout_ms", &self.auth_timeout_ms)?;
        state.serialize_field("auth_window_ms", &self.auth_window_ms)?;
        state.serialize_field("reconnect", &self.reconnect)?;
        state.end()
    }
}

// Custom Deserialize implementation
impl<'de> Deserialize<'de> for EngineConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct EngineConfigHelper {
            api_key: String,
            api_secret: String,
            #[serde(default)]
            testnet: bool,
            base_url: Option<String>,
            connect_timeout_ms: Option<u64>,
            auth_timeout_ms: Option<u64>,
            auth_window_ms: Option<i64>,
            reconnect: Option<ReconnectPolicy>,
        }

        let helper = EngineConfigHelper::deserialize(deserializer)?;
        let defaults = Self::read_only();
        Ok(Self {
            api_key: Secret::new(helper.api_key),
            api_secret: Secret::new(helper.api_secret),
            testnet: helper.testnet,
            base_url: helper.base_url,
            connect_timeout_ms: helper
                .connect_timeout_ms
                .unwrap_or(defaults.connect_timeout_ms),
            auth_timeout_ms: helper.auth_timeout_ms.unwrap_or(defaults.auth_timeout_ms),
            auth_window_ms: helper.auth_window_ms.unwrap_or(defaults.auth_window_ms),
            reconnect: helper.reconnect.unwrap_or_default(),
        })
    }
}

impl EngineConfig {
    /// Create a new configuration with API credentials
    #[must_use]
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key: Secret::new(api_key),
            api_secret: Secret::new(api_secret),
            ..Self::read_only()
        }
    }

    /// Create configuration from environment variables
    ///
    /// Expected environment variables:
    /// - `{PREFIX}_API_KEY`
    /// - `{PREFIX}_API_SECRET`
    /// - `{PREFIX}_TESTNET` (optional, defaults to false)
    /// - `{PREFIX}_WS_URL` (optional)
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let api_key_var = format!("{}_API_KEY", prefix.to_uppercase());
        let api_secret_var = format!("{}_API_SECRET", prefix.to_uppercase());
        let testnet_var = format!("{}_TESTNET", prefix.to_uppercase());
        let ws_url_var = format!("{}_WS_URL", prefix.to_uppercase());

        let api_key = env::var(&api_key_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(api_key_var))?;

        let api_secret = env::var(&api_secret_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(api_secret_var))?;

        let testnet = env::var(&testnet_var)
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let base_url = env::var(&ws_url_var).ok();

        Ok(Self {
            testnet,
            base_url,
            ..Self::new(api_key, api_secret)
        })
    }

    /// Create configuration from a .env file and environment variables
    ///
    /// Loads environment variables from the given file (if it exists), then
    /// reads the configuration using the standard variable names.
    ///
    /// **Security Warning**: Never commit .env files to version control!
    #[cfg(feature = "env-file")]
    pub fn from_env_file(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(prefix, ".env")
    }

    /// Create configuration from a specific .env file path
    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(prefix: &str, env_file_path: &str) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(_) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {
                // Missing .env file is fine - fall through to system env vars
            }
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(prefix)
    }

    /// Configuration without credentials, for public endpoints only
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            api_key: Secret::new(String::new()),
            api_secret: Secret::new(String::new()),
            testnet: false,
            base_url: None,
            connect_timeout_ms: 10_000,
            auth_timeout_ms: 5_000,
            auth_window_ms: 5_000,
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Check if this configuration has credentials for private endpoints
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.api_key.expose_secret().is_empty() && !self.api_secret.expose_secret().is_empty()
    }

    /// Set testnet mode
    #[must_use]
    pub fn testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        self
    }

    /// Set custom WebSocket host
    #[must_use]
    pub fn base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Set the reconnect policy for the managed loop
    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Get API key (use carefully - exposes secret)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Get API secret (use carefully - exposes secret)
    pub fn api_secret(&self) -> &str {
        self.api_secret.expose_secret()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::read_only()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
