use crate::endpoint::EndpointSpec;
use crate::watermark::endpoint_key;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete gridpoll configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollerConfig {
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub api: ApiConfig,
    /// Added to (or replacing, by id) the built-in endpoints
    #[serde(default)]
    pub endpoints: Vec<EndpointSpec>,
}

/// Where watermark records live
#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_directory")]
    pub directory: PathBuf,
}

fn default_state_directory() -> PathBuf {
    PathBuf::from("state")
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            directory: default_state_directory(),
        }
    }
}

/// Where fetched payloads are written
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("output/incremental")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
        }
    }
}

/// Token exchange settings
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// Lifetime assumed when the provider does not advertise one
    #[serde(default = "default_nominal_ttl")]
    pub nominal_ttl_seconds: u64,
    /// Subtracted from the nominal lifetime to refresh early
    #[serde(default = "default_safety_buffer")]
    pub safety_buffer_seconds: u64,
    #[serde(default = "default_exchange_timeout")]
    pub exchange_timeout_seconds: u64,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

fn default_nominal_ttl() -> u64 {
    3600
}

fn default_safety_buffer() -> u64 {
    300
}

fn default_exchange_timeout() -> u64 {
    30
}

fn default_token_url() -> String {
    "https://ercotb2c.b2clogin.com/ercotb2c.onmicrosoft.com/B2C_1_PUBAPI-ROPC-FLOW/oauth2/v2.0/token"
        .to_string()
}

fn default_client_id() -> String {
    "fec253ea-0d06-4272-a5e6-b478baeecd70".to_string()
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            nominal_ttl_seconds: default_nominal_ttl(),
            safety_buffer_seconds: default_safety_buffer(),
            exchange_timeout_seconds: default_exchange_timeout(),
            token_url: default_token_url(),
            client_id: default_client_id(),
        }
    }
}

impl TokenConfig {
    pub fn nominal_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(clamp_secs(self.nominal_ttl_seconds))
    }

    pub fn safety_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(clamp_secs(self.safety_buffer_seconds))
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_seconds)
    }
}

/// Report API settings
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Delay between cycles for each endpoint in daemon mode
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

fn default_base_url() -> String {
    "https://api.ercot.com/api/public-reports".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    300
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_seconds: default_request_timeout(),
            poll_interval_seconds: default_poll_interval(),
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

// chrono panics past i64::MAX milliseconds
fn clamp_secs(secs: u64) -> i64 {
    secs.min((i64::MAX / 1000) as u64) as i64
}

impl PollerConfig {
    /// Rejects settings that would make the poller misbehave silently.
    pub fn validate(&self) -> Result<()> {
        if self.api.poll_interval_seconds == 0 {
            bail!("api.poll_interval_seconds must be greater than zero");
        }
        if self.api.request_timeout_seconds == 0 {
            bail!("api.request_timeout_seconds must be greater than zero");
        }
        if self.token.exchange_timeout_seconds == 0 {
            bail!("token.exchange_timeout_seconds must be greater than zero");
        }
        if self.token.safety_buffer_seconds >= self.token.nominal_ttl_seconds {
            tracing::warn!(
                nominal_ttl_secs = self.token.nominal_ttl_seconds,
                safety_buffer_secs = self.token.safety_buffer_seconds,
                "Safety buffer covers the whole token lifetime, tokens will be refreshed on every request"
            );
        }

        check_endpoints(&self.endpoints)
    }
}

/// Rejects endpoint lists whose entries would share a watermark record.
///
/// Ids are compared by their file-name key, so `rtm.lmp` and `rtm_lmp`
/// collide. Run it again on the final list once built-ins are merged in.
pub fn check_endpoints(endpoints: &[EndpointSpec]) -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for endpoint in endpoints {
        if endpoint.id.trim().is_empty() {
            bail!("endpoint with path '{}' has an empty id", endpoint.path);
        }
        if let Some(other) = seen.insert(endpoint_key(&endpoint.id), endpoint.id.as_str()) {
            if other == endpoint.id {
                bail!("duplicate endpoint id '{}'", endpoint.id);
            }
            bail!(
                "endpoint ids '{}' and '{}' map to the same state key '{}'",
                other,
                endpoint.id,
                endpoint_key(&endpoint.id)
            );
        }
        if endpoint.path.trim().is_empty() {
            bail!("endpoint '{}' has an empty path", endpoint.id);
        }
        if endpoint.bootstrap_lookback_seconds == 0 {
            bail!(
                "endpoint '{}' must have a non-zero bootstrap_lookback_seconds",
                endpoint.id
            );
        }
    }
    Ok(())
}

/// Load configuration from TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PollerConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: PollerConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    config.validate()?;
    Ok(config)
}
