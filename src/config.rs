use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::error::ModerationError;

/// Default moderation service endpoint (a locally running service).
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8787";
pub const DEFAULT_POLICY_REFRESH_SECONDS: u64 = 60;
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Where classification is expected to happen. Carried on every telemetry
/// event so operators can split outcomes by deployment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    OnDeviceOnly,
    CloudOnly,
    #[default]
    Hybrid,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::OnDeviceOnly => "ON_DEVICE_ONLY",
            Mode::CloudOnly => "CLOUD_ONLY",
            Mode::Hybrid => "HYBRID",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    /// Accepts `on_device_only`, `ON-DEVICE-ONLY`, `cloud_only`, `hybrid`, etc.
    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "on_device_only" => Ok(Mode::OnDeviceOnly),
            "cloud_only" => Ok(Mode::CloudOnly),
            "hybrid" => Ok(Mode::Hybrid),
            other => anyhow::bail!(
                "unknown mode {other:?} (expected on_device_only, cloud_only, or hybrid)"
            ),
        }
    }
}

/// Client configuration. Fixed for the lifetime of a ModerationClient.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub api_base_url: String,
    /// Whether moderation outcomes are reported to `/v1/events`.
    pub send_events: bool,
    /// Maximum policy age before the next access refreshes it.
    pub policy_refresh_seconds: u64,
    pub mode: Mode,
    /// Deadline for each network attempt.
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            send_events: true,
            policy_refresh_seconds: DEFAULT_POLICY_REFRESH_SECONDS,
            mode: Mode::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl ClientConfig {
    /// Defaults pointed at `api_base_url`.
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn policy_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.policy_refresh_seconds)
    }

    /// Reject configurations the client can't run with.
    pub fn validate(&self) -> std::result::Result<(), ModerationError> {
        let base = self.api_base_url.trim();
        if base.is_empty() {
            return Err(ModerationError::Config("api_base_url is empty".to_string()));
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ModerationError::Config(format!(
                "api_base_url must be an http(s) URL, got {base:?}"
            )));
        }
        if self.timeout_ms == 0 {
            return Err(ModerationError::Config(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration loaded from environment variables.
///
/// The API key comes from the environment only (never hardcoded). A .env file
/// is loaded by the binary at startup via dotenvy.
pub struct Config {
    pub api_key: String,
    pub client: ClientConfig,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Unset variables take their defaults; set-but-invalid ones are errors
    /// naming the variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let mut client = ClientConfig::default();
        if let Some(url) = get("MODGATE_API_BASE_URL") {
            client.api_base_url = url.trim().to_string();
        }
        if let Some(raw) = get("MODGATE_SEND_EVENTS") {
            client.send_events =
                parse_bool(&raw).with_context(|| format!("MODGATE_SEND_EVENTS={raw:?}"))?;
        }
        if let Some(raw) = get("MODGATE_POLICY_REFRESH_SECONDS") {
            client.policy_refresh_seconds = raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("MODGATE_POLICY_REFRESH_SECONDS={raw:?}"))?;
        }
        if let Some(raw) = get("MODGATE_MODE") {
            client.mode = raw
                .parse::<Mode>()
                .with_context(|| format!("MODGATE_MODE={raw:?}"))?;
        }
        if let Some(raw) = get("MODGATE_TIMEOUT_MS") {
            client.timeout_ms = raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("MODGATE_TIMEOUT_MS={raw:?}"))?;
        }

        Ok(Self {
            api_key: get("MODGATE_API_KEY").unwrap_or_default(),
            client,
        })
    }

    /// Check that the API key is configured.
    /// Call this before constructing a client from the environment.
    pub fn require_api_key(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            anyhow::bail!(
                "MODGATE_API_KEY not set. Add it to your .env file.\n\
                 See .env.example for the required variables."
            );
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got {other:?}"),
    }
}
