//! Configuration management for the toolbox.

use crate::{atomic_write, CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// How requests reach campus hosts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutePreference {
    /// Probe the direct route, fall back to WebVPN when unreachable.
    #[default]
    Auto,
    /// Always connect directly (on-campus network).
    Direct,
    /// Always go through the WebVPN gateway.
    #[serde(rename = "webvpn")]
    WebVpn,
}

impl fmt::Display for RoutePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Direct => "direct",
            Self::WebVpn => "webvpn",
        })
    }
}

impl FromStr for RoutePreference {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "direct" => Ok(Self::Direct),
            "webvpn" | "vpn" => Ok(Self::WebVpn),
            other => Err(CoreError::Config(format!("unknown route preference: {other}"))),
        }
    }
}

/// Identity provider and gateway endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityProviderConfig {
    /// CAS login page; also the form submission target.
    pub login_url: String,
    /// PEM public key used to encrypt the password field.
    pub public_key_url: String,
    /// Asks whether the login needs a verification code.
    pub mfa_detect_url: String,
    /// Triggers delivery of a verification code.
    pub mfa_send_code_url: String,
    /// Checks a submitted verification code.
    pub mfa_verify_url: String,
    /// Image the login form asks to transcribe after repeated failures.
    pub captcha_url: String,
    /// WebVPN gateway origin.
    pub webvpn_base_url: String,
    /// Entry point that starts a WebVPN login through CAS.
    pub webvpn_login_url: String,
    /// Fetched with a short timeout to decide whether the direct route works.
    pub probe_url: String,
    pub request_timeout_secs: u64,
    pub probe_timeout_secs: u64,
}

impl Default for IdentityProviderConfig {
    fn default() -> Self {
        Self {
            login_url: "https://login.xjtu.edu.cn/cas/login".to_string(),
            public_key_url: "https://login.xjtu.edu.cn/cas/jwt/publicKey".to_string(),
            mfa_detect_url: "https://login.xjtu.edu.cn/cas/mfa/detect".to_string(),
            mfa_send_code_url: "https://login.xjtu.edu.cn/cas/mfa/securephone/send".to_string(),
            mfa_verify_url: "https://login.xjtu.edu.cn/cas/mfa/securephone/verify".to_string(),
            captcha_url: "https://login.xjtu.edu.cn/cas/captcha.jpg".to_string(),
            webvpn_base_url: "https://webvpn.xjtu.edu.cn".to_string(),
            webvpn_login_url: "https://webvpn.xjtu.edu.cn/login?oauth_login=true".to_string(),
            probe_url: "http://bkkq.xjtu.edu.cn/".to_string(),
            request_timeout_secs: 15,
            probe_timeout_secs: 3,
        }
    }
}

impl IdentityProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Validate every endpoint as an absolute URL.
    pub fn validate(&self) -> CoreResult<()> {
        for url in [
            &self.login_url,
            &self.public_key_url,
            &self.mfa_detect_url,
            &self.mfa_send_code_url,
            &self.mfa_verify_url,
            &self.captcha_url,
            &self.webvpn_base_url,
            &self.webvpn_login_url,
            &self.probe_url,
        ] {
            Url::parse(url)?;
        }
        Ok(())
    }
}

/// Retry limits and backoff curve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the first attempt for login, tunnel and challenge calls.
    pub login_max_retries: u32,
    /// Retries after the first attempt for idempotent queries.
    pub query_max_retries: u32,
    /// Retries after the first attempt for non-idempotent submissions.
    pub submission_max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Floor applied to the delay after a rate-limit response.
    pub rate_limit_min_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            login_max_retries: 2,
            query_max_retries: 3,
            submission_max_retries: 1,
            initial_delay_ms: 500,
            max_delay_ms: 8_000,
            rate_limit_min_delay_ms: 5_000,
        }
    }
}

/// Session lifetime and verification challenge timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// A session unused for this long is treated as expired.
    pub idle_timeout_secs: u64,
    /// How long an issued verification challenge stays answerable.
    pub challenge_ttl_secs: u64,
    /// Minimum spacing between two code deliveries for one challenge.
    pub code_resend_cooldown_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 15 * 60,
            challenge_ttl_secs: 5 * 60,
            code_resend_cooldown_secs: 60,
        }
    }
}

impl SessionSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn challenge_ttl(&self) -> Duration {
        Duration::from_secs(self.challenge_ttl_secs)
    }

    pub fn code_resend_cooldown(&self) -> Duration {
        Duration::from_secs(self.code_resend_cooldown_secs)
    }
}

/// Argon2id cost parameters for new vault keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfSettings {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfSettings {
    fn default() -> Self {
        Self {
            memory_kib: 65_536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

/// Main toolbox configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Route used by accounts that do not override it.
    #[serde(default)]
    pub route_preference: RoutePreference,
    #[serde(default)]
    pub identity: IdentityProviderConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub kdf: KdfSettings,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            route_preference: RoutePreference::default(),
            identity: IdentityProviderConfig::default(),
            retry: RetrySettings::default(),
            session: SessionSettings::default(),
            kdf: KdfSettings::default(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::new()
        };

        config.load_from_env();
        config.identity.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        atomic_write(&paths.config_file(), content.as_bytes())?;
        Ok(())
    }

    /// Override configuration from environment variables.
    ///
    /// `CAMPUS_LOG_LEVEL` and `CAMPUS_ROUTE` are honored; an unparseable
    /// route is ignored with a warning.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("CAMPUS_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(route) = std::env::var("CAMPUS_ROUTE") {
            match route.parse() {
                Ok(route) => self.route_preference = route,
                Err(err) => tracing::warn!(error = %err, "ignoring CAMPUS_ROUTE"),
            }
        }
    }
}
