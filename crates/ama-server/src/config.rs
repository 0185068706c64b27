use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use ama_api::rate_limit::RateLimitConfig;
use ama_api::timeout::{API_TIMEOUT, GENERAL_TIMEOUT};
use ama_gateway::GatewayConfig;

/// Placeholder secrets that leave bearer identity disabled.
const PLACEHOLDER_SECRETS: &[&str] = &["", "change-me", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: Option<String>,
    pub request_timeout: Duration,
    pub general_timeout: Duration,
    pub secure_cookies: bool,
    pub gateway: GatewayConfig,
    pub rate_limit: RateLimitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            db_path: "ama.db".into(),
            jwt_secret: None,
            request_timeout: API_TIMEOUT,
            general_timeout: GENERAL_TIMEOUT,
            secure_cookies: false,
            gateway: GatewayConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Read `AMA_*` variables, falling back to defaults for anything unset.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let jwt_secret = std::env::var("AMA_JWT_SECRET")
            .ok()
            .filter(|s| !PLACEHOLDER_SECRETS.contains(&s.as_str()));

        Ok(Self {
            host: env_or("AMA_HOST", defaults.host)?,
            port: env_or("AMA_PORT", defaults.port)?,
            db_path: env_or("AMA_DB_PATH", defaults.db_path)?,
            jwt_secret,
            request_timeout: Duration::from_secs(env_or(
                "AMA_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
            general_timeout: Duration::from_secs(env_or(
                "AMA_GENERAL_TIMEOUT_SECS",
                defaults.general_timeout.as_secs(),
            )?),
            secure_cookies: env_or("AMA_SECURE_COOKIES", defaults.secure_cookies)?,
            gateway: defaults.gateway,
            rate_limit: defaults.rate_limit,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
