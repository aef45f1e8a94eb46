// ABOUTME: Server configuration loaded from environment variables
// ABOUTME: Required settings fail startup loudly; tunables fall back to safe defaults

use std::env;
use std::num::ParseIntError;
use std::time::Duration;

use patchbox_quota::QuotaPolicy;
use thiserror::Error;

const DEFAULT_PORT: &str = "4100";
const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";
const DEFAULT_RATE_LIMIT_MAX: u32 = 5;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 600;
const DEFAULT_IDEMPOTENCY_TTL_SECS: u64 = 300;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port number: {0}")]
    InvalidPort(#[from] ParseIntError),
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid API token entry '{0}', expected token:user")]
    InvalidTokenEntry(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub cors_origin: String,
    /// Upstash-compatible Redis REST endpoint. When either half of the
    /// pair is missing the quota stores run in-process only.
    pub redis_rest_url: Option<String>,
    pub redis_rest_token: Option<String>,
    pub sandbox_api_url: String,
    pub sandbox_api_key: String,
    /// SQLite challenge database. Absent means bundled catalog only.
    pub database_url: Option<String>,
    pub quota_policy: QuotaPolicy,
    pub idempotency_ttl: Duration,
    /// Static bearer-token table mapping tokens to user ids.
    pub api_tokens: Vec<(String, String)>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port_str = env::var("PORT").unwrap_or_else(|_| DEFAULT_PORT.to_string());
        let port = port_str.parse::<u16>()?;
        if port == 0 {
            return Err(ConfigError::PortOutOfRange(port));
        }

        let cors_origin =
            env::var("CORS_ORIGIN").unwrap_or_else(|_| DEFAULT_CORS_ORIGIN.to_string());

        let sandbox_api_url =
            env::var("SANDBOX_API_URL").map_err(|_| ConfigError::MissingVar("SANDBOX_API_URL"))?;
        let sandbox_api_key =
            env::var("SANDBOX_API_KEY").map_err(|_| ConfigError::MissingVar("SANDBOX_API_KEY"))?;

        let limit = env::var("RATE_LIMIT_MAX")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(DEFAULT_RATE_LIMIT_MAX);
        let window_secs = env::var("RATE_LIMIT_WINDOW_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECS);
        let ttl_secs = env::var("IDEMPOTENCY_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(DEFAULT_IDEMPOTENCY_TTL_SECS);

        let api_tokens = parse_token_table(
            &env::var("API_TOKENS").unwrap_or_default(),
        )?;

        Ok(Config {
            port,
            cors_origin,
            redis_rest_url: env::var("REDIS_REST_URL").ok(),
            redis_rest_token: env::var("REDIS_REST_TOKEN").ok(),
            sandbox_api_url,
            sandbox_api_key,
            database_url: env::var("DATABASE_URL").ok(),
            quota_policy: QuotaPolicy {
                limit,
                window: Duration::from_secs(window_secs),
            },
            idempotency_ttl: Duration::from_secs(ttl_secs),
            api_tokens,
        })
    }
}

/// Parses `token:user` pairs from a comma-separated list.
fn parse_token_table(raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let mut tokens = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.split_once(':') {
            Some((token, user)) if !token.is_empty() && !user.is_empty() => {
                tokens.push((token.to_string(), user.to_string()));
            }
            _ => return Err(ConfigError::InvalidTokenEntry(entry.to_string())),
        }
    }
    Ok(tokens)
}
