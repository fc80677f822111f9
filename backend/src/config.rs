use std::time::Duration;

use ethereum_types::{H160, U256};
use secp256k1::SecretKey;

use crate::contract::abi::{parse_address, parse_units};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub app_env: String,
    pub network_url: String,
    pub contract_address: H160,
    pub admin_private_key: SecretKey,
    pub reward_amount: U256,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub max_submissions_per_cycle: u32,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub request_timeout: Duration,
    pub verdict_fail_open: bool,
    pub log_file: String,
    pub max_logs: usize,
    pub max_body_bytes: usize,
    pub receipt_poll_interval: Duration,
    pub receipt_poll_attempts: u32,
    /// Empty means any origin.
    pub allowed_origins: Vec<String>,
}

impl AppConfig {
    pub const DEFAULT_PORT: u16 = 8081;
    pub const DEFAULT_MAX_SUBMISSIONS: u32 = 5;
    pub const DEFAULT_CACHE_TTL_SECS: u64 = 5 * 60;
    pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;
    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
    pub const DEFAULT_MAX_LOGS: usize = 1000;

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let contract_address = get("CONTRACT_ADDRESS").ok_or(ConfigError::Missing("CONTRACT_ADDRESS"))?;
        let contract_address = parse_address(&contract_address).map_err(|e| ConfigError::Invalid {
            key: "CONTRACT_ADDRESS",
            reason: e.to_string(),
        })?;

        let key_hex = get("ADMIN_PRIVATE_KEY").ok_or(ConfigError::Missing("ADMIN_PRIVATE_KEY"))?;
        let admin_private_key = parse_secret_key(&key_hex)?;

        let openai_api_key = get("OPENAI_API_KEY").ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;

        let reward_amount = get("REWARD_AMOUNT").unwrap_or_else(|| "1".to_string());
        let reward_amount = parse_units(&reward_amount, 18).map_err(|e| ConfigError::Invalid {
            key: "REWARD_AMOUNT",
            reason: e.to_string(),
        })?;

        let max_body_bytes = match get("MAX_FILE_SIZE") {
            Some(v) => parse_byte_size(&v).ok_or_else(|| ConfigError::Invalid {
                key: "MAX_FILE_SIZE",
                reason: format!("cannot parse '{}'", v),
            })?,
            None => 10 * 1024 * 1024,
        };

        let allowed_origins = get("ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty() && o != "*")
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            port: parse_or(&get, "PORT", Self::DEFAULT_PORT)?,
            app_env: get("APP_ENV").unwrap_or_else(|| "development".to_string()),
            network_url: get("NETWORK_URL").unwrap_or_else(|| "http://localhost:8669".to_string()),
            contract_address,
            admin_private_key,
            reward_amount,
            openai_api_key,
            openai_base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
            max_submissions_per_cycle: parse_or(
                &get,
                "MAX_SUBMISSIONS_PER_CYCLE",
                Self::DEFAULT_MAX_SUBMISSIONS,
            )?,
            cache_ttl: Duration::from_secs(parse_or(
                &get,
                "SUBMISSION_CACHE_TTL_SECS",
                Self::DEFAULT_CACHE_TTL_SECS,
            )?),
            cache_capacity: parse_or(&get, "SUBMISSION_CACHE_CAPACITY", Self::DEFAULT_CACHE_CAPACITY)?
                .max(1),
            request_timeout: Duration::from_secs(parse_or(
                &get,
                "REQUEST_TIMEOUT_SECS",
                Self::DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
            verdict_fail_open: parse_or(&get, "VERDICT_FAIL_OPEN", true)?,
            log_file: get("LOG_FILE").unwrap_or_else(|| "logs/server.log".to_string()),
            max_logs: parse_or(&get, "MAX_LOGS", Self::DEFAULT_MAX_LOGS)?,
            max_body_bytes,
            receipt_poll_interval: Duration::from_millis(parse_or(
                &get,
                "RECEIPT_POLL_INTERVAL_MS",
                1000u64,
            )?),
            receipt_poll_attempts: parse_or(&get, "RECEIPT_POLL_ATTEMPTS", 30u32)?,
            allowed_origins,
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_secret_key(raw: &str) -> Result<SecretKey, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        key: "ADMIN_PRIVATE_KEY",
        reason,
    };
    let raw = raw.trim();
    let bytes = hex::decode(raw.strip_prefix("0x").unwrap_or(raw)).map_err(|e| invalid(e.to_string()))?;
    SecretKey::from_slice(&bytes).map_err(|e| invalid(e.to_string()))
}

/// Accepts `10mb`, `512kb`, `1gb` or a plain byte count.
fn parse_byte_size(raw: &str) -> Option<usize> {
    let lower = raw.trim().to_ascii_lowercase();
    let (digits, multiplier) = if let Some(n) = lower.strip_suffix("gb") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("mb") {
        (n, 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("kb") {
        (n, 1024)
    } else if let Some(n) = lower.strip_suffix('b') {
        (n, 1)
    } else {
        (lower.as_str(), 1)
    };
    digits.trim().parse::<usize>().ok()?.checked_mul(multiplier)
}
