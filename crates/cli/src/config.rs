//! Server configuration: an optional TOML file, then environment overrides,
//! then command-line overrides. Validation reports every problem at once.
//!
//! ```toml
//! [server]
//! port = 8080
//! rate_limit = 60
//!
//! [database]
//! url = "sqlite://openaero.db"
//!
//! [features]
//! bom_dual_write = true
//!
//! [payments]
//! alipay_public_key = "base64 Ed25519 verifying key"
//! wechat_api_key = "..."
//! platform_fee_rate = "0.10"
//!
//! [tokens.s3cr3t-admin-token]
//! user_id = "admin-1"
//! role = "ADMIN"
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use openaero_market::flags::{parse_flag, BOM_DUAL_WRITE_ENV};
use openaero_market::payment::Ed25519Verifier;
use openaero_market::{Actor, FeatureFlags, FixedRateRevenueShare, Role};
use rust_decimal::Decimal;
use serde::Deserialize;

pub const MEMORY_DATABASE: &str = "memory";
pub const DEFAULT_PORT: u16 = 8080;
/// Requests per minute per IP.
pub const DEFAULT_RATE_LIMIT: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {message}")]
    Read { path: String, message: String },

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub features: FeatureFlags,
    pub payments: PaymentSettings,
    /// API tokens keyed by the token string.
    pub tokens: BTreeMap<String, TokenEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    pub port: u16,
    pub rate_limit: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseSettings {
    /// `memory` or `sqlite://path`.
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PaymentSettings {
    pub alipay_public_key: Option<String>,
    pub wechat_api_key: Option<String>,
    pub platform_fee_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenEntry {
    pub user_id: String,
    pub role: String,
}

/// Values given on the command line; they win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub database_url: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            port: DEFAULT_PORT,
            rate_limit: DEFAULT_RATE_LIMIT,
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            url: MEMORY_DATABASE.to_string(),
            max_connections: openaero_sqlite::DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl Default for PaymentSettings {
    fn default() -> Self {
        PaymentSettings {
            alipay_public_key: None,
            wechat_api_key: None,
            platform_fee_rate: FixedRateRevenueShare::DEFAULT_RATE,
        }
    }
}

/// Read and parse a config file. No environment is applied.
pub fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let read_error = |message: String| ConfigError::Read {
        path: path.display().to_string(),
        message,
    };
    let content = std::fs::read_to_string(path).map_err(|e| read_error(e.to_string()))?;
    toml::from_str(&content).map_err(|e| read_error(e.to_string()))
}

impl Config {
    /// File (if any), then process environment, then `overrides`; validated.
    pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<Config, ConfigError> {
        let mut config = match path {
            Some(p) => read_config(p)?,
            None => Config::default(),
        };
        let mut problems = config.apply_env(|key| std::env::var(key).ok());
        config.apply_overrides(overrides);
        problems.extend(config.validate());
        if problems.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// Apply environment overrides through `lookup`. Returns values that
    /// could not be parsed; those leave the setting unchanged.
    pub fn apply_env<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut problems = Vec::new();
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup("OPENAERO_DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(raw) = lookup("OPENAERO_PORT") {
            match raw.trim().parse() {
                Ok(port) => self.server.port = port,
                Err(_) => problems.push(format!("OPENAERO_PORT: '{raw}' is not a port number")),
            }
        }
        if let Some(raw) = lookup(BOM_DUAL_WRITE_ENV) {
            match parse_flag(&raw) {
                Some(on) => self.features.bom_dual_write = on,
                None => problems.push(format!("{BOM_DUAL_WRITE_ENV}: '{raw}' is not a boolean")),
            }
        }
        if let Some(key) = lookup("ALIPAY_PUBLIC_KEY") {
            self.payments.alipay_public_key = Some(key.trim().to_string());
        }
        if let Some(key) = lookup("WECHAT_API_KEY") {
            self.payments.wechat_api_key = Some(key);
        }
        if let Some(raw) = lookup("OPENAERO_RATE_LIMIT") {
            match raw.trim().parse() {
                Ok(limit) => self.server.rate_limit = limit,
                Err(_) => problems.push(format!("OPENAERO_RATE_LIMIT: '{raw}' is not a number")),
            }
        }
        if let Some(raw) = lookup("OPENAERO_PLATFORM_FEE_RATE") {
            match raw.trim().parse() {
                Ok(rate) => self.payments.platform_fee_rate = rate,
                Err(_) => problems.push(format!(
                    "OPENAERO_PLATFORM_FEE_RATE: '{raw}' is not a decimal"
                )),
            }
        }
        if let Some(raw) = lookup("OPENAERO_API_TOKENS") {
            for (i, entry) in raw.split(',').map(str::trim).enumerate() {
                if entry.is_empty() {
                    continue;
                }
                let parts: Vec<&str> = entry.splitn(3, ':').collect();
                match parts.as_slice() {
                    [token, user_id, role] => {
                        self.tokens.insert(
                            token.to_string(),
                            TokenEntry {
                                user_id: user_id.to_string(),
                                role: role.to_string(),
                            },
                        );
                    }
                    _ => problems.push(format!(
                        "OPENAERO_API_TOKENS entry {}: expected token:user_id:ROLE",
                        i + 1
                    )),
                }
            }
        }
        problems
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(url) = overrides.database_url {
            self.database.url = url;
        }
    }

    /// Every problem with the resolved settings.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.database.url != MEMORY_DATABASE && !self.database.url.starts_with("sqlite:") {
            problems.push(format!(
                "database url '{}' must be '{MEMORY_DATABASE}' or sqlite://<path>",
                self.database.url
            ));
        }
        if self.database.max_connections == 0 {
            problems.push("database max_connections must be at least 1".to_string());
        }
        if self.server.port == 0 {
            problems.push("server port must not be 0".to_string());
        }
        if self.server.rate_limit == 0 {
            problems.push("server rate_limit must be at least 1".to_string());
        }
        if let Err(e) = FixedRateRevenueShare::new(self.payments.platform_fee_rate) {
            problems.push(e.to_string());
        }
        if let Some(key) = &self.payments.alipay_public_key {
            if let Err(e) = Ed25519Verifier::from_base64(key) {
                problems.push(format!("alipay_public_key: {e}"));
            }
        }
        if self
            .payments
            .wechat_api_key
            .as_deref()
            .is_some_and(|k| k.trim().is_empty())
        {
            problems.push("wechat_api_key must not be empty".to_string());
        }
        for (token, entry) in &self.tokens {
            let label = token_label(token);
            if token.trim().is_empty() {
                problems.push("API tokens must not be empty".to_string());
            }
            if entry.user_id.trim().is_empty() {
                problems.push(format!("token {label}: user_id must not be empty"));
            }
            if entry.role.parse::<Role>().is_err() {
                problems.push(format!("token {label}: unknown role '{}'", entry.role));
            }
        }
        problems
    }

    /// Token to actor map for the auth middleware. Entries with an unknown
    /// role are skipped; [`Config::validate`] reports them.
    pub fn actors(&self) -> HashMap<String, Actor> {
        self.tokens
            .iter()
            .filter_map(|(token, entry)| {
                let role = entry.role.parse::<Role>().ok()?;
                Some((token.clone(), Actor::new(entry.user_id.clone(), role)))
            })
            .collect()
    }

    pub fn alipay_verifier(&self) -> Result<Option<Ed25519Verifier>, String> {
        self.payments
            .alipay_public_key
            .as_deref()
            .map(Ed25519Verifier::from_base64)
            .transpose()
    }
}

/// Tokens are secrets; only their first characters go into messages.
fn token_label(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    format!("'{prefix}...'")
}
