//! Process configuration, read from the environment.

use std::net::SocketAddr;

use thiserror::Error;

use tallyerp_reconciliation::InvoiceControlPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} is required")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub default_invoice_policy: InvoiceControlPolicy,
    pub contention_retries: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            store: StoreBackend::Memory,
            database_url: None,
            default_invoice_policy: InvoiceControlPolicy::Received,
            contention_retries: 1,
        }
    }
}

impl AppConfig {
    /// Read `TALLY_*` variables and `DATABASE_URL`; unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup("TALLY_BIND_ADDR") {
            config.bind_addr = raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                name: "TALLY_BIND_ADDR",
                value: raw.clone(),
                reason: e.to_string(),
            })?;
        }

        if let Some(raw) = lookup("TALLY_STORE") {
            config.store = match raw.trim().to_ascii_lowercase().as_str() {
                "memory" => StoreBackend::Memory,
                "postgres" => StoreBackend::Postgres,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "TALLY_STORE",
                        value: raw,
                        reason: "expected memory or postgres".to_string(),
                    });
                }
            };
        }

        config.database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        if config.store == StoreBackend::Postgres && config.database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        if let Some(raw) = lookup("TALLY_DEFAULT_INVOICE_POLICY") {
            config.default_invoice_policy = raw.parse().map_err(|e: tallyerp_core::DomainError| {
                ConfigError::Invalid {
                    name: "TALLY_DEFAULT_INVOICE_POLICY",
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?;
        }

        if let Some(raw) = lookup("TALLY_CONTENTION_RETRIES") {
            config.contention_retries = raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::Invalid {
                    name: "TALLY_CONTENTION_RETRIES",
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?;
        }

        Ok(config)
    }
}
