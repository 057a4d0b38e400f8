//! Configuration loading and representation.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

const DEV_JWT_SECRET: &str = "dev-secret";
const DEV_SIGNING_SECRET: &str = "dev-signing-secret";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime settings for the export service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportConfig {
    pub bind_addr: String,
    pub jwt_secret: String,
    /// Object-storage bucket for durable artifacts.
    pub bucket: String,
    /// Lifetime of issued download URLs.
    pub url_ttl: Duration,
    /// HMAC key for locally signed storage URLs.
    pub signing_secret: String,
    /// Base used when building download links (no trailing slash).
    pub public_base_url: String,
    /// Page size used to fetch "everything" from the data sources.
    pub fetch_page_size: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            bucket: "exports".to_string(),
            url_ttl: Duration::from_secs(24 * 60 * 60),
            signing_secret: DEV_SIGNING_SECRET.to_string(),
            public_base_url: "http://localhost:8080".to_string(),
            fetch_page_size: 10_000,
        }
    }
}

impl ExportConfig {
    /// Load from process environment, falling back to development defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let jwt_secret = lookup("JWT_SECRET").unwrap_or_else(|| {
            warn!("JWT_SECRET not set; using insecure dev default");
            defaults.jwt_secret.clone()
        });
        let signing_secret = lookup("EXPORTKIT_SIGNING_SECRET").unwrap_or_else(|| {
            warn!("EXPORTKIT_SIGNING_SECRET not set; using insecure dev default");
            defaults.signing_secret.clone()
        });

        let url_ttl = match lookup("EXPORTKIT_URL_TTL_SECS") {
            Some(raw) => Duration::from_secs(parse_positive("EXPORTKIT_URL_TTL_SECS", &raw)?),
            None => defaults.url_ttl,
        };
        let fetch_page_size = match lookup("EXPORTKIT_FETCH_PAGE_SIZE") {
            Some(raw) => {
                let size = parse_positive("EXPORTKIT_FETCH_PAGE_SIZE", &raw)?;
                u32::try_from(size).map_err(|e| ConfigError::Invalid {
                    key: "EXPORTKIT_FETCH_PAGE_SIZE",
                    value: raw.clone(),
                    reason: e.to_string(),
                })?
            }
            None => defaults.fetch_page_size,
        };

        Ok(Self {
            bind_addr: lookup("EXPORTKIT_BIND_ADDR").unwrap_or(defaults.bind_addr),
            jwt_secret,
            bucket: lookup("EXPORTKIT_BUCKET").unwrap_or(defaults.bucket),
            url_ttl,
            signing_secret,
            public_base_url: lookup("EXPORTKIT_PUBLIC_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.public_base_url),
            fetch_page_size,
        })
    }
}

fn parse_positive(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    let value: u64 = raw.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
