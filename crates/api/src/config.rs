//! Runtime configuration, read from environment variables at startup.
//!
//! | Variable                | Default                 |
//! |-------------------------|-------------------------|
//! | `BIND_ADDR`             | `0.0.0.0:8080`          |
//! | `USE_PERSISTENT_STORES` | `false`                 |
//! | `DATABASE_URL`          | required if persistent  |
//! | `STOREFRONT_TENANT_ID`  | none                    |
//! | `PUBLIC_BASE_URL`       | `http://localhost:8080` |
//! | `SHOP_PAGE_SIZE`        | `20` (max 100)          |

use std::net::SocketAddr;

use thiserror::Error;

use storefront_core::TenantId;
use storefront_infra::catalog::Pagination;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is required when {reason}")]
    Missing { var: &'static str, reason: &'static str },

    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    /// Tenant served when a request carries no `X-Tenant-Id` header.
    pub storefront_tenant_id: Option<TenantId>,
    /// Absolute origin used for sitemap URLs, without a trailing slash.
    pub public_base_url: String,
    pub shop_page_size: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            use_persistent_stores: false,
            database_url: None,
            storefront_tenant_id: None,
            public_base_url: "http://localhost:8080".to_string(),
            shop_page_size: 20,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let bind_addr = match get("BIND_ADDR") {
            Some(raw) => raw.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
                var: "BIND_ADDR",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => defaults.bind_addr,
        };

        let use_persistent_stores = match get("USE_PERSISTENT_STORES") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| ConfigError::Invalid {
                var: "USE_PERSISTENT_STORES",
                value: raw.clone(),
                reason: "expected true or false".to_string(),
            })?,
            None => false,
        };

        let database_url = get("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing {
                var: "DATABASE_URL",
                reason: "USE_PERSISTENT_STORES=true",
            });
        }

        let storefront_tenant_id = get("STOREFRONT_TENANT_ID")
            .map(|raw| {
                raw.parse::<TenantId>().map_err(|e| ConfigError::Invalid {
                    var: "STOREFRONT_TENANT_ID",
                    value: raw.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        let public_base_url = get("PUBLIC_BASE_URL")
            .map(|raw| raw.trim_end_matches('/').to_string())
            .unwrap_or(defaults.public_base_url);

        let shop_page_size = match get("SHOP_PAGE_SIZE") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if n > 0 => n.min(Pagination::MAX_LIMIT),
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "SHOP_PAGE_SIZE",
                        value: raw,
                        reason: "expected a positive integer".to_string(),
                    });
                }
            },
            None => defaults.shop_page_size,
        };

        Ok(Self {
            bind_addr,
            use_persistent_stores,
            database_url,
            storefront_tenant_id,
            public_base_url,
            shop_page_size,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
