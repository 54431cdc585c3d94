//! # Configuration
//!
//! Loader and router-factory options. Both can be built in code, read from a
//! YAML file, or overlaid from environment variables.
//!
//! ## YAML
//!
//! ```yaml
//! loader:
//!   auth_headers:
//!     Authorization: "Bearer abc"
//!   auth_query_params:
//!     api_key: "123"
//!   http_timeout_secs: 10
//!   max_concurrent_fetches: 8
//! router:
//!   require_security_handlers: true
//!   mount_not_implemented_handler: false
//!   operation_model_key: openapiOperation
//! ```
//!
//! ## Environment Variables
//!
//! - `BRRTC_AUTH_HEADER_<NAME>`: header sent with every remote fetch.
//!   `<NAME>` is lower-cased and `_` becomes `-`, so
//!   `BRRTC_AUTH_HEADER_X_API_KEY` sends `x-api-key`.
//! - `BRRTC_AUTH_QUERY_<NAME>`: query parameter appended to every remote
//!   fetch. `<NAME>` keeps its case, since query names are case-sensitive.
//! - `BRRTC_HTTP_TIMEOUT_SECS`: per-request timeout for remote fetches;
//!   `0` disables the timeout.
//! - `BRRTC_MAX_CONCURRENT_FETCHES`: upper bound on simultaneous fetches.

use crate::error::{ContractError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;
use std::path::Path;

const AUTH_HEADER_PREFIX: &str = "BRRTC_AUTH_HEADER_";
const AUTH_QUERY_PREFIX: &str = "BRRTC_AUTH_QUERY_";

/// Options for [`ContractLoader`](crate::spec::ContractLoader).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoaderOptions {
    /// Headers attached to every remote fetch
    pub auth_headers: BTreeMap<String, String>,
    /// Query parameters appended to every remote fetch
    pub auth_query_params: BTreeMap<String, String>,
    /// `0` means no timeout
    pub http_timeout_secs: u64,
    pub max_concurrent_fetches: usize,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            auth_headers: BTreeMap::new(),
            auth_query_params: BTreeMap::new(),
            http_timeout_secs: 30,
            max_concurrent_fetches: 16,
        }
    }
}

impl LoaderOptions {
    pub fn from_env() -> Self {
        let mut options = Self::default();
        options.overlay(env::vars());
        options
    }

    /// Remote fetch timeout, `None` when disabled.
    pub fn http_timeout(&self) -> Option<Duration> {
        (self.http_timeout_secs > 0).then(|| Duration::from_secs(self.http_timeout_secs))
    }

    /// Applies `BRRTC_*` variables on top of the current values.
    pub fn overlay(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in vars {
            if let Some(name) = key.strip_prefix(AUTH_HEADER_PREFIX) {
                let name = name.to_ascii_lowercase().replace('_', "-");
                self.auth_headers.insert(name, value);
            } else if let Some(name) = key.strip_prefix(AUTH_QUERY_PREFIX) {
                self.auth_query_params.insert(name.to_string(), value);
            } else if key == "BRRTC_HTTP_TIMEOUT_SECS" {
                match value.parse() {
                    Ok(secs) => self.http_timeout_secs = secs,
                    Err(_) => tracing::warn!(value = %value, "ignoring invalid BRRTC_HTTP_TIMEOUT_SECS"),
                }
            } else if key == "BRRTC_MAX_CONCURRENT_FETCHES" {
                match value.parse() {
                    Ok(n) if n > 0 => self.max_concurrent_fetches = n,
                    _ => tracing::warn!(value = %value, "ignoring invalid BRRTC_MAX_CONCURRENT_FETCHES"),
                }
            }
        }
    }

    pub fn with_auth_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_auth_query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth_query_params.insert(name.into(), value.into());
        self
    }
}

/// Options for [`RouterFactory`](crate::router::RouterFactory).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RouterFactoryOptions {
    /// Fail router construction when a security requirement has no handler
    pub require_security_handlers: bool,
    /// Mount a 501 fallback for operations without a user handler
    pub mount_not_implemented_handler: bool,
    /// Request-context key under which the operation model is exposed
    pub operation_model_key: Option<String>,
}

impl Default for RouterFactoryOptions {
    fn default() -> Self {
        Self {
            require_security_handlers: true,
            mount_not_implemented_handler: true,
            operation_model_key: None,
        }
    }
}

/// Whole configuration file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContractConfig {
    pub loader: LoaderOptions,
    pub router: RouterFactoryOptions,
}

impl ContractConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| ContractError::Config(e.to_string()))
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
            .map_err(|e| ContractError::Config(format!("{}: {e}", path.display())))
    }
}
