//! Configuration validation.
//!
//! Serde handles syntax; this checks the semantics before a config is
//! accepted. Every problem is reported, not just the first.

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;

/// Minimum read buffer hyper accepts for an HTTP/1 connection.
const MIN_BUF_SIZE: usize = 8192;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("at least one backend must be configured")]
    NoBackends,

    #[error("duplicate backend id '{0}'")]
    DuplicateBackend(String),

    #[error("backend '{id}' has an invalid url: {reason}")]
    InvalidBackendUrl { id: String, reason: String },

    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),

    #[error("{field} must start with '/', got '{value}'")]
    InvalidPath { field: &'static str, value: String },

    #[error("listener.scheme must be 'http' or 'https', got '{0}'")]
    InvalidScheme(String),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("health_check.timeout_secs ({timeout}) must be shorter than interval_secs ({interval})")]
    ProbeTimeoutTooLong { timeout: u64, interval: u64 },

    #[error("streaming.max_buf_size must be at least {MIN_BUF_SIZE}, got {0}")]
    BufferTooSmall(usize),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    let health_path = &config.listener.health_path;
    let captures = health_path
        .split('/')
        .any(|segment| segment.starts_with([':', '*']));
    if health_path == "/" || health_path.contains(['{', '}']) || captures {
        errors.push(ValidationError::InvalidPath {
            field: "listener.health_path",
            value: health_path.clone(),
        });
    } else {
        check_path(&mut errors, "listener.health_path", health_path);
    }
    if !matches!(config.listener.scheme.as_str(), "http" | "https") {
        errors.push(ValidationError::InvalidScheme(config.listener.scheme.clone()));
    }

    if config.backends.is_empty() {
        errors.push(ValidationError::NoBackends);
    }
    let mut seen = HashSet::new();
    for backend in &config.backends {
        let id = backend.id();
        if !seen.insert(id) {
            errors.push(ValidationError::DuplicateBackend(id.to_string()));
        }
        if let Err(reason) = check_backend_url(&backend.url) {
            errors.push(ValidationError::InvalidBackendUrl {
                id: id.to_string(),
                reason,
            });
        }
    }

    let health = &config.health_check;
    check_path(&mut errors, "health_check.path", &health.path);
    if health.enabled {
        if health.interval_secs == 0 {
            errors.push(ValidationError::ZeroDuration("health_check.interval_secs"));
        }
        if health.timeout_secs == 0 {
            errors.push(ValidationError::ZeroDuration("health_check.timeout_secs"));
        } else if health.timeout_secs >= health.interval_secs {
            errors.push(ValidationError::ProbeTimeoutTooLong {
                timeout: health.timeout_secs,
                interval: health.interval_secs,
            });
        }
    }

    if config.timeouts.backend_secs == 0 {
        errors.push(ValidationError::ZeroDuration("timeouts.backend_secs"));
    }
    if config.streaming.max_buf_size < MIN_BUF_SIZE {
        errors.push(ValidationError::BufferTooSmall(config.streaming.max_buf_size));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_path(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if !value.starts_with('/') {
        errors.push(ValidationError::InvalidPath {
            field,
            value: value.to_string(),
        });
    }
}

fn check_backend_url(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    if url.scheme() != "http" {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err("query and fragment are not allowed".to_string());
    }
    Ok(())
}
