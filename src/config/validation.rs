//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (buffer minimums, intervals > 0, addresses parse)
//! - Resolve the accepted method names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::http::method::Method;

/// Smallest read/processed/write buffer that can hold a canned answer.
pub const MIN_BUFFER_SIZE: usize = 256;

/// Smallest header name buffer; must hold `transfer-encoding`.
pub const MIN_HEADER_NAME_SIZE: usize = 17;

/// Smallest request line bound: `GET / HTTP/1.1\r\n`.
pub const MIN_LINE_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field}: {value} is below the minimum of {min}")]
    TooSmall {
        field: &'static str,
        value: usize,
        min: usize,
    },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("http.accepted_methods must not be empty")]
    NoMethods,

    #[error("http.accepted_methods: unknown method {0:?}")]
    UnknownMethod(String),
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(
        &mut errors,
        "listener.bind_address",
        &config.listener.bind_address,
    );
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero {
            field: "listener.max_connections",
        });
    }

    let buffers = &config.buffers;
    for (field, value, min) in [
        ("buffers.read_size", buffers.read_size, MIN_BUFFER_SIZE),
        ("buffers.processed_size", buffers.processed_size, MIN_BUFFER_SIZE),
        ("buffers.write_size", buffers.write_size, MIN_BUFFER_SIZE),
        ("buffers.header_name_size", buffers.header_name_size, MIN_HEADER_NAME_SIZE),
        ("buffers.header_content_size", buffers.header_content_size, 1),
        ("buffers.max_line_size", buffers.max_line_size, MIN_LINE_SIZE),
    ] {
        if value < min {
            errors.push(ValidationError::TooSmall { field, value, min });
        }
    }

    if config.pool.ttl_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "pool.ttl_ms",
        });
    }
    if config.pool.sweep_interval_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "pool.sweep_interval_ms",
        });
    }

    if config.http.accepted_methods.is_empty() {
        errors.push(ValidationError::NoMethods);
    }
    for name in &config.http.accepted_methods {
        if name.parse::<Method>().is_err() {
            errors.push(ValidationError::UnknownMethod(name.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&ProxyConfig::default()), Ok(()));
    }

    #[test]
    fn reports_every_error() {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "nowhere".to_string();
        config.buffers.read_size = 10;
        config.pool.ttl_ms = 0;
        config.http.accepted_methods = vec!["GET".to_string(), "BREW".to_string()];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::UnknownMethod("BREW".to_string())));
        assert!(errors.contains(&ValidationError::Zero {
            field: "pool.ttl_ms"
        }));
    }

    #[test]
    fn metrics_address_ignored_when_disabled() {
        let mut config = ProxyConfig::default();
        config.observability.metrics_enabled = false;
        config.observability.metrics_address = "bogus".to_string();
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn empty_method_list_is_rejected() {
        let mut config = ProxyConfig::default();
        config.http.accepted_methods.clear();
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::NoMethods])
        );
    }
}
