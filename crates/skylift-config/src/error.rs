//! Configuration error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid CIDR block in {field}: {value}")]
    InvalidCidr { field: &'static str, value: String },

    #[error("Invalid IP address in {field}: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("Invalid URL in {field}: {value}")]
    InvalidUrl { field: &'static str, value: String },

    #[error("Invalid host count: {0} (must be at least 1)")]
    InvalidHostCount(u32),

    #[error("DNS server list must not be empty")]
    EmptyDnsServers,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
