//! Process bootstrap settings read from the environment.

use std::net::SocketAddr;

pub const ADDR_VAR: &str = "GREET_ADDR";
pub const TLS_VAR: &str = "TLS_ENABLED";
pub const DEMO_VAR: &str = "GREET_DEMO";

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:50051";
pub const DEFAULT_DIAL_ADDR: &str = "127.0.0.1:50051";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} is not a socket address: {value:?}")]
    InvalidAddr { var: &'static str, value: String },

    #[error("{var} must be \"true\" or \"false\", got {value:?}")]
    InvalidBool { var: &'static str, value: String },

    #[error("transport security is not available in this build; unset TLS_ENABLED or set it to false")]
    TlsUnsupported,
}

/// Where to listen or dial, and whether the connection should be encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub addr: SocketAddr,
    pub tls: bool,
}

impl TransportConfig {
    /// Read the server's settings, defaulting to all interfaces.
    pub fn server_from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(DEFAULT_LISTEN_ADDR, |var| std::env::var(var).ok())
    }

    /// Read the client's settings, defaulting to the local host.
    pub fn client_from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(DEFAULT_DIAL_ADDR, |var| std::env::var(var).ok())
    }

    fn from_lookup(
        default_addr: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let addr = lookup(ADDR_VAR).unwrap_or_else(|| default_addr.to_string());
        let addr = addr.parse().map_err(|_| ConfigError::InvalidAddr {
            var: ADDR_VAR,
            value: addr.clone(),
        })?;

        let tls = match lookup(TLS_VAR) {
            None => false,
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidBool {
                var: TLS_VAR,
                value,
            })?,
        };

        if tls {
            return Err(ConfigError::TlsUnsupported);
        }

        Ok(Self { addr, tls })
    }
}
