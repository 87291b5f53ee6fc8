use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use crate::net::{DEFAULT_BLOCK_SIZE, MAX_PAYLOAD_SIZE};

const DEFAULT_TIMEOUT_SECS: u64 = 2;
const DEFAULT_MAX_TRIES: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("enter a valid server address i.e., IP:port (got {0:?})")]
    InvalidAddress(String),
    #[error("invalid port in {0:?}")]
    InvalidPort(String),
    #[error("could not resolve {0:?}")]
    Unresolved(String),
    #[error("timeout must be greater than zero")]
    ZeroTimeout,
    #[error("max tries must be at least 1")]
    ZeroTries,
    #[error("block size must be between 1 and {max} bytes, got {got}")]
    BlockSize { got: usize, max: usize },
    #[error("max sessions must be at least 1")]
    ZeroSessions,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub timeout: Duration,
    pub max_tries: u32,
    pub block_size: usize,
    pub max_sessions: usize,
    /// Sent blocks kept per session for answering duplicate ACKs.
    pub history_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_tries: DEFAULT_MAX_TRIES,
            block_size: DEFAULT_BLOCK_SIZE,
            max_sessions: 1,
            history_len: 8,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_retry(self.timeout, self.max_tries)?;
        if self.block_size == 0 || self.block_size > MAX_PAYLOAD_SIZE {
            return Err(ConfigError::BlockSize {
                got: self.block_size,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::ZeroSessions);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub max_tries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_tries: DEFAULT_MAX_TRIES,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_retry(self.timeout, self.max_tries)
    }
}

fn validate_retry(timeout: Duration, max_tries: u32) -> Result<(), ConfigError> {
    if timeout.is_zero() {
        return Err(ConfigError::ZeroTimeout);
    }
    if max_tries == 0 {
        return Err(ConfigError::ZeroTries);
    }
    Ok(())
}

/// Parses `host:port`, resolving host names. IPv4 results are preferred since
/// the binaries bind IPv4 sockets by default.
pub fn parse_address(input: &str) -> Result<SocketAddr, ConfigError> {
    let (host, port) = input
        .rsplit_once(':')
        .ok_or_else(|| ConfigError::InvalidAddress(input.to_string()))?;
    if host.is_empty() || port.is_empty() {
        return Err(ConfigError::InvalidAddress(input.to_string()));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| ConfigError::InvalidPort(input.to_string()))?;

    let host = host.trim_start_matches('[').trim_end_matches(']');
    let candidates: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|_| ConfigError::Unresolved(input.to_string()))?
        .collect();

    candidates
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(|| ConfigError::Unresolved(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ServerConfig::default().validate().is_ok());
        assert!(ClientConfig::default().validate().is_ok());
        assert_eq!(ServerConfig::default().block_size, 95);
    }

    #[test]
    fn test_invalid_server_config() {
        let config = ServerConfig {
            block_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BlockSize { .. })));

        let config = ServerConfig {
            block_size: MAX_PAYLOAD_SIZE + 1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BlockSize { .. })));

        let config = ServerConfig {
            max_sessions: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroSessions)));
    }

    #[test]
    fn test_invalid_client_config() {
        let config = ClientConfig {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroTimeout)));

        let config = ClientConfig {
            max_tries: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroTries)));
    }

    #[test]
    fn test_parse_address() {
        let addr = parse_address("127.0.0.1:50001").unwrap();
        assert_eq!(addr, SocketAddr::from(([127, 0, 0, 1], 50001)));

        let addr = parse_address("localhost:9000").unwrap();
        assert_eq!(addr.port(), 9000);
        assert!(addr.ip().is_loopback());

        let addr = parse_address("[::1]:7").unwrap();
        assert_eq!(addr.port(), 7);
    }

    #[test]
    fn test_parse_address_rejects_malformed() {
        for input in ["", "localhost", ":50001", "localhost:", "1.2.3.4:port"] {
            assert!(parse_address(input).is_err(), "{input:?} should fail");
        }
        assert!(matches!(
            parse_address("localhost:70000"),
            Err(ConfigError::InvalidPort(_))
        ));
    }
}
