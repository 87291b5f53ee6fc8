use std::io;

use crate::net::MessageError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed message: {0}")]
    Malformed(#[from] MessageError),
    #[error("protocol violation: {reason}")]
    ProtocolViolation { reason: String },
    #[error("no reply after {attempts} retransmissions")]
    RetryExhausted { attempts: u32 },
    #[error("remote error: {0}")]
    Remote(String),
    #[error("transport failure: {0}")]
    Transport(#[source] io::Error),
    #[error("failed to write destination: {0}")]
    Sink(#[source] io::Error),
}

impl Error {
    pub fn violation(reason: impl Into<String>) -> Self {
        Error::ProtocolViolation {
            reason: reason.into(),
        }
    }

    /// Errors the event loop drops on the floor: the datagram is discarded and
    /// retransmission repairs whatever was lost.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Malformed(_) | Error::ProtocolViolation { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
