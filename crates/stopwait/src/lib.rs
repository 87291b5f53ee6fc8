pub mod client;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod fs;
pub mod net;
pub mod server;

pub use client::{
    Completion, RetryDecider, RetryDecision, Transfer, TransferState, TransferSummary,
};
pub use config::{ClientConfig, ConfigError, ServerConfig, parse_address};
pub use error::{Error, Result};
pub use event_loop::{EventLoop, Handler, Poll};
pub use fs::{Block, BlockReader, FileRoot, FileSource, MemoryFiles, OpenError};
pub use net::{
    DEFAULT_BLOCK_SIZE, DEFAULT_PORT, FaultModel, FaultRng, LossyTransport, MAX_DATAGRAM_SIZE,
    Message, MessageError, MessageFlags, MessageType, NetworkStats, SimulatedNetwork,
    SimulatedTransport, Transport, UdpTransport,
};
pub use server::{AbortReason, FileServer, ServerEvent, SessionManager, SessionState};
