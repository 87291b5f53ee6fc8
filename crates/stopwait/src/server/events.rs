use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    SessionStarted {
        addr: SocketAddr,
        file: String,
    },
    SessionCompleted {
        addr: SocketAddr,
        file: String,
        blocks: u32,
        bytes: u64,
        /// False when the final ACK never arrived.
        confirmed: bool,
    },
    SessionAborted {
        addr: SocketAddr,
        file: String,
        reason: AbortReason,
    },
    RequestDenied {
        addr: SocketAddr,
        file: String,
        reason: String,
    },
    RequestIgnored {
        addr: SocketAddr,
        file: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    RetriesExhausted,
    PeerError,
    ReadFailed,
    Replaced,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::RetriesExhausted => "no reply",
            AbortReason::PeerError => "peer sent error",
            AbortReason::ReadFailed => "read failed",
            AbortReason::Replaced => "replaced by new request",
        }
    }
}
