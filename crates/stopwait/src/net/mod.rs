mod protocol;
mod simulator;
mod stats;
mod transport;

pub use protocol::{
    DEFAULT_BLOCK_SIZE, DEFAULT_PORT, HEADER_LEN, MAX_DATAGRAM_SIZE, MAX_PAYLOAD_SIZE, Message,
    MessageError, MessageFlags, MessageType,
};
pub use simulator::{SentDatagram, SimulatedNetwork, SimulatedTransport};
pub use stats::{FaultModel, FaultRng, NetworkStats, rand_u64};
pub use transport::{LossyTransport, Transport, UdpTransport};
