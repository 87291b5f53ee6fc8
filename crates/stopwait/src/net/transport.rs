use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use super::protocol::{MAX_DATAGRAM_SIZE, Message};
use super::stats::{FaultModel, FaultRng, NetworkStats};

// set_read_timeout rejects a zero duration
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Datagram substrate shared by both sides. Nothing is assumed about delivery:
/// datagrams may be lost, duplicated or reordered.
pub trait Transport {
    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize>;

    /// Waits up to `timeout` for one datagram. `Ok(None)` means the timeout
    /// elapsed with nothing to read.
    fn recv_from(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>>;

    fn local_addr(&self) -> SocketAddr;

    fn send_message(&mut self, message: &Message, addr: SocketAddr) -> io::Result<usize> {
        self.send_to(&message.encode(), addr)
    }
}

pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    read_timeout: Option<Duration>,
    stats: NetworkStats,
}

impl UdpTransport {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            read_timeout: None,
            stats: NetworkStats::default(),
        })
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        let timeout = timeout.max(MIN_READ_TIMEOUT);
        if self.read_timeout != Some(timeout) {
            self.socket.set_read_timeout(Some(timeout))?;
            self.read_timeout = Some(timeout);
        }
        Ok(())
    }
}

impl Transport for UdpTransport {
    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Datagram exceeds MTU",
            ));
        }

        let bytes = self.socket.send_to(data, addr)?;

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += bytes as u64;

        Ok(bytes)
    }

    fn recv_from(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        self.set_read_timeout(timeout)?;

        loop {
            match self.socket.recv_from(buf) {
                Ok((size, addr)) => {
                    self.stats.packets_received += 1;
                    self.stats.bytes_received += size as u64;
                    return Ok(Some((size, addr)));
                }
                Err(e) => match recv_failure(e.kind()) {
                    RecvFailure::Retry => continue,
                    RecvFailure::Elapsed => {
                        if e.kind() == io::ErrorKind::ConnectionReset {
                            log::debug!("Ignoring connection reset on {}", self.local_addr);
                        }
                        return Ok(None);
                    }
                    RecvFailure::Fatal => return Err(e),
                },
            }
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecvFailure {
    /// A signal cut the wait short; nothing elapsed yet.
    Retry,
    Elapsed,
    Fatal,
}

fn recv_failure(kind: io::ErrorKind) -> RecvFailure {
    match kind {
        io::ErrorKind::Interrupted => RecvFailure::Retry,
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => RecvFailure::Elapsed,
        // ICMP port unreachable from an earlier send; the peer may come back.
        io::ErrorKind::ConnectionReset => RecvFailure::Elapsed,
        _ => RecvFailure::Fatal,
    }
}

/// Drops or duplicates outbound datagrams of any transport.
pub struct LossyTransport<T> {
    inner: T,
    model: FaultModel,
    rng: FaultRng,
    stats: NetworkStats,
}

impl<T: Transport> LossyTransport<T> {
    pub fn new(inner: T, model: FaultModel) -> Self {
        Self::with_rng(inner, model, FaultRng::from_entropy())
    }

    pub fn with_rng(inner: T, model: FaultModel, rng: FaultRng) -> Self {
        Self {
            inner,
            model,
            rng,
            stats: NetworkStats::default(),
        }
    }

    /// Counts of injected faults only; traffic totals live on the inner transport.
    pub fn fault_stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Transport> Transport for LossyTransport<T> {
    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if self.model.should_drop(&mut self.rng) {
            self.stats.packets_dropped += 1;
            return Ok(data.len());
        }

        let bytes = self.inner.send_to(data, addr)?;
        if self.model.should_duplicate(&mut self.rng) {
            self.stats.packets_duplicated += 1;
            self.inner.send_to(data, addr)?;
        }
        Ok(bytes)
    }

    fn recv_from(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        self.inner.recv_from(buf, timeout)
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }
}
