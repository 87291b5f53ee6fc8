use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::net::{MAX_DATAGRAM_SIZE, Transport};

/// A state machine driven by the loop, one datagram or timeout at a time.
pub trait Handler {
    fn on_datagram(
        &mut self,
        transport: &mut dyn Transport,
        data: &[u8],
        from: SocketAddr,
    ) -> Result<()>;

    fn on_timeout(&mut self, transport: &mut dyn Transport) -> Result<()>;

    fn is_done(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    Datagram,
    Timeout,
}

pub struct EventLoop<T> {
    transport: T,
    timeout: Duration,
    recv_buffer: [u8; MAX_DATAGRAM_SIZE],
    running: Arc<AtomicBool>,
}

impl<T: Transport> EventLoop<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            recv_buffer: [0u8; MAX_DATAGRAM_SIZE],
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Waits once for a datagram and dispatches it, or dispatches the timeout.
    /// Malformed datagrams and out-of-sequence messages are logged and
    /// swallowed; anything else ends the loop.
    pub fn poll_once<H: Handler>(&mut self, handler: &mut H) -> Result<Poll> {
        let received = self
            .transport
            .recv_from(&mut self.recv_buffer, self.timeout)
            .map_err(Error::Transport)?;

        let (poll, result) = match received {
            Some((size, from)) => (
                Poll::Datagram,
                handler.on_datagram(&mut self.transport, &self.recv_buffer[..size], from),
            ),
            None => (Poll::Timeout, handler.on_timeout(&mut self.transport)),
        };

        match result {
            Ok(()) => Ok(poll),
            Err(e) if e.is_recoverable() => {
                log::debug!("Discarded: {}", e);
                Ok(poll)
            }
            Err(e) => Err(e),
        }
    }

    pub fn run<H: Handler>(&mut self, handler: &mut H) -> Result<()> {
        while self.running.load(Ordering::SeqCst) && !handler.is_done() {
            self.poll_once(handler)?;
        }
        Ok(())
    }
}
