use std::io::Write;
use std::net::SocketAddr;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::event_loop::Handler;
use crate::net::{Message, MessageType, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Continue,
    Stop,
}

/// Asked once `max_tries` retransmissions went unanswered.
pub trait RetryDecider {
    fn decide(&mut self, attempts: u32) -> RetryDecision;
}

impl<F> RetryDecider for F
where
    F: FnMut(u32) -> RetryDecision,
{
    fn decide(&mut self, attempts: u32) -> RetryDecision {
        self(attempts)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Finished,
    RemoteError(String),
    GaveUp { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    Ready,
    Waiting,
    Done(Completion),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub blocks: u32,
    pub bytes: u64,
    /// DATA messages discarded as duplicate or out of order.
    pub duplicates: u32,
}

/// Client side of one file download. Blocks are written to `sink` strictly in
/// order; anything else is discarded and answered with the current ACK.
pub struct Transfer<W> {
    server: SocketAddr,
    filename: String,
    config: ClientConfig,
    sink: W,
    decider: Box<dyn RetryDecider>,
    state: TransferState,
    last_ack_block: u32,
    last_sent: Message,
    tries: u32,
    summary: TransferSummary,
}

impl<W: Write> Transfer<W> {
    pub fn new(
        server: SocketAddr,
        filename: impl Into<String>,
        sink: W,
        config: ClientConfig,
    ) -> Self {
        let filename = filename.into();
        Self {
            server,
            last_sent: Message::request(&filename),
            filename,
            config,
            sink,
            decider: Box::new(|_: u32| RetryDecision::Stop),
            state: TransferState::Ready,
            last_ack_block: 0,
            tries: 0,
            summary: TransferSummary::default(),
        }
    }

    pub fn with_decider(mut self, decider: impl RetryDecider + 'static) -> Self {
        self.decider = Box::new(decider);
        self
    }

    pub fn start(&mut self, transport: &mut dyn Transport) -> Result<()> {
        if self.state != TransferState::Ready {
            return Err(Error::violation("transfer already started"));
        }

        log::info!("Requesting {} from {}", self.filename, self.server);
        self.send(transport, Message::request(&self.filename))?;
        self.state = TransferState::Waiting;
        Ok(())
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    pub fn state(&self) -> &TransferState {
        &self.state
    }

    pub fn last_ack_block(&self) -> u32 {
        self.last_ack_block
    }

    pub fn summary(&self) -> TransferSummary {
        self.summary
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    pub fn into_sink(self) -> W {
        self.sink
    }

    pub fn result(&self) -> Result<TransferSummary> {
        match &self.state {
            TransferState::Done(Completion::Finished) => Ok(self.summary),
            TransferState::Done(Completion::RemoteError(reason)) => {
                Err(Error::Remote(reason.clone()))
            }
            TransferState::Done(Completion::GaveUp { attempts }) => Err(Error::RetryExhausted {
                attempts: *attempts,
            }),
            TransferState::Ready | TransferState::Waiting => {
                Err(Error::violation("transfer has not finished"))
            }
        }
    }

    fn send(&mut self, transport: &mut dyn Transport, message: Message) -> Result<()> {
        transport
            .send_message(&message, self.server)
            .map_err(Error::Transport)?;
        self.last_sent = message;
        self.tries = 0;
        Ok(())
    }

    /// The server may answer from another port, but only before any block
    /// lands.
    fn accept_sender(&mut self, from: SocketAddr) -> Result<()> {
        if from == self.server {
            return Ok(());
        }
        if self.last_ack_block != 0 {
            return Err(Error::violation(format!("datagram from stranger {}", from)));
        }
        log::debug!("Server answered from {}", from);
        self.server = from;
        Ok(())
    }

    fn handle_data(&mut self, transport: &mut dyn Transport, message: Message) -> Result<()> {
        let mut finished = false;

        if message.block == self.last_ack_block + 1 {
            self.sink.write_all(&message.payload).map_err(Error::Sink)?;
            self.last_ack_block = message.block;
            self.summary.blocks += 1;
            self.summary.bytes += message.payload.len() as u64;
            finished = message.is_last;
        } else {
            log::debug!(
                "Discarding block {} (expecting {})",
                message.block,
                self.last_ack_block + 1
            );
            self.summary.duplicates += 1;
        }

        self.send(transport, Message::ack(self.last_ack_block, finished))?;

        if finished {
            self.sink.flush().map_err(Error::Sink)?;
            self.state = TransferState::Done(Completion::Finished);
            log::info!(
                "Received {} ({} blocks, {} bytes)",
                self.filename,
                self.summary.blocks,
                self.summary.bytes
            );
        }
        Ok(())
    }
}

impl<W: Write> Handler for Transfer<W> {
    fn on_datagram(
        &mut self,
        transport: &mut dyn Transport,
        data: &[u8],
        from: SocketAddr,
    ) -> Result<()> {
        if self.state != TransferState::Waiting {
            return Ok(());
        }

        let message = Message::decode(data)?;

        match message.kind {
            MessageType::Data => {
                self.accept_sender(from)?;
                self.handle_data(transport, message)
            }
            MessageType::Error => {
                self.accept_sender(from)?;
                let reason = message.payload_text();
                log::error!("Server error: {}", reason);
                if let Err(e) = self.sink.flush() {
                    log::warn!("Failed to flush destination: {}", e);
                }
                self.state = TransferState::Done(Completion::RemoteError(reason));
                Ok(())
            }
            MessageType::Request | MessageType::Ack => Err(Error::violation(format!(
                "unexpected {} from {}",
                message.kind, from
            ))),
        }
    }

    fn on_timeout(&mut self, transport: &mut dyn Transport) -> Result<()> {
        if self.state != TransferState::Waiting {
            return Ok(());
        }

        if self.tries >= self.config.max_tries {
            match self.decider.decide(self.tries) {
                RetryDecision::Continue => {
                    log::info!("Still waiting on {}", self.server);
                    self.tries = 0;
                }
                RetryDecision::Stop => {
                    self.state = TransferState::Done(Completion::GaveUp {
                        attempts: self.tries,
                    });
                    return Ok(());
                }
            }
        }

        self.tries += 1;
        log::debug!(
            "Timed out, resending {} {} (try {})",
            self.last_sent.kind,
            self.last_sent.block,
            self.tries
        );
        transport
            .send_message(&self.last_sent, self.server)
            .map_err(Error::Transport)?;
        Ok(())
    }

    fn is_done(&self) -> bool {
        matches!(self.state, TransferState::Done(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{SimulatedNetwork, SimulatedTransport};
    use std::cell::Cell;
    use std::rc::Rc;

    const CLIENT: u16 = 7;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 2], port))
    }

    struct Fixture {
        network: SimulatedNetwork,
        transport: SimulatedTransport,
        transfer: Transfer<Vec<u8>>,
    }

    impl Fixture {
        fn new(max_tries: u32) -> Self {
            let network = SimulatedNetwork::new();
            let mut transport = network.endpoint(addr(CLIENT));
            let config = ClientConfig {
                max_tries,
                ..Default::default()
            };
            let mut transfer = Transfer::new(addr(1), "abc.txt", Vec::new(), config);
            transfer.start(&mut transport).unwrap();
            Self {
                network,
                transport,
                transfer,
            }
        }

        fn deliver_from(&mut self, from: u16, message: Message) -> Result<()> {
            self.transfer
                .on_datagram(&mut self.transport, &message.encode(), addr(from))
        }

        fn deliver(&mut self, message: Message) -> Result<()> {
            self.deliver_from(1, message)
        }

        fn timeout(&mut self) {
            self.transfer.on_timeout(&mut self.transport).unwrap();
        }

        fn sent(&self) -> Vec<Message> {
            self.network.sent_messages(addr(CLIENT))
        }
    }

    #[test]
    fn test_start_sends_request() {
        let f = Fixture::new(3);
        assert_eq!(f.sent(), vec![Message::request("abc.txt")]);
        assert_eq!(f.sent()[0].block, 0);
        assert_eq!(*f.transfer.state(), TransferState::Waiting);
    }

    #[test]
    fn test_in_order_blocks_are_written() {
        let mut f = Fixture::new(3);

        f.deliver(Message::data(1, b"abcd".to_vec(), false)).unwrap();
        f.deliver(Message::data(2, b"ef".to_vec(), true)).unwrap();

        assert!(f.transfer.is_done());
        assert_eq!(f.transfer.sink(), b"abcdef");
        assert_eq!(
            f.sent()[1..],
            [Message::ack(1, false), Message::ack(2, true)]
        );
        let summary = f.transfer.result().unwrap();
        assert_eq!(summary.blocks, 2);
        assert_eq!(summary.bytes, 6);
    }

    #[test]
    fn test_out_of_sequence_block_is_discarded_but_acked() {
        let mut f = Fixture::new(3);

        f.deliver(Message::data(1, b"abcd".to_vec(), false)).unwrap();
        f.deliver(Message::data(1, b"abcd".to_vec(), false)).unwrap();
        f.deliver(Message::data(3, b"zzzz".to_vec(), true)).unwrap();

        assert_eq!(f.transfer.last_ack_block(), 1);
        assert_eq!(f.transfer.sink(), b"abcd");
        assert!(!f.transfer.is_done());
        assert_eq!(f.transfer.summary().duplicates, 2);
        assert!(f.sent()[1..].iter().all(|m| *m == Message::ack(1, false)));
    }

    #[test]
    fn test_remote_error_fails_transfer() {
        let mut f = Fixture::new(3);

        f.deliver(Message::error("file not found: abc.txt")).unwrap();

        assert!(f.transfer.is_done());
        assert!(f.transfer.sink().is_empty());
        assert!(matches!(f.transfer.result(), Err(Error::Remote(ref r)) if r.contains("abc.txt")));
        assert_eq!(f.sent().len(), 1);
    }

    struct UnflushableSink;

    impl Write for UnflushableSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::other("disk gone"))
        }
    }

    #[test]
    fn test_remote_error_survives_flush_failure() {
        let network = SimulatedNetwork::new();
        let mut transport = network.endpoint(addr(CLIENT));
        let mut transfer =
            Transfer::new(addr(1), "abc.txt", UnflushableSink, ClientConfig::default());
        transfer.start(&mut transport).unwrap();

        transfer
            .on_datagram(&mut transport, &Message::error("no such file").encode(), addr(1))
            .unwrap();

        assert_eq!(
            *transfer.state(),
            TransferState::Done(Completion::RemoteError("no such file".into()))
        );
    }

    #[test]
    fn test_retry_bound_then_stop() {
        let mut f = Fixture::new(3);

        for _ in 0..3 {
            f.timeout();
        }
        assert_eq!(f.sent().len(), 4);
        assert!(f.sent().iter().all(|m| *m == Message::request("abc.txt")));
        assert!(!f.transfer.is_done());

        f.timeout();
        assert_eq!(f.sent().len(), 4);
        assert!(matches!(
            f.transfer.result(),
            Err(Error::RetryExhausted { attempts: 3 })
        ));
    }

    #[test]
    fn test_decider_can_continue() {
        let asked = Rc::new(Cell::new(0));
        let counter = Rc::clone(&asked);

        let mut f = Fixture::new(2);
        f.transfer = Transfer::new(addr(1), "abc.txt", Vec::new(), ClientConfig {
            max_tries: 2,
            ..Default::default()
        })
        .with_decider(move |_: u32| {
            counter.set(counter.get() + 1);
            if counter.get() < 2 {
                RetryDecision::Continue
            } else {
                RetryDecision::Stop
            }
        });
        f.transfer.start(&mut f.transport).unwrap();
        f.network.clear_log();

        // 2 retries, continue, 2 more, stop
        for _ in 0..6 {
            f.timeout();
        }

        assert_eq!(asked.get(), 2);
        assert_eq!(f.sent().len(), 4);
        assert!(f.transfer.is_done());
    }

    #[test]
    fn test_timeout_resends_last_ack() {
        let mut f = Fixture::new(3);

        f.deliver(Message::data(1, b"abcd".to_vec(), false)).unwrap();
        f.timeout();

        assert_eq!(f.sent().last(), Some(&Message::ack(1, false)));
    }

    #[test]
    fn test_server_may_answer_from_new_port() {
        let mut f = Fixture::new(3);

        f.deliver_from(9, Message::data(1, b"abcd".to_vec(), false)).unwrap();
        assert_eq!(f.transfer.server(), addr(9));

        let err = f.deliver_from(1, Message::data(2, b"efgh".to_vec(), false)).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(f.transfer.last_ack_block(), 1);
    }

    #[test]
    fn test_stray_ack_does_not_redirect() {
        let mut f = Fixture::new(3);

        assert!(f.deliver_from(9, Message::ack(0, false)).is_err());
        assert!(f.deliver_from(9, Message::request("abc.txt")).is_err());
        assert_eq!(f.transfer.server(), addr(1));
        assert_eq!(*f.transfer.state(), TransferState::Waiting);

        f.timeout();
        let log = f.network.sent();
        let resent = log.last().unwrap();
        assert_eq!(resent.to, addr(1));
        assert_eq!(resent.message(), Some(Message::request("abc.txt")));
    }

    #[test]
    fn test_stranger_error_after_first_block_is_ignored() {
        let mut f = Fixture::new(3);

        f.deliver(Message::data(1, b"abcd".to_vec(), false)).unwrap();
        let err = f.deliver_from(9, Message::error("bogus")).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(*f.transfer.state(), TransferState::Waiting);
        assert_eq!(f.transfer.server(), addr(1));
    }

    #[test]
    fn test_unexpected_kind_is_violation() {
        let mut f = Fixture::new(3);
        let err = f.deliver(Message::ack(1, false)).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }));
    }

    #[test]
    fn test_malformed_datagram() {
        let mut f = Fixture::new(3);
        let err = f
            .transfer
            .on_datagram(&mut f.transport, &[0x00, 0x01], addr(1))
            .unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn test_result_before_done() {
        let f = Fixture::new(3);
        assert!(f.transfer.result().is_err());
    }
}
