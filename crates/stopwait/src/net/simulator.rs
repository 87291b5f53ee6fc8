//! In-memory datagram network for deterministic runs.
//!
//! Every endpoint shares one [`SimulatedNetwork`]; sends go straight into the
//! destination's queue after the fault model has had its say. There is no
//! clock: a receive on an empty queue is reported as an elapsed timeout, so a
//! test drives both sides in lockstep on one thread.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use super::protocol::Message;
use super::stats::{FaultModel, FaultRng, NetworkStats};
use super::transport::Transport;

#[derive(Debug, Clone)]
pub struct SentDatagram {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub data: Vec<u8>,
    pub delivered: bool,
}

impl SentDatagram {
    pub fn message(&self) -> Option<Message> {
        Message::decode(&self.data).ok()
    }
}

#[derive(Debug, Clone)]
struct Datagram {
    from: SocketAddr,
    data: Vec<u8>,
}

#[derive(Debug)]
struct Shared {
    queues: HashMap<SocketAddr, VecDeque<Datagram>>,
    // one datagram per destination held back until the next one overtakes it
    held: HashMap<SocketAddr, Datagram>,
    scripted_drops: HashMap<SocketAddr, u32>,
    model: FaultModel,
    rng: FaultRng,
    log: Vec<SentDatagram>,
    stats: NetworkStats,
}

impl Shared {
    fn deliver(&mut self, from: SocketAddr, to: SocketAddr, data: &[u8]) -> bool {
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += data.len() as u64;

        let scripted = match self.scripted_drops.get_mut(&to) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };

        if scripted || self.model.should_drop(&mut self.rng) || !self.queues.contains_key(&to) {
            self.stats.packets_dropped += 1;
            return false;
        }

        let datagram = Datagram {
            from,
            data: data.to_vec(),
        };
        let duplicate = self.model.should_duplicate(&mut self.rng);

        if !self.held.contains_key(&to) && self.model.should_reorder(&mut self.rng) {
            self.held.insert(to, datagram.clone());
            if duplicate {
                self.stats.packets_duplicated += 1;
                self.push(to, datagram);
            }
            return true;
        }

        if duplicate {
            self.stats.packets_duplicated += 1;
            self.push(to, datagram.clone());
        }
        self.push(to, datagram);

        if let Some(overtaken) = self.held.remove(&to) {
            self.push(to, overtaken);
        }

        true
    }

    fn push(&mut self, to: SocketAddr, datagram: Datagram) {
        if let Some(queue) = self.queues.get_mut(&to) {
            queue.push_back(datagram);
        }
    }

    fn take(&mut self, addr: SocketAddr) -> Option<Datagram> {
        let next = self.queues.get_mut(&addr).and_then(|queue| queue.pop_front());
        // a held datagram with nothing behind it still arrives, just late
        next.or_else(|| self.held.remove(&addr))
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedNetwork {
    shared: Rc<RefCell<Shared>>,
}

impl Default for SimulatedNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self::with_faults(FaultModel::default(), 0)
    }

    pub fn with_faults(model: FaultModel, seed: u64) -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared {
                queues: HashMap::new(),
                held: HashMap::new(),
                scripted_drops: HashMap::new(),
                model,
                rng: FaultRng::seeded(seed),
                log: Vec::new(),
                stats: NetworkStats::default(),
            })),
        }
    }

    pub fn endpoint(&self, addr: SocketAddr) -> SimulatedTransport {
        self.shared
            .borrow_mut()
            .queues
            .entry(addr)
            .or_default();

        SimulatedTransport {
            addr,
            shared: Rc::clone(&self.shared),
        }
    }

    /// Silently discards the next `count` datagrams addressed to `to`,
    /// regardless of the fault model.
    pub fn drop_next(&self, to: SocketAddr, count: u32) {
        *self
            .shared
            .borrow_mut()
            .scripted_drops
            .entry(to)
            .or_insert(0) += count;
    }

    /// Queues raw bytes for `to` as if `from` had sent them, bypassing faults.
    pub fn inject(&self, from: SocketAddr, to: SocketAddr, data: &[u8]) {
        self.shared.borrow_mut().push(
            to,
            Datagram {
                from,
                data: data.to_vec(),
            },
        );
    }

    pub fn set_faults(&self, model: FaultModel) {
        self.shared.borrow_mut().model = model;
    }

    pub fn sent(&self) -> Vec<SentDatagram> {
        self.shared.borrow().log.clone()
    }

    pub fn sent_messages(&self, from: SocketAddr) -> Vec<Message> {
        self.shared
            .borrow()
            .log
            .iter()
            .filter(|d| d.from == from)
            .filter_map(SentDatagram::message)
            .collect()
    }

    pub fn clear_log(&self) {
        self.shared.borrow_mut().log.clear();
    }

    pub fn pending(&self, addr: SocketAddr) -> usize {
        let shared = self.shared.borrow();
        let queued = shared.queues.get(&addr).map_or(0, VecDeque::len);
        queued + usize::from(shared.held.contains_key(&addr))
    }

    pub fn stats(&self) -> NetworkStats {
        self.shared.borrow().stats.clone()
    }
}

#[derive(Debug)]
pub struct SimulatedTransport {
    addr: SocketAddr,
    shared: Rc<RefCell<Shared>>,
}

impl Transport for SimulatedTransport {
    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        let mut shared = self.shared.borrow_mut();
        let delivered = shared.deliver(self.addr, addr, data);
        shared.log.push(SentDatagram {
            from: self.addr,
            to: addr,
            data: data.to_vec(),
            delivered,
        });
        Ok(data.len())
    }

    fn recv_from(
        &mut self,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        let mut shared = self.shared.borrow_mut();
        let Some(datagram) = shared.take(self.addr) else {
            return Ok(None);
        };

        // oversized datagrams are truncated, as a real socket would
        let size = datagram.data.len().min(buf.len());
        buf[..size].copy_from_slice(&datagram.data[..size]);

        shared.stats.packets_received += 1;
        shared.stats.bytes_received += size as u64;

        Ok(Some((size, datagram.from)))
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}
