use std::collections::hash_map::Iter;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::fs::BlockReader;
use crate::net::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Sending,
    /// Final block sent, waiting for its ACK.
    Done,
}

/// One peer's transfer. The file is only ever read forward; anything sent
/// before is answered from `history`.
#[derive(Debug)]
pub struct Session<R> {
    pub peer: SocketAddr,
    pub filename: String,
    pub state: SessionState,
    pub tries: u32,
    pub last_send: Instant,
    reader: BlockReader<R>,
    last_block: u32,
    history: VecDeque<Message>,
    history_len: usize,
}

impl<R: Read> Session<R> {
    pub fn new(
        peer: SocketAddr,
        filename: impl Into<String>,
        reader: R,
        block_size: usize,
        history_len: usize,
    ) -> Self {
        let history_len = history_len.max(1);
        Self {
            peer,
            filename: filename.into(),
            state: SessionState::Sending,
            tries: 0,
            last_send: Instant::now(),
            reader: BlockReader::new(reader, block_size),
            last_block: 0,
            history: VecDeque::with_capacity(history_len),
            history_len,
        }
    }

    /// Reads the next block from the file and caches it as DATA.
    pub fn advance(&mut self) -> io::Result<&Message> {
        let block = self.reader.next_block()?;
        self.last_block += 1;

        if block.is_last {
            self.state = SessionState::Done;
        }

        if self.history.len() == self.history_len {
            self.history.pop_front();
        }
        self.history
            .push_back(Message::data(self.last_block, block.data, block.is_last));

        self.tries = 0;
        Ok(&self.history[self.history.len() - 1])
    }

    pub fn last_block(&self) -> u32 {
        self.last_block
    }

    pub fn last_sent(&self) -> Option<&Message> {
        self.history.back()
    }

    pub fn cached(&self, block: u32) -> Option<&Message> {
        self.history.iter().rev().find(|m| m.block == block)
    }

    pub fn blocks_sent(&self) -> u32 {
        self.reader.blocks_read()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.reader.bytes_read()
    }

    pub fn is_overdue(&self, timeout: Duration) -> bool {
        self.last_send.elapsed() >= timeout
    }

    pub fn touch(&mut self) {
        self.last_send = Instant::now();
    }
}

#[derive(Debug)]
pub struct SessionManager<R> {
    sessions: HashMap<SocketAddr, Session<R>>,
    max_sessions: usize,
}

impl<R> SessionManager<R> {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            max_sessions,
        }
    }

    /// Adds a session, replacing any previous one for the same peer. Returns
    /// the session back when a new peer would exceed capacity.
    pub fn insert(&mut self, session: Session<R>) -> Result<Option<Session<R>>, Session<R>> {
        if !self.sessions.contains_key(&session.peer) && self.is_full() {
            return Err(session);
        }
        Ok(self.sessions.insert(session.peer, session))
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.max_sessions
    }

    pub fn get(&self, peer: &SocketAddr) -> Option<&Session<R>> {
        self.sessions.get(peer)
    }

    pub fn get_mut(&mut self, peer: &SocketAddr) -> Option<&mut Session<R>> {
        self.sessions.get_mut(peer)
    }

    pub fn remove(&mut self, peer: &SocketAddr) -> Option<Session<R>> {
        self.sessions.remove(peer)
    }

    pub fn contains(&self, peer: &SocketAddr) -> bool {
        self.sessions.contains_key(peer)
    }

    pub fn peers(&self) -> Vec<SocketAddr> {
        self.sessions.keys().copied().collect()
    }

    pub fn iter(&self) -> Iter<'_, SocketAddr, Session<R>> {
        self.sessions.iter()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
