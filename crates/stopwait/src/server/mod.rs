mod events;
mod session;

pub use events::{AbortReason, ServerEvent};
pub use session::{Session, SessionManager, SessionState};

use std::collections::VecDeque;
use std::net::SocketAddr;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::event_loop::Handler;
use crate::fs::FileSource;
use crate::net::{Message, MessageType, Transport};

/// Serves files from a [`FileSource`] to any number of peers, one block in
/// flight per peer.
pub struct FileServer<S: FileSource> {
    files: S,
    config: ServerConfig,
    sessions: SessionManager<S::Reader>,
    pending_events: VecDeque<ServerEvent>,
}

impl<S: FileSource> FileServer<S> {
    pub fn new(files: S, config: ServerConfig) -> Self {
        Self {
            files,
            sessions: SessionManager::new(config.max_sessions),
            pending_events: VecDeque::new(),
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn files(&self) -> &S {
        &self.files
    }

    pub fn sessions(&self) -> &SessionManager<S::Reader> {
        &self.sessions
    }

    pub fn is_idle(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    fn handle_request(
        &mut self,
        transport: &mut dyn Transport,
        peer: SocketAddr,
        message: &Message,
    ) -> Result<()> {
        let filename = message.payload_text();

        if let Some(session) = self.sessions.get_mut(&peer) {
            if session.filename == filename {
                // the first DATA was lost; anything later means the request is stale
                if session.last_block() != 1 {
                    return Err(Error::violation(format!(
                        "stale request from {} at block {}",
                        peer,
                        session.last_block()
                    )));
                }
                if let Some(first) = session.last_sent() {
                    transport.send_message(first, peer).map_err(Error::Transport)?;
                }
                session.touch();
                return Ok(());
            }
        } else if self.sessions.is_full() {
            log::debug!("At capacity, ignoring request from {}", peer);
            self.pending_events.push_back(ServerEvent::RequestIgnored {
                addr: peer,
                file: filename,
            });
            return Ok(());
        }

        let reader = match self.files.open(&filename) {
            Ok(reader) => reader,
            Err(e) => {
                let reason = e.to_string();
                transport
                    .send_message(&Message::error(reason.as_str()), peer)
                    .map_err(Error::Transport)?;
                self.pending_events.push_back(ServerEvent::RequestDenied {
                    addr: peer,
                    file: filename,
                    reason,
                });
                return Ok(());
            }
        };

        let mut session = Session::new(
            peer,
            filename.as_str(),
            reader,
            self.config.block_size,
            self.config.history_len,
        );
        let first = match session.advance() {
            Ok(first) => first.clone(),
            Err(e) => {
                let reason = format!("failed to read {}: {}", filename, e);
                transport
                    .send_message(&Message::error(reason), peer)
                    .map_err(Error::Transport)?;
                self.pending_events.push_back(ServerEvent::SessionAborted {
                    addr: peer,
                    file: filename,
                    reason: AbortReason::ReadFailed,
                });
                return Ok(());
            }
        };

        transport.send_message(&first, peer).map_err(Error::Transport)?;
        session.touch();

        if let Ok(Some(replaced)) = self.sessions.insert(session) {
            self.pending_events.push_back(ServerEvent::SessionAborted {
                addr: peer,
                file: replaced.filename,
                reason: AbortReason::Replaced,
            });
        }
        self.pending_events.push_back(ServerEvent::SessionStarted {
            addr: peer,
            file: filename,
        });
        Ok(())
    }

    fn handle_ack(
        &mut self,
        transport: &mut dyn Transport,
        peer: SocketAddr,
        message: &Message,
    ) -> Result<()> {
        let Some(session) = self.sessions.get_mut(&peer) else {
            return Err(Error::violation(format!("ACK from unknown peer {}", peer)));
        };

        let acked = message.block;
        let last = session.last_block();
        if acked > last {
            return Err(Error::violation(format!(
                "ACK {} from {} is ahead of block {}",
                acked, peer, last
            )));
        }
        session.tries = 0;

        if acked < last {
            // the peer is still waiting for acked + 1
            let Some(cached) = session.cached(acked + 1) else {
                return Err(Error::violation(format!(
                    "ACK {} from {} is older than the history",
                    acked, peer
                )));
            };
            transport.send_message(cached, peer).map_err(Error::Transport)?;
            session.touch();
            return Ok(());
        }

        if session.state == SessionState::Done {
            self.finish(peer, true);
            return Ok(());
        }

        match session.advance() {
            Ok(next) => {
                transport.send_message(next, peer).map_err(Error::Transport)?;
                session.touch();
                Ok(())
            }
            Err(e) => {
                let reason = format!("failed to read {}: {}", session.filename, e);
                transport
                    .send_message(&Message::error(reason), peer)
                    .map_err(Error::Transport)?;
                self.abort(peer, AbortReason::ReadFailed);
                Ok(())
            }
        }
    }

    fn handle_peer_error(&mut self, peer: SocketAddr, message: &Message) {
        if self.sessions.contains(&peer) {
            log::warn!("{} reported: {}", peer, message.payload_text());
            self.abort(peer, AbortReason::PeerError);
        }
    }

    /// Resends the session's last DATA, or gives up on it once `max_tries`
    /// retransmissions went unanswered.
    fn retry(&mut self, transport: &mut dyn Transport, peer: SocketAddr) -> Result<()> {
        let Some(session) = self.sessions.get_mut(&peer) else {
            return Ok(());
        };

        if session.tries >= self.config.max_tries {
            let state = session.state;
            match state {
                SessionState::Sending => self.abort(peer, AbortReason::RetriesExhausted),
                SessionState::Done => self.finish(peer, false),
            }
            return Ok(());
        }

        session.tries += 1;
        if let Some(last) = session.last_sent() {
            log::debug!(
                "Resending block {} to {} (try {})",
                last.block,
                peer,
                session.tries
            );
            transport.send_message(last, peer).map_err(Error::Transport)?;
        }
        session.touch();
        Ok(())
    }

    /// Sessions starved while other peers keep the socket busy.
    fn retry_overdue(&mut self, transport: &mut dyn Transport, except: SocketAddr) -> Result<()> {
        let timeout = self.config.timeout;
        let overdue: Vec<SocketAddr> = self
            .sessions
            .iter()
            .filter(|(peer, session)| **peer != except && session.is_overdue(timeout))
            .map(|(peer, _)| *peer)
            .collect();

        for peer in overdue {
            self.retry(transport, peer)?;
        }
        Ok(())
    }

    fn finish(&mut self, peer: SocketAddr, confirmed: bool) {
        if let Some(session) = self.sessions.remove(&peer) {
            self.pending_events.push_back(ServerEvent::SessionCompleted {
                addr: peer,
                blocks: session.blocks_sent(),
                bytes: session.bytes_sent(),
                file: session.filename,
                confirmed,
            });
        }
    }

    fn abort(&mut self, peer: SocketAddr, reason: AbortReason) {
        if let Some(session) = self.sessions.remove(&peer) {
            self.pending_events.push_back(ServerEvent::SessionAborted {
                addr: peer,
                file: session.filename,
                reason,
            });
        }
    }
}

impl<S: FileSource> Handler for FileServer<S> {
    fn on_datagram(
        &mut self,
        transport: &mut dyn Transport,
        data: &[u8],
        from: SocketAddr,
    ) -> Result<()> {
        self.retry_overdue(transport, from)?;

        let message = Message::decode(data)?;
        match message.kind {
            MessageType::Request => self.handle_request(transport, from, &message),
            MessageType::Ack => self.handle_ack(transport, from, &message),
            MessageType::Error => {
                self.handle_peer_error(from, &message);
                Ok(())
            }
            MessageType::Data => Err(Error::violation(format!("DATA from {}", from))),
        }
    }

    fn on_timeout(&mut self, transport: &mut dyn Transport) -> Result<()> {
        for peer in self.sessions.peers() {
            self.retry(transport, peer)?;
        }
        Ok(())
    }

    fn is_done(&self) -> bool {
        false
    }
}
