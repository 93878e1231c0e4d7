//! Chat server event loop
//!
//! One task owns the listener, the multiplexer, and the peer table.
//! Every accept, read, and broadcast happens inside the dispatch step
//! of a single readiness loop, so no locking is needed around any of
//! the state.
//!
//! Failure isolation: an I/O error on one connection marks only that
//! peer for closing; the loop keeps serving everyone else. Only a
//! failure of the multiplexer itself ends the server.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::error::ChatError;
use crate::mux::{Event, Multiplexer, MuxHandle, Token};
use crate::transfer;
use crate::QUIT;

/// Pause after a failed accept before re-arming the listener
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Lifecycle of one accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerState {
    /// Registered and watched for read readiness
    AwaitingRead,
    /// Marked for disconnect; culled at the end of the dispatch batch
    Closing,
}

/// Per-connection bookkeeping, keyed by the channel's token
#[derive(Debug)]
struct Peer {
    /// Human-readable identifier derived from the remote port
    tag: String,
    state: PeerState,
}

/// The broadcast chat server
pub struct ChatServer {
    mux: Multiplexer,
    listener_token: Token,
    local_addr: SocketAddr,
    peers: HashMap<Token, Peer>,
}

impl ChatServer {
    /// Bind the listening channel and set up the multiplexer
    ///
    /// Port 0 binds an ephemeral port; see [`ChatServer::local_addr`].
    /// Bind or registration failure is fatal, unlike anything that
    /// happens on an individual connection later.
    pub async fn bind(port: u16) -> Result<Self, ChatError> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;

        let mut mux = Multiplexer::new();
        let listener_token = mux.register_listener(listener);

        Ok(Self {
            mux,
            listener_token,
            local_addr,
            peers: HashMap::new(),
        })
    }

    /// The address the listener actually bound
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle for shutting the server down from outside the loop
    pub fn handle(&self) -> MuxHandle {
        self.mux.handle()
    }

    /// Run the dispatch loop until the multiplexer is closed
    pub async fn run(mut self) -> Result<(), ChatError> {
        info!("server listening on {}", self.local_addr);

        loop {
            let events = match self.mux.select().await {
                Ok(events) => events,
                Err(_closed) => {
                    info!("multiplexer closed, server stopping");
                    return Ok(());
                }
            };

            for event in events {
                self.dispatch(event).await;
            }
            self.reap();
        }
    }

    /// React to one ready event
    async fn dispatch(&mut self, event: Event) {
        match event {
            Event::Incoming { stream, addr, .. } => {
                self.admit(stream, addr);
            }
            Event::Readable { token } => {
                if let Err(e) = self.on_readable(token).await {
                    warn!("read failed on {}: {}", self.tag_of(token), e);
                    self.mark_closing(token);
                }
            }
            Event::Faulted { token, error } => {
                if token == self.listener_token {
                    warn!("accept failed: {error}");
                    // Accept errors can persist (fd exhaustion);
                    // selecting again immediately would spin.
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                } else {
                    warn!("channel fault on {}: {}", self.tag_of(token), error);
                    self.mark_closing(token);
                }
            }
        }
    }

    /// Register a freshly accepted connection and start watching it
    fn admit(&mut self, stream: TcpStream, addr: SocketAddr) -> Token {
        let tag = format!("client[{}]", addr.port());
        let token = self.mux.register_stream(Arc::new(stream));
        info!("{tag} connected");
        self.peers.insert(
            token,
            Peer {
                tag,
                state: PeerState::AwaitingRead,
            },
        );
        token
    }

    /// Drain one readable peer and forward whatever it sent
    ///
    /// An empty drain that also saw EOF means the peer closed its
    /// write side; an empty drain without EOF is a spurious wake-up
    /// and changes nothing. The quit token closes the sender's own
    /// connection, but only after the line was still forwarded.
    async fn on_readable(&mut self, token: Token) -> io::Result<()> {
        // The peer may have been culled earlier in this batch.
        let Some(peer) = self.peers.get(&token) else {
            return Ok(());
        };
        if peer.state != PeerState::AwaitingRead {
            return Ok(());
        }
        let tag = peer.tag.clone();
        let Some(stream) = self.mux.stream(token).cloned() else {
            return Ok(());
        };

        let drained = transfer::drain(stream.as_ref())?;
        let text = drained.text();

        if !text.is_empty() {
            info!("{tag}: {text}");
            self.broadcast(token, &tag, &text).await;
        }

        if drained.eof || text == QUIT {
            self.mark_closing(token);
        }
        Ok(())
    }

    /// Forward text to every registered connection except the sender
    ///
    /// A write failure on one target marks only that target for
    /// closing; the fan-out continues.
    async fn broadcast(&mut self, from: Token, tag: &str, text: &str) {
        let message = format!("{tag}:{text}");
        let targets: Vec<(Token, Arc<TcpStream>)> = self
            .mux
            .streams()
            .filter(|(token, _)| *token != from)
            .filter(|(token, _)| {
                self.peers.get(token).map(|p| p.state) == Some(PeerState::AwaitingRead)
            })
            .map(|(token, stream)| (token, stream.clone()))
            .collect();

        for (token, stream) in targets {
            if let Err(e) = transfer::write_all(stream.as_ref(), message.as_bytes()).await {
                warn!("forward to {} failed: {}", self.tag_of(token), e);
                self.mark_closing(token);
            }
        }
    }

    fn mark_closing(&mut self, token: Token) {
        if let Some(peer) = self.peers.get_mut(&token) {
            peer.state = PeerState::Closing;
        }
    }

    /// Cancel and close every peer marked `Closing`
    ///
    /// Dropping the cancelled source is what closes the socket.
    fn reap(&mut self) {
        let closing: Vec<Token> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.state == PeerState::Closing)
            .map(|(&token, _)| token)
            .collect();

        for token in closing {
            if let Some(peer) = self.peers.remove(&token) {
                self.mux.cancel(token);
                info!("{} disconnected", peer.tag);
            } else {
                debug!("reap raced with removal for {token}");
            }
        }
    }

    fn tag_of(&self, token: Token) -> &str {
        self.peers
            .get(&token)
            .map(|peer| peer.tag.as_str())
            .unwrap_or("client[?]")
    }
}
