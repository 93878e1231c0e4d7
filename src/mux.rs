//! Readiness multiplexer
//!
//! Wraps tokio's readiness API behind the selector-style contract the
//! event loops are written against: register channels, block in
//! `select()` until at least one is ready, consume the ready set.
//! A cloneable [`MuxHandle`] carries the cross-thread wake-up and
//! close signals, which is the sole cancellation mechanism for a loop
//! blocked in `select()`.
//!
//! The set of registered channels doubles as the connection registry:
//! the server enumerates broadcast targets straight from it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use thiserror::Error;
use tokio::io::Interest;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

/// Stable identity of a registered channel
///
/// Allocated from a monotonic counter, so a token is never reused
/// within one multiplexer and a channel is registered at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub usize);

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The multiplexer was closed; `select()` can no longer block.
///
/// Loops treat this as a normal termination signal, not a failure.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("multiplexer closed")]
pub struct Closed;

/// A registered channel
#[derive(Debug)]
pub enum Source {
    /// Listening channel, watched for incoming connections
    Listener(TcpListener),
    /// Established connection, watched for read readiness
    ///
    /// Arc-shared so a writer task can hold the same channel the
    /// loop registered (the client's input task does).
    Stream(Arc<TcpStream>),
}

/// Transient ready notification, consumed immediately by dispatch
#[derive(Debug)]
pub enum Event {
    /// The listening channel was acceptable; the pending connection
    /// has already been accepted and is ready to be registered
    Incoming {
        token: Token,
        stream: TcpStream,
        addr: SocketAddr,
    },
    /// The channel has bytes (or EOF) available without blocking
    Readable { token: Token },
    /// Readiness polling failed; the owning loop must cull this channel
    Faulted {
        token: Token,
        error: std::io::Error,
    },
}

/// State shared between the multiplexer and its handles
#[derive(Debug, Default)]
struct Shared {
    closed: AtomicBool,
    wake: Notify,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Cheap cloneable handle for waking or closing a blocked `select()`
///
/// Safe to use from any thread or task; this is how the client's
/// input task shuts the read loop down.
#[derive(Debug, Clone)]
pub struct MuxHandle {
    shared: Arc<Shared>,
}

impl MuxHandle {
    /// Force a blocked `select()` to return, possibly with an empty
    /// ready set (spurious wake-up)
    pub fn wakeup(&self) {
        self.shared.wake.notify_one();
    }

    /// Close the multiplexer: every current and future `select()`
    /// fails with [`Closed`]
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
    }

    /// Whether `close()` has been called
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

/// Readiness multiplexer over a dynamic set of registered channels
#[derive(Debug)]
pub struct Multiplexer {
    slots: HashMap<Token, Source>,
    next_token: usize,
    shared: Arc<Shared>,
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Multiplexer {
    /// Create an empty multiplexer
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            next_token: 0,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Get a handle for waking or closing this multiplexer
    pub fn handle(&self) -> MuxHandle {
        MuxHandle {
            shared: self.shared.clone(),
        }
    }

    fn allocate(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// Register a listening channel for accept readiness
    pub fn register_listener(&mut self, listener: TcpListener) -> Token {
        let token = self.allocate();
        self.slots.insert(token, Source::Listener(listener));
        token
    }

    /// Register an established connection for read readiness
    pub fn register_stream(&mut self, stream: Arc<TcpStream>) -> Token {
        let token = self.allocate();
        self.slots.insert(token, Source::Stream(stream));
        token
    }

    /// Remove a channel's registration
    ///
    /// Takes effect on the next `select()`; a concurrent `select()`
    /// is woken so it re-evaluates. Returns the source so the caller
    /// decides when the underlying socket actually closes.
    pub fn cancel(&mut self, token: Token) -> Option<Source> {
        let source = self.slots.remove(&token);
        if source.is_some() {
            self.shared.wake.notify_one();
        }
        source
    }

    /// Look up a registered connection by token
    pub fn stream(&self, token: Token) -> Option<&Arc<TcpStream>> {
        match self.slots.get(&token) {
            Some(Source::Stream(stream)) => Some(stream),
            _ => None,
        }
    }

    /// Enumerate every registered connection (the broadcast registry)
    ///
    /// Listening channels are skipped.
    pub fn streams(&self) -> impl Iterator<Item = (Token, &Arc<TcpStream>)> {
        self.slots.iter().filter_map(|(&token, source)| match source {
            Source::Stream(stream) => Some((token, stream)),
            Source::Listener(_) => None,
        })
    }

    /// Number of registered connections, listener excluded
    pub fn stream_count(&self) -> usize {
        self.streams().count()
    }

    /// Block until at least one registered channel is ready, the
    /// handle wakes us, or the multiplexer is closed
    ///
    /// Returns every event ready at the moment of wake-up; a plain
    /// `wakeup()` yields an empty set. Fails with [`Closed`] once
    /// `close()` has been called.
    pub async fn select(&mut self) -> Result<Vec<Event>, Closed> {
        // Arm the waiter before checking the flag so a close() racing
        // with this call cannot be lost (notify_one stores a permit).
        let wake = self.shared.wake.notified();
        tokio::pin!(wake);

        if self.shared.is_closed() {
            return Err(Closed);
        }

        let mut ready: FuturesUnordered<_> = self
            .slots
            .iter()
            .map(|(&token, source)| Self::watch(token, source))
            .collect();

        let first = tokio::select! {
            _ = &mut wake => {
                return if self.shared.is_closed() {
                    Err(Closed)
                } else {
                    Ok(Vec::new())
                };
            }
            Some(event) = ready.next() => event,
        };

        // Drain whatever else is already ready without blocking again.
        let mut events = vec![first];
        while let Some(Some(event)) = ready.next().now_or_never() {
            events.push(event);
        }
        Ok(events)
    }

    async fn watch(token: Token, source: &Source) -> Event {
        match source {
            // accept() is cancel-safe: losing the select race loses
            // no pending connection.
            Source::Listener(listener) => match listener.accept().await {
                Ok((stream, addr)) => Event::Incoming { token, stream, addr },
                Err(error) => Event::Faulted { token, error },
            },
            Source::Stream(stream) => match stream.ready(Interest::READABLE).await {
                Ok(_) => Event::Readable { token },
                Err(error) => Event::Faulted { token, error },
            },
        }
    }
}
