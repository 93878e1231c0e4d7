//! Chat client event loop and send operation
//!
//! The client runs two concurrent tasks: this read loop, blocked in
//! `select()`, and the input task feeding [`Sender::send`]. The only
//! state they share is the `Arc`-shared connection (whose readiness
//! calls all take `&self`) and the multiplexer handle, so no locking
//! is needed.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::error::ChatError;
use crate::input;
use crate::mux::{Event, Multiplexer, MuxHandle};
use crate::transfer;
use crate::QUIT;

/// Write side of the client, shared with the input task
#[derive(Debug, Clone)]
pub struct Sender {
    stream: Arc<TcpStream>,
    handle: MuxHandle,
}

impl Sender {
    pub fn new(stream: Arc<TcpStream>, handle: MuxHandle) -> Self {
        Self { stream, handle }
    }

    /// Send one line to the server
    ///
    /// An empty line is a no-op. Sending the quit token additionally
    /// closes the multiplexer once the write has fully flushed, which
    /// tells the read loop to exit.
    pub async fn send(&self, line: &str) -> io::Result<()> {
        if line.is_empty() {
            return Ok(());
        }
        transfer::write_all(self.stream.as_ref(), line.as_bytes()).await?;
        if line == QUIT {
            self.handle.close();
        }
        Ok(())
    }
}

/// The chat client
pub struct ChatClient {
    host: String,
    port: u16,
}

impl ChatClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Connect and run until the session ends, reading console input
    pub async fn run(self) -> Result<(), ChatError> {
        self.run_with(BufReader::new(tokio::io::stdin())).await
    }

    /// Connect and run with an arbitrary input source
    ///
    /// Connect failure is fatal. After the handshake the input task
    /// is spawned and the loop waits for read readiness; it exits
    /// cleanly when the server closes the connection or when the
    /// input task closes the multiplexer (quit path).
    pub async fn run_with<R>(self, input: R) -> Result<(), ChatError>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        info!("connected to {}:{}", self.host, self.port);

        let stream = Arc::new(stream);
        let mut mux = Multiplexer::new();
        mux.register_stream(stream.clone());

        let sender = Sender::new(stream.clone(), mux.handle());
        tokio::spawn(input::run_input(input, sender));

        loop {
            let events = match mux.select().await {
                Ok(events) => events,
                Err(_closed) => {
                    debug!("multiplexer closed, leaving");
                    return Ok(());
                }
            };

            for event in events {
                match event {
                    Event::Readable { .. } => {
                        // A read error here is a connection drop, not
                        // a crash: log it and leave cleanly, same as
                        // the Faulted arm below.
                        let drained = match transfer::drain(stream.as_ref()) {
                            Ok(drained) => drained,
                            Err(e) => {
                                warn!("connection lost: {e}");
                                return Ok(());
                            }
                        };
                        let text = drained.text();
                        if !text.is_empty() {
                            println!("{text}");
                        }
                        if drained.eof {
                            info!("server closed the connection");
                            return Ok(());
                        }
                    }
                    Event::Faulted { error, .. } => {
                        warn!("connection lost: {error}");
                        return Ok(());
                    }
                    Event::Incoming { .. } => {
                        // The client never registers a listener.
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_connection_reset_exits_cleanly() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = ChatClient::new("127.0.0.1", addr.port());
        let join = tokio::spawn(client.run_with(BufReader::new(tokio::io::empty())));

        // Abort the accepted socket so the client sees a reset at
        // read time rather than an orderly EOF.
        let (accepted, _) = listener.accept().await.unwrap();
        accepted.set_linger(Some(Duration::ZERO)).unwrap();
        drop(accepted);

        // A dropped connection is informational, never an error exit.
        let result = timeout(Duration::from_secs(2), join)
            .await
            .expect("client loop did not stop after the reset")
            .unwrap();
        assert!(result.is_ok(), "expected clean exit, got {:?}", result);
    }
}
