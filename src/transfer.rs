//! Non-blocking I/O transfer primitives
//!
//! Two operations the event loops build on:
//! - [`drain`]: read everything currently available on a channel,
//!   keeping "nothing more right now" distinct from "peer closed"
//! - [`write_all`]: write until the whole buffer is flushed, retrying
//!   past partial writes and `WouldBlock`
//!
//! Both run against the [`RawIo`] seam so the loops can be exercised
//! with a scripted transport instead of real sockets.

use std::io;

use tokio::net::TcpStream;

use crate::BUFFER_SIZE;

/// Non-blocking transport seam
///
/// `try_read`/`try_write` must return `WouldBlock` instead of
/// waiting; `writable` suspends until another `try_write` is worth
/// attempting.
pub trait RawIo {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;
    fn writable(&self) -> impl std::future::Future<Output = io::Result<()>> + Send;
}

impl RawIo for TcpStream {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }

    async fn writable(&self) -> io::Result<()> {
        TcpStream::writable(self).await
    }
}

/// Outcome of one drain cycle
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Drained {
    /// Every byte that was immediately available this cycle
    pub bytes: Vec<u8>,
    /// Whether the peer has closed its write side
    pub eof: bool,
}

impl Drained {
    /// Decode the drained bytes as UTF-8 text, lossily
    ///
    /// Boundaries are whatever this cycle collected, so a multi-byte
    /// character split across cycles may decode with replacement
    /// characters. Framing is out of scope by design.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Read every currently-available byte from a readable channel
///
/// Loops over a fresh fixed-size buffer until the channel reports
/// `WouldBlock` (drained for this cycle) or EOF. A spurious readiness
/// wake-up yields `Drained { bytes: [], eof: false }` and must not be
/// confused with a disconnect.
pub fn drain(io: &impl RawIo) -> io::Result<Drained> {
    let mut buf = [0u8; BUFFER_SIZE];
    let mut drained = Drained::default();
    loop {
        match io.try_read(&mut buf) {
            Ok(0) => {
                drained.eof = true;
                return Ok(drained);
            }
            Ok(n) => drained.bytes.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(drained),
            Err(e) => return Err(e),
        }
    }
}

/// Write the full buffer to a non-blocking channel
///
/// Partial writes are not errors: the remainder is retried until the
/// buffer is exhausted. On `WouldBlock` the call suspends until the
/// channel is writable again.
pub async fn write_all(io: &impl RawIo, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match io.try_write(buf) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => io.writable().await?,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// One scripted `try_read` outcome
    #[derive(Debug)]
    pub enum ReadStep {
        Data(Vec<u8>),
        WouldBlock,
        Eof,
    }

    /// Scripted in-memory transport
    ///
    /// Reads follow `script` in order; writes accept at most
    /// `write_cap` bytes per call (0 entries in `write_stalls`
    /// inject a WouldBlock first).
    #[derive(Debug, Default)]
    pub struct FakeIo {
        pub script: Mutex<VecDeque<ReadStep>>,
        pub written: Mutex<Vec<u8>>,
        pub write_cap: usize,
        pub write_stalls: Mutex<usize>,
    }

    impl FakeIo {
        pub fn reading(steps: Vec<ReadStep>) -> Self {
            Self {
                script: Mutex::new(steps.into()),
                write_cap: usize::MAX,
                ..Self::default()
            }
        }

        pub fn writing(write_cap: usize, write_stalls: usize) -> Self {
            Self {
                write_cap,
                write_stalls: Mutex::new(write_stalls),
                ..Self::default()
            }
        }
    }

    impl RawIo for FakeIo {
        fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
            let mut script = self.script.lock().unwrap();
            match script.pop_front() {
                Some(ReadStep::Data(bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    if n < bytes.len() {
                        script.push_front(ReadStep::Data(bytes[n..].to_vec()));
                    }
                    Ok(n)
                }
                Some(ReadStep::WouldBlock) | None => {
                    Err(io::ErrorKind::WouldBlock.into())
                }
                Some(ReadStep::Eof) => Ok(0),
            }
        }

        fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
            let mut stalls = self.write_stalls.lock().unwrap();
            if *stalls > 0 {
                *stalls -= 1;
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.write_cap);
            self.written.lock().unwrap().extend_from_slice(&buf[..n]);
            Ok(n)
        }

        async fn writable(&self) -> io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::{FakeIo, ReadStep};
    use super::*;

    #[test]
    fn test_drain_collects_until_wouldblock() {
        let io = FakeIo::reading(vec![
            ReadStep::Data(b"hel".to_vec()),
            ReadStep::Data(b"lo".to_vec()),
            ReadStep::WouldBlock,
            ReadStep::Data(b"later".to_vec()),
        ]);

        let drained = drain(&io).unwrap();
        assert_eq!(drained.bytes, b"hello");
        assert!(!drained.eof);
    }

    #[test]
    fn test_drain_detects_eof() {
        let io = FakeIo::reading(vec![
            ReadStep::Data(b"bye".to_vec()),
            ReadStep::Eof,
        ]);

        let drained = drain(&io).unwrap();
        assert_eq!(drained.bytes, b"bye");
        assert!(drained.eof);
    }

    #[test]
    fn test_spurious_wakeup_is_not_a_disconnect() {
        let io = FakeIo::reading(vec![ReadStep::WouldBlock]);
        let drained = drain(&io).unwrap();
        assert!(drained.bytes.is_empty());
        assert!(!drained.eof);
    }

    #[test]
    fn test_drain_across_cycles_loses_nothing() {
        // First cycle reports nothing, later cycles carry the data.
        let io = FakeIo::reading(vec![
            ReadStep::WouldBlock,
            ReadStep::Data(b"abc".to_vec()),
            ReadStep::WouldBlock,
            ReadStep::Data(b"def".to_vec()),
            ReadStep::Eof,
        ]);

        let mut collected = Vec::new();
        let first = drain(&io).unwrap();
        assert!(first.bytes.is_empty());
        let second = drain(&io).unwrap();
        collected.extend_from_slice(&second.bytes);
        let third = drain(&io).unwrap();
        collected.extend_from_slice(&third.bytes);

        assert_eq!(collected, b"abcdef");
        assert!(third.eof);
    }

    #[tokio::test]
    async fn test_write_all_one_byte_per_call() {
        let io = FakeIo::writing(1, 0);
        write_all(&io, b"hello world").await.unwrap();
        assert_eq!(io.written.lock().unwrap().as_slice(), b"hello world");
    }

    #[tokio::test]
    async fn test_write_all_retries_past_wouldblock() {
        let io = FakeIo::writing(4, 2);
        write_all(&io, b"partial delivery").await.unwrap();
        assert_eq!(io.written.lock().unwrap().as_slice(), b"partial delivery");
    }

    #[test]
    fn test_lossy_text_decode() {
        let drained = Drained {
            bytes: b"caf\xc3\xa9".to_vec(),
            eof: false,
        };
        assert_eq!(drained.text(), "café");
    }
}
