//! Input task
//!
//! Reads lines from a local input source and pushes them into the
//! client's send operation. Runs on its own task, isolated from the
//! read loop; with `tokio::io::stdin` the actual blocking read sits
//! on tokio's blocking thread pool.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error};

use crate::client::Sender;
use crate::QUIT;

/// Feed lines from `reader` into `sender` until the session ends
///
/// Ends after sending the quit token, when the input source is
/// exhausted, or on a send failure.
pub async fn run_input<R>(reader: R, sender: Sender)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Err(e) = sender.send(&line).await {
                    error!("send failed: {e}");
                    break;
                }
                if line == QUIT {
                    break;
                }
            }
            Ok(None) => {
                debug!("input source closed");
                break;
            }
            Err(e) => {
                error!("input read failed: {e}");
                break;
            }
        }
    }
    debug!("input task ended");
}
