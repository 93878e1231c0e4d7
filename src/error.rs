//! Error types for the chat service
//!
//! Defines the loop-level error taxonomy. Per-connection I/O failures
//! are deliberately absent: they are handled (logged, channel culled)
//! at the point they occur and never propagate out of a loop.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::mux;

/// Loop-level errors for the server and client
#[derive(Debug, Error)]
pub enum ChatError {
    /// IO error during setup or on the loop's own channel (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The multiplexer was closed while the loop was using it
    ///
    /// Expected during deliberate shutdown; loops convert it into a
    /// clean exit rather than reporting it.
    #[error("multiplexer closed")]
    MuxClosed(#[from] mux::Closed),
}
