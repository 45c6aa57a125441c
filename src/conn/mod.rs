//! Connection engine
//!
//! This module owns the part of the tool shared by both roles: one TLS stream
//! pair bridged to the local terminal.
//!
//! # Architecture
//!
//! - `LocalBridge` wraps standard input/output as a source/sink that is only
//!   read or written once `poll(2)` reports it ready
//! - `ConnectionEngine` owns a `TlsStreamPair` and a `LocalBridge` and runs a
//!   single-threaded `poll(2)` loop that pumps bytes both ways, drives the
//!   handshake, reports the peer chain and enforces the trust verdict
//! - `ConnectionObserver` is how a role learns that the connection opened and
//!   why it closed
//!
//! All state transitions happen on the thread that calls
//! [`ConnectionEngine::run`]. The only other context is OpenSSL's
//! verification callback, which hands its verdict over through a slot on the
//! stream pair.
//!
//! # Examples
//!
//! ```no_run
//! use tlstool::conn::{CloseCause, ConnectionEngine, ConnectionObserver, DisplayOptions, LocalBridge};
//! use tlstool::tls::TlsConfig;
//! use std::net::TcpStream;
//!
//! struct Quiet;
//!
//! impl ConnectionObserver for Quiet {
//!     fn on_closed(&mut self, cause: &CloseCause) {
//!         eprintln!("closed: {}", cause);
//!     }
//! }
//!
//! let config = TlsConfig::client().servername("example.com").build().unwrap();
//! let pair = config.connect(TcpStream::connect("example.com:443").unwrap()).unwrap();
//!
//! let mut engine = ConnectionEngine::new(DisplayOptions::default(), Quiet);
//! engine.start_connection(pair, LocalBridge::stdio().unwrap());
//! if let Err(e) = engine.run().and_then(CloseCause::into_result) {
//!     eprintln!("{}", e);
//!     std::process::exit(1);
//! }
//! ```

pub mod bridge;
pub mod engine;
pub mod poll;
pub mod translate;

pub use bridge::LocalBridge;
pub use engine::ConnectionEngine;
pub use translate::LineTranslator;

use std::fmt;

/// Result type for connection operations
pub type Result<T> = std::result::Result<T, Error>;

/// Connection errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Read or write failure on the TLS stream or the local streams
    #[error("Stream I/O error: {0}")]
    Stream(#[from] std::io::Error),

    /// TLS failure after the handshake
    #[error("TLS error: {0}")]
    Tls(#[from] crate::tls::TlsError),

    /// TLS negotiation failure
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The peer chain failed required validation
    #[error("Trust evaluation failed: {0}")]
    TrustEvaluation(String),

    /// Invalid host, port or identity, caught before any connection exists
    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Connection not started")]
    NotStarted,
}

/// Bytes moved per read in either direction
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Why a connection closed
#[derive(Debug)]
pub enum CloseCause {
    /// Clean end of stream in either direction
    Eof,
    /// Stream or handshake failure
    Error(Error),
    /// The trust policy rejected the peer
    TrustRejected(String),
}

impl CloseCause {
    pub fn is_clean(&self) -> bool {
        matches!(self, CloseCause::Eof)
    }

    /// `Ok` for a clean close, otherwise the error that ended the connection
    pub fn into_result(self) -> Result<()> {
        match self {
            CloseCause::Eof => Ok(()),
            CloseCause::Error(e) => Err(e),
            CloseCause::TrustRejected(reason) => Err(Error::TrustEvaluation(reason)),
        }
    }
}

impl fmt::Display for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseCause::Eof => f.write_str("EOF"),
            CloseCause::Error(e) => write!(f, "error: {}", e),
            CloseCause::TrustRejected(reason) => write!(f, "trust rejected: {}", reason),
        }
    }
}

/// Engine lifecycle
#[derive(Debug)]
pub enum ConnectionState {
    NotStarted,
    Open,
    Closed(CloseCause),
}

/// Per-connection display settings, fixed for the connection's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayOptions {
    /// Log a summary and hex dump of each peer certificate
    pub show_certificates: bool,
    /// Send typed line feeds as CR LF
    pub translate_line_feed_to_crlf: bool,
}

/// How a role hears about its connection
pub trait ConnectionObserver {
    /// The stream pair has been taken over and the engine is running
    fn on_opened(&mut self) {}

    /// The connection closed; called exactly once, on the engine's thread
    fn on_closed(&mut self, cause: &CloseCause);
}
