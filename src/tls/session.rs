//! TLS stream pairs
//!
//! A [`TlsStreamPair`] is one TLS connection seen as two directions: the input
//! stream (bytes arriving from the peer) and the output stream (bytes going to
//! it). Both directions share one non-blocking socket and one OpenSSL state,
//! so they are opened, polled and closed as a unit.
//!
//! Every operation returns immediately with a [`Progress`] telling the caller
//! what the stream needs before it can make further progress.

use super::cert::PeerChain;
use super::config::{TlsConfig, TlsError};
use super::info::HandshakeInfo;
use super::trust::{ChainCheck, ChainVerification, PeerPolicy, VerdictSlot};
use crate::conn::poll;
use openssl::ex_data::Index;
use openssl::ssl::{ErrorCode, Ssl, SslStream};
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};

/// Outcome of a non-blocking TLS operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress<T> {
    /// The operation completed
    Ready(T),
    /// Retry once the socket is readable
    WantRead,
    /// Retry once the socket is writable
    WantWrite,
    /// The peer sent close_notify
    Eof,
}

/// Reason string OpenSSL uses when a required client certificate is missing
const NO_PEER_CERT_REASON: &str = "peer did not return a certificate";

/// One TLS connection owned as an input/output stream pair
pub struct TlsStreamPair<S> {
    stream: SslStream<S>,
    policy: PeerPolicy,
    slot: VerdictSlot,
    failed: bool,
}

impl<S: Read + Write + AsRawFd> TlsStreamPair<S> {
    pub(crate) fn new(mut ssl: Ssl, stream: S, config: &TlsConfig) -> Result<Self, TlsError> {
        poll::set_nonblocking(stream.as_raw_fd())?;

        let slot: VerdictSlot = Arc::new(Mutex::new(ChainVerification::default()));
        attach_slot(&mut ssl, config.slot_index, Arc::clone(&slot));

        Ok(TlsStreamPair {
            stream: SslStream::new(ssl, stream)?,
            policy: config.policy,
            slot,
            failed: false,
        })
    }

    pub fn policy(&self) -> PeerPolicy {
        self.policy
    }

    /// Check if a TLS operation failed
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Advance the handshake as far as the socket allows
    pub fn handshake(&mut self) -> Result<Progress<()>, TlsError> {
        match self.stream.do_handshake() {
            Ok(()) => Ok(Progress::Ready(())),
            Err(e) => match e.code() {
                ErrorCode::WANT_READ => Ok(Progress::WantRead),
                ErrorCode::WANT_WRITE => Ok(Progress::WantWrite),
                ErrorCode::ZERO_RETURN => Ok(Progress::Eof),
                _ => {
                    self.failed = true;
                    Err(handshake_error(e))
                }
            },
        }
    }

    /// Read decrypted bytes from the input stream
    pub fn read(&mut self, buf: &mut [u8]) -> Result<Progress<usize>, TlsError> {
        match self.stream.ssl_read(buf) {
            Ok(n) => Ok(Progress::Ready(n)),
            Err(e) => self.classify(e),
        }
    }

    /// Write bytes to the output stream; may accept only part of `buf`
    pub fn write(&mut self, buf: &[u8]) -> Result<Progress<usize>, TlsError> {
        match self.stream.ssl_write(buf) {
            Ok(n) => Ok(Progress::Ready(n)),
            Err(e) => self.classify(e),
        }
    }

    /// Send close_notify if the socket takes it right away
    pub fn shutdown(&mut self) {
        if !self.failed {
            let _ = self.stream.shutdown();
        }
    }

    /// Negotiated parameters of the completed handshake
    pub fn info(&self) -> HandshakeInfo {
        HandshakeInfo::from_ssl(self.stream.ssl())
    }

    /// Peer certificates presented during the handshake
    pub fn peer_chain(&self) -> PeerChain {
        PeerChain::from_ssl(self.stream.ssl())
    }

    /// Take the verdict the verification callback recorded, if it ran
    pub fn take_chain_check(&self) -> Option<ChainCheck> {
        self.slot.lock().ok().and_then(|mut verification| verification.take())
    }

    fn classify<T>(&mut self, e: openssl::ssl::Error) -> Result<Progress<T>, TlsError> {
        match e.code() {
            ErrorCode::WANT_READ => Ok(Progress::WantRead),
            ErrorCode::WANT_WRITE => Ok(Progress::WantWrite),
            ErrorCode::ZERO_RETURN => Ok(Progress::Eof),
            ErrorCode::SYSCALL if e.io_error().is_none() => {
                self.failed = true;
                Err(TlsError::OperationFailed(
                    "peer closed the connection without close_notify".to_string(),
                ))
            }
            _ => {
                self.failed = true;
                match e.into_io_error() {
                    Ok(io) => Err(TlsError::Io(io)),
                    Err(e) => Err(TlsError::OperationFailed(e.to_string())),
                }
            }
        }
    }
}

impl<S: AsRawFd> AsRawFd for TlsStreamPair<S> {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.get_ref().as_raw_fd()
    }
}

fn attach_slot(ssl: &mut Ssl, index: Index<Ssl, VerdictSlot>, slot: VerdictSlot) {
    ssl.set_ex_data(index, slot);
}

fn handshake_error(e: openssl::ssl::Error) -> TlsError {
    let missing_cert = e
        .ssl_error()
        .map(|stack| {
            stack
                .errors()
                .iter()
                .any(|err| err.reason() == Some(NO_PEER_CERT_REASON))
        })
        .unwrap_or(false);

    if missing_cert {
        TlsError::PeerCertificateMissing(e.to_string())
    } else {
        TlsError::HandshakeFailed(e.to_string())
    }
}
