//! The connection engine
//!
//! One engine owns one TLS stream pair and one local bridge. [`run`] loops on
//! the calling thread: it makes every transfer that can happen without
//! blocking, then waits in `poll(2)` for the descriptors whose readiness
//! would unblock the rest.
//!
//! Each direction holds at most one chunk. Nothing is read from a source
//! until the previous chunk from it has been fully written to its sink.
//!
//! [`run`]: ConnectionEngine::run

use super::bridge::LocalBridge;
use super::poll::{self, PollEvents, Registration};
use super::translate::LineTranslator;
use super::{CloseCause, ConnectionObserver, ConnectionState, DisplayOptions, Error, Result, CHUNK_SIZE};
use crate::tls::cert::{hex_dump, summarize};
use crate::tls::{ChainCheck, ChainStatus, Progress, TlsError, TlsStreamPair, TrustVerdict};
use bytes::{Buf, BytesMut};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use tracing::{debug, error, info, trace, warn};

/// Drives one connection from `NotStarted` to `Closed`
pub struct ConnectionEngine<S, R, W, O> {
    options: DisplayOptions,
    observer: O,
    state: ConnectionState,
    session: Option<Session<S, R, W>>,
}

impl<S, R, W, O> ConnectionEngine<S, R, W, O>
where
    S: Read + Write + AsRawFd,
    R: Read + AsRawFd,
    W: Write + AsRawFd,
    O: ConnectionObserver,
{
    pub fn new(options: DisplayOptions, observer: O) -> Self {
        ConnectionEngine {
            options,
            observer,
            state: ConnectionState::NotStarted,
            session: None,
        }
    }

    /// Take ownership of a stream pair and the local bridge.
    ///
    /// Only the first call has an effect. Later calls log a warning and drop
    /// what they were given.
    pub fn start_connection(&mut self, pair: TlsStreamPair<S>, local: LocalBridge<R, W>) {
        if !matches!(self.state, ConnectionState::NotStarted) {
            warn!("connection already started, ignoring new stream pair");
            return;
        }

        self.session = Some(Session::new(pair, local, self.options));
        self.state = ConnectionState::Open;
        debug!("connection open, waiting for handshake");
        self.observer.on_opened();
    }

    pub fn is_started(&self) -> bool {
        !matches!(self.state, ConnectionState::NotStarted)
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Close the connection. Only the first close is recorded and reported.
    pub fn close(&mut self, cause: CloseCause) {
        if matches!(self.state, ConnectionState::Closed(_)) {
            debug!("close ignored, connection already closed");
            return;
        }

        if let Some(mut session) = self.session.take() {
            if cause.is_clean() {
                session.tls.shutdown();
            }
        }

        match &cause {
            CloseCause::Eof => info!("connection closed: EOF"),
            CloseCause::Error(e) => error!("connection closed: {}", e),
            CloseCause::TrustRejected(reason) => warn!("connection closed: trust rejected: {}", reason),
        }

        self.observer.on_closed(&cause);
        self.state = ConnectionState::Closed(cause);
    }

    /// Drive the connection until it closes and return why it closed
    pub fn run(mut self) -> Result<CloseCause> {
        if matches!(self.state, ConnectionState::NotStarted) {
            return Err(Error::NotStarted);
        }

        while let Some(session) = self.session.as_mut() {
            match session.step() {
                Ok(None) => {}
                Ok(Some(cause)) => self.close(cause),
                Err(e) => self.close(CloseCause::Error(e)),
            }
        }

        match self.state {
            ConnectionState::Closed(cause) => Ok(cause),
            _ => Err(Error::NotStarted),
        }
    }
}

/// Transfer state of an open connection
struct Session<S, R, W> {
    tls: TlsStreamPair<S>,
    local: LocalBridge<R, W>,
    options: DisplayOptions,
    /// Decrypted bytes waiting for the local sink
    to_local: BytesMut,
    /// Local bytes waiting for the TLS stream
    to_remote: BytesMut,
    translator: Option<LineTranslator>,
    scratch: Box<[u8]>,
    handshake_done: bool,
    handshake_wants: PollEvents,
    remote_eof: bool,
    local_eof: bool,
    // TLS reads and writes can each need the opposite readiness
    tls_read_wants_write: bool,
    tls_write_wants_read: bool,
}

impl<S, R, W> Session<S, R, W>
where
    S: Read + Write + AsRawFd,
    R: Read + AsRawFd,
    W: Write + AsRawFd,
{
    fn new(tls: TlsStreamPair<S>, local: LocalBridge<R, W>, options: DisplayOptions) -> Self {
        Session {
            tls,
            local,
            options,
            to_local: BytesMut::with_capacity(CHUNK_SIZE),
            to_remote: BytesMut::with_capacity(CHUNK_SIZE * 2),
            translator: options.translate_line_feed_to_crlf.then(LineTranslator::new),
            scratch: vec![0u8; CHUNK_SIZE].into_boxed_slice(),
            handshake_done: false,
            handshake_wants: PollEvents::Read,
            remote_eof: false,
            local_eof: false,
            tls_read_wants_write: false,
            tls_write_wants_read: false,
        }
    }

    /// Make all progress possible without blocking, then wait for readiness.
    /// Returns a cause once the connection should close.
    fn step(&mut self) -> Result<Option<CloseCause>> {
        if !self.handshake_done {
            if let Some(cause) = self.drive_handshake()? {
                return Ok(Some(cause));
            }
            if !self.handshake_done {
                self.wait()?;
                return Ok(None);
            }
        }

        loop {
            let mut progress = self.pump_from_remote()?;
            progress |= self.flush_to_local()?;
            progress |= self.pump_from_local()?;
            progress |= self.flush_to_remote()?;

            if self.finishing() && self.to_local.is_empty() && self.to_remote.is_empty() {
                debug!(
                    "{} finished sending",
                    if self.remote_eof { "peer" } else { "local input" }
                );
                return Ok(Some(CloseCause::Eof));
            }
            if !progress {
                break;
            }
        }

        self.wait()?;
        Ok(None)
    }

    /// Either side reached EOF; nothing new is read, buffered bytes still go out
    fn finishing(&self) -> bool {
        self.remote_eof || self.local_eof
    }

    fn drive_handshake(&mut self) -> Result<Option<CloseCause>> {
        match self.tls.handshake() {
            Ok(Progress::Ready(())) => {
                self.handshake_done = true;
                Ok(self.on_certificates_available())
            }
            Ok(Progress::WantRead) => {
                self.handshake_wants = PollEvents::Read;
                Ok(None)
            }
            Ok(Progress::WantWrite) => {
                self.handshake_wants = PollEvents::Write;
                Ok(None)
            }
            Ok(Progress::Eof) => Ok(Some(CloseCause::Error(Error::Handshake(
                "peer closed the connection during the handshake".to_string(),
            )))),
            Err(e) => Ok(Some(self.handshake_failure(e))),
        }
    }

    /// Turn a failed handshake into a close cause, blaming trust when the
    /// policy explains the failure.
    fn handshake_failure(&mut self, err: TlsError) -> CloseCause {
        if let Some(check) = self.tls.take_chain_check() {
            if let TrustVerdict::Reject(reason) = check.verdict {
                return CloseCause::TrustRejected(reason);
            }
        }

        if let TlsError::PeerCertificateMissing(_) = err {
            if let TrustVerdict::Reject(reason) = self.tls.policy().evaluate(&ChainStatus::Absent) {
                return CloseCause::TrustRejected(reason);
            }
        }

        CloseCause::Error(Error::Handshake(err.to_string()))
    }

    fn on_certificates_available(&mut self) -> Option<CloseCause> {
        info!("handshake complete: {}", self.tls.info());

        let chain = self.tls.peer_chain();
        let check = self.tls.take_chain_check().unwrap_or_else(|| {
            // No verification ran: nothing was presented, or the session was resumed
            let status = if chain.is_empty() {
                ChainStatus::Absent
            } else {
                ChainStatus::Valid
            };
            ChainCheck::evaluate(self.tls.policy(), status)
        });

        info!("peer presented {} certificate(s)", chain.len());
        if self.options.show_certificates {
            for (depth, der) in chain.iter().enumerate() {
                info!("certificate {}: {}", depth, summarize(der));
                for line in hex_dump(der).lines() {
                    info!("  {}", line);
                }
            }
        }

        match check.verdict {
            TrustVerdict::Accept => {
                info!("peer accepted: {}", check.status);
                None
            }
            TrustVerdict::Reject(reason) => Some(CloseCause::TrustRejected(reason)),
        }
    }

    /// Read one chunk from the TLS stream if the local-bound buffer is free
    fn pump_from_remote(&mut self) -> Result<bool> {
        if self.finishing() || !self.to_local.is_empty() {
            return Ok(false);
        }

        match self.tls.read(&mut self.scratch)? {
            Progress::Ready(0) | Progress::Eof => {
                self.remote_eof = true;
                self.tls_read_wants_write = false;
                Ok(true)
            }
            Progress::Ready(n) => {
                trace!("received {} bytes from peer", n);
                self.tls_read_wants_write = false;
                self.to_local.extend_from_slice(&self.scratch[..n]);
                Ok(true)
            }
            Progress::WantRead => {
                self.tls_read_wants_write = false;
                Ok(false)
            }
            Progress::WantWrite => {
                self.tls_read_wants_write = true;
                Ok(false)
            }
        }
    }

    fn flush_to_local(&mut self) -> Result<bool> {
        let mut progress = false;

        while !self.to_local.is_empty() {
            match self.local.write(&self.to_local) {
                Ok(0) => return Err(Error::Stream(io::ErrorKind::WriteZero.into())),
                Ok(n) => {
                    self.to_local.advance(n);
                    progress = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(progress)
    }

    /// Read one chunk of local input if the remote-bound buffer is free
    fn pump_from_local(&mut self) -> Result<bool> {
        if self.finishing() || !self.to_remote.is_empty() {
            return Ok(false);
        }

        match self.local.read(&mut self.scratch) {
            Ok(0) => {
                self.local_eof = true;
                if let Some(translator) = self.translator.as_mut() {
                    translator.finish(&mut self.to_remote);
                }
                Ok(true)
            }
            Ok(n) => {
                trace!("read {} bytes of local input", n);
                match self.translator.as_mut() {
                    Some(translator) => translator.translate(&self.scratch[..n], &mut self.to_remote),
                    None => self.to_remote.extend_from_slice(&self.scratch[..n]),
                }
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    fn flush_to_remote(&mut self) -> Result<bool> {
        let mut progress = false;

        while !self.to_remote.is_empty() {
            match self.tls.write(&self.to_remote)? {
                Progress::Ready(n) => {
                    self.tls_write_wants_read = false;
                    self.to_remote.advance(n);
                    progress = true;
                }
                Progress::WantWrite => {
                    self.tls_write_wants_read = false;
                    break;
                }
                Progress::WantRead => {
                    self.tls_write_wants_read = true;
                    break;
                }
                Progress::Eof => {
                    debug!("peer closed before {} bytes could be sent", self.to_remote.len());
                    self.to_remote.clear();
                    self.remote_eof = true;
                    return Ok(true);
                }
            }
        }

        Ok(progress)
    }

    /// Block until some descriptor we are waiting on becomes ready
    fn wait(&mut self) -> Result<()> {
        let mut registrations = Vec::with_capacity(3);

        let (tls_read, tls_write) = if !self.handshake_done {
            (
                self.handshake_wants == PollEvents::Read,
                self.handshake_wants == PollEvents::Write,
            )
        } else {
            let reading = !self.finishing() && self.to_local.is_empty();
            let writing = !self.to_remote.is_empty();
            (
                (reading && !self.tls_read_wants_write) || (writing && self.tls_write_wants_read),
                (reading && self.tls_read_wants_write) || (writing && !self.tls_write_wants_read),
            )
        };

        if let Some(events) = PollEvents::from_interest(tls_read, tls_write) {
            registrations.push(Registration::new(self.tls.as_raw_fd(), events));
        }

        if self.handshake_done {
            if !self.finishing() && self.to_remote.is_empty() {
                registrations.push(Registration::new(self.local.source_fd(), PollEvents::Read));
            }
            if !self.to_local.is_empty() {
                registrations.push(Registration::new(self.local.sink_fd(), PollEvents::Write));
            }
        }

        if registrations.is_empty() {
            return Ok(());
        }

        poll::wait(&mut registrations, None)?;
        Ok(())
    }
}
