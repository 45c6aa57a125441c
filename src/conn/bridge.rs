//! Local I/O bridge
//!
//! Exposes the local side of a connection (standard input and standard
//! output for the real tool) as a source and sink that the engine polls
//! from its own loop.
//!
//! The descriptors keep their blocking mode. Standard input often shares its
//! open file description with the shell and every other process on the
//! terminal, so `O_NONBLOCK` set here would leak to all of them. Instead each
//! read and write is preceded by a zero timeout poll, and writes are capped at
//! `PIPE_BUF` so a writable pipe accepts the whole request at once.

use super::poll::{self, PollEvents};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, RawFd};

/// Largest single write to the sink
const MAX_LOCAL_WRITE: usize = libc::PIPE_BUF;

/// Local byte source and sink that never blocks the engine
pub struct LocalBridge<R, W> {
    source: R,
    sink: W,
}

impl LocalBridge<File, File> {
    /// Bridge this process's standard input and output.
    ///
    /// Works on duplicates of descriptors 0 and 1 so the process-wide
    /// `Stdin`/`Stdout` buffers are never involved.
    pub fn stdio() -> io::Result<Self> {
        let stdin = File::from(io::stdin().as_fd().try_clone_to_owned()?);
        let stdout = File::from(io::stdout().as_fd().try_clone_to_owned()?);
        Ok(Self::new(stdin, stdout))
    }
}

impl<R: Read + AsRawFd, W: Write + AsRawFd> LocalBridge<R, W> {
    pub fn new(source: R, sink: W) -> Self {
        LocalBridge { source, sink }
    }

    pub fn source_fd(&self) -> RawFd {
        self.source.as_raw_fd()
    }

    pub fn sink_fd(&self) -> RawFd {
        self.sink.as_raw_fd()
    }

    /// Read what is available; `WouldBlock` when nothing is
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !poll::ready_now(self.source_fd(), PollEvents::Read)? {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        self.source.read(buf)
    }

    /// Write what fits; `WouldBlock` when nothing does
    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !poll::ready_now(self.sink_fd(), PollEvents::Write)? {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let len = buf.len().min(MAX_LOCAL_WRITE);
        self.sink.write(&buf[..len])
    }
}
