//! Readiness polling for the engine loop
//!
//! Thin wrappers over `poll(2)` and `fcntl(2)`. The TLS socket is switched
//! to non-blocking mode; the local streams are only touched after a zero
//! timeout poll says they are ready.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
    Both,
}

impl PollEvents {
    /// Combine optional read and write interest
    pub fn from_interest(read: bool, write: bool) -> Option<Self> {
        match (read, write) {
            (true, true) => Some(PollEvents::Both),
            (true, false) => Some(PollEvents::Read),
            (false, true) => Some(PollEvents::Write),
            (false, false) => None,
        }
    }

    fn bits(self) -> libc::c_short {
        use libc::{POLLIN, POLLOUT};
        match self {
            PollEvents::Read => POLLIN,
            PollEvents::Write => POLLOUT,
            PollEvents::Both => POLLIN | POLLOUT,
        }
    }
}

/// One descriptor registered for a poll round
#[derive(Debug, Clone, Copy)]
pub struct Registration {
    pub fd: RawFd,
    pub events: PollEvents,
    pub readable: bool,
    pub writable: bool,
}

impl Registration {
    pub fn new(fd: RawFd, events: PollEvents) -> Self {
        Registration {
            fd,
            events,
            readable: false,
            writable: false,
        }
    }
}

/// Wait until at least one registration is ready or the timeout elapses.
///
/// Hang-ups and errors count as ready in the registered direction so the
/// following read or write reports them. An interrupted wait returns `Ok(0)`.
pub fn wait(registrations: &mut [Registration], timeout: Option<Duration>) -> io::Result<usize> {
    use libc::{poll, pollfd, POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT};

    let mut pfds: Vec<pollfd> = registrations
        .iter()
        .map(|r| pollfd {
            fd: r.fd,
            events: r.events.bits(),
            revents: 0,
        })
        .collect();

    let timeout_ms = timeout
        .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
        .unwrap_or(-1); // -1 = infinite

    let result = unsafe { poll(pfds.as_mut_ptr(), pfds.len() as libc::nfds_t, timeout_ms) };

    if result < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(0);
        }
        return Err(err);
    }

    let failure = POLLERR | POLLHUP | POLLNVAL;
    for (registration, pfd) in registrations.iter_mut().zip(&pfds) {
        let wants_read = pfd.events & POLLIN != 0;
        let wants_write = pfd.events & POLLOUT != 0;
        registration.readable = wants_read && pfd.revents & (POLLIN | failure) != 0;
        registration.writable = wants_write && pfd.revents & (POLLOUT | failure) != 0;
    }

    Ok(result as usize)
}

/// Switch a descriptor to non-blocking mode, returning its previous flags
pub fn set_nonblocking(fd: RawFd) -> io::Result<libc::c_int> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    if flags & libc::O_NONBLOCK == 0 {
        let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(flags)
}

/// Check readiness without waiting
pub fn ready_now(fd: RawFd, events: PollEvents) -> io::Result<bool> {
    let mut registration = [Registration::new(fd, events)];
    wait(&mut registration, Some(Duration::ZERO))?;
    Ok(registration[0].readable || registration[0].writable)
}
