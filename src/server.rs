//! Server role
//!
//! Listens on a port and serves one connection at a time: each accepted
//! socket is wrapped with the server identity and client-auth policy and
//! handed to a fresh engine bridged to the terminal.

use crate::conn::{
    CloseCause, ConnectionEngine, ConnectionObserver, DisplayOptions, Error, LocalBridge, Result,
};
use crate::tls::TlsConfig;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener};
use std::os::fd::AsRawFd;
use tracing::{debug, error, info, warn};

const LISTEN_BACKLOG: i32 = 16;

/// Reports one accepted connection
struct ServerObserver {
    peer: SocketAddr,
}

impl ConnectionObserver for ServerObserver {
    fn on_opened(&mut self) {
        debug!("serving {}", self.peer);
    }

    fn on_closed(&mut self, cause: &CloseCause) {
        info!("connection from {} finished ({})", self.peer, cause);
    }
}

/// TLS server handling accepted connections serially
pub struct TlsServer {
    config: TlsConfig,
    listener: TcpListener,
    options: DisplayOptions,
}

impl TlsServer {
    /// Listen on `addr`
    pub fn bind(config: TlsConfig, addr: SocketAddr, options: DisplayOptions) -> Result<Self> {
        let listener = listen(addr, false)?;
        Ok(TlsServer {
            config,
            listener,
            options,
        })
    }

    /// Listen on `port` on all addresses, IPv6 and IPv4 where available
    pub fn bind_port(config: TlsConfig, port: u16, options: DisplayOptions) -> Result<Self> {
        let any_v6 = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
        let listener = match listen(any_v6, true) {
            Ok(listener) => listener,
            Err(e) => {
                debug!("dual-stack listen failed ({}), using IPv4 only", e);
                listen(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)), false)?
            }
        };

        Ok(TlsServer {
            config,
            listener,
            options,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept one connection and run it against the given local streams
    pub fn accept_with<R, W>(&self, local: LocalBridge<R, W>) -> Result<CloseCause>
    where
        R: Read + AsRawFd,
        W: Write + AsRawFd,
    {
        let (stream, peer) = self.listener.accept()?;
        info!("accepted connection from {}", peer);

        stream.set_nodelay(true)?;
        let pair = self.config.accept(stream)?;

        let mut engine = ConnectionEngine::new(self.options, ServerObserver { peer });
        engine.start_connection(pair, local);
        engine.run()
    }

    /// Serve connections until the process is terminated
    pub fn run(&self) -> Result<()> {
        info!("listening on {}", self.local_addr()?);

        loop {
            let local = LocalBridge::stdio()?;
            match self.accept_with(local).and_then(CloseCause::into_result) {
                Ok(()) => {}
                Err(e @ (Error::TrustEvaluation(_) | Error::Handshake(_))) => {
                    warn!("connection ended abnormally: {}", e)
                }
                Err(e) => error!("connection failed: {}", e),
            }
        }
    }
}

fn listen(addr: SocketAddr, dual_stack: bool) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    if dual_stack {
        socket.set_only_v6(false)?;
    }
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
