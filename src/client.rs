//! Client role
//!
//! Connects to `host:port`, wraps the socket in TLS with the host as SNI name
//! and verification target, and bridges the connection to the terminal.

use crate::conn::{
    CloseCause, ConnectionEngine, ConnectionObserver, DisplayOptions, Error, LocalBridge, Result,
};
use crate::tls::{ClientConfigBuilder, TlsConfig, TlsStreamPair};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use tracing::{debug, info};

/// Reports the client's connection lifecycle
struct ClientObserver {
    target: String,
}

impl ConnectionObserver for ClientObserver {
    fn on_opened(&mut self) {
        info!("connected to {}", self.target);
    }

    fn on_closed(&mut self, cause: &CloseCause) {
        debug!("connection to {} finished ({})", self.target, cause);
    }
}

/// TLS client for one outbound connection
pub struct TlsClient {
    config: TlsConfig,
    host: String,
    port: u16,
    options: DisplayOptions,
}

impl TlsClient {
    /// Finish the TLS configuration for `host` and prepare a client
    pub fn new(
        builder: ClientConfigBuilder,
        host: impl Into<String>,
        port: u16,
        options: DisplayOptions,
    ) -> Result<Self> {
        let host = host.into();
        if host.is_empty() {
            return Err(Error::Argument("host name is empty".to_string()));
        }
        if port == 0 {
            return Err(Error::Argument("port must be between 1 and 65535".to_string()));
        }

        let config = builder.servername(host.trim_matches(|c| c == '[' || c == ']')).build()?;
        Ok(TlsClient {
            config,
            host,
            port,
            options,
        })
    }

    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Open the TCP connection and wrap it for the handshake
    pub fn connect(&self) -> Result<TlsStreamPair<TcpStream>> {
        let host = self.host.trim_matches(|c| c == '[' || c == ']');
        debug!("connecting to {}", self.target());

        let stream = TcpStream::connect((host, self.port))?;
        stream.set_nodelay(true)?;
        Ok(self.config.connect(stream)?)
    }

    /// Connect and run the connection against the given local streams
    pub fn run_with<R, W>(&self, local: LocalBridge<R, W>) -> Result<CloseCause>
    where
        R: Read + AsRawFd,
        W: Write + AsRawFd,
    {
        let pair = self.connect()?;

        let mut engine = ConnectionEngine::new(
            self.options,
            ClientObserver {
                target: self.target(),
            },
        );
        engine.start_connection(pair, local);
        engine.run()
    }

    /// Connect and run the connection against standard input and output
    pub fn run(&self) -> Result<CloseCause> {
        self.run_with(LocalBridge::stdio()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_arguments() {
        let result = TlsClient::new(TlsConfig::client(), "", 443, DisplayOptions::default());
        assert!(matches!(result, Err(Error::Argument(_))));

        let result = TlsClient::new(TlsConfig::client(), "example.com", 0, DisplayOptions::default());
        assert!(matches!(result, Err(Error::Argument(_))));
    }

    #[test]
    fn test_target() {
        let client =
            TlsClient::new(TlsConfig::client(), "example.com", 8443, DisplayOptions::default())
                .unwrap();
        assert_eq!(client.target(), "example.com:8443");
    }

    #[test]
    fn test_connection_refused() {
        // Grab a free port and release it so nothing is listening there
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let client =
            TlsClient::new(TlsConfig::client(), "127.0.0.1", port, DisplayOptions::default())
                .unwrap();
        assert!(matches!(client.connect(), Err(Error::Stream(_))));
    }
}
