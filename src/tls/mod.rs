//! TLS configuration, identities and trust policy
//!
//! This module wraps OpenSSL for the two roles of the tool. The connection
//! engine never talks to OpenSSL directly; it drives a [`TlsStreamPair`] and
//! consumes the trust verdicts recorded during the handshake.
//!
//! # Architecture
//!
//! 1. `TlsConfig` holds an immutable OpenSSL context (protocol range, identity,
//!    trust anchors, verification callback)
//! 2. `TlsStreamPair` is one non-blocking TLS stream whose input and output
//!    directions are owned together
//! 3. `trust` decides accept/reject for a peer chain under a policy
//! 4. `cert` renders certificates for the operator
//!
//! # Examples
//!
//! ## Client
//!
//! ```no_run
//! use tlstool::tls::{TlsConfig, TlsVersion};
//! use std::net::TcpStream;
//!
//! let tls_config = TlsConfig::client()
//!     .version_range(TlsVersion::Tls12, TlsVersion::Tls13)
//!     .servername("example.com")
//!     .disable_server_trust_evaluation(false)
//!     .build()
//!     .unwrap();
//!
//! let tcp_stream = TcpStream::connect("example.com:443").unwrap();
//! let pair = tls_config.connect(tcp_stream).unwrap();
//! ```
//!
//! ## Server
//!
//! ```no_run
//! use tlstool::tls::{ClientAuthPolicy, Identity, TlsConfig};
//! use std::net::TcpListener;
//!
//! let tls_config = TlsConfig::server()
//!     .identity(Identity::load("server.pem", None::<&str>).unwrap())
//!     .client_auth(ClientAuthPolicy::RequestTrustedCertificate)
//!     .build()
//!     .unwrap();
//!
//! let listener = TcpListener::bind("127.0.0.1:4433").unwrap();
//! let (tcp_stream, _) = listener.accept().unwrap();
//! let pair = tls_config.accept(tcp_stream).unwrap();
//! ```

pub mod builtin_cert;
pub mod cert;
pub mod config;
pub mod identity;
pub mod info;
pub mod session;
pub mod trust;

pub use cert::{CertInfo, PeerChain};
pub use config::{ClientConfigBuilder, ServerConfigBuilder, TlsConfig, TlsError, TlsVersion};
pub use identity::Identity;
pub use info::HandshakeInfo;
pub use session::{Progress, TlsStreamPair};
pub use trust::{ChainCheck, ChainStatus, ClientAuthPolicy, PeerPolicy, TrustPolicy, TrustVerdict};
