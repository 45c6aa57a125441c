//! TLS configuration
//!
//! This module provides TLS configuration builders for both client and server.

use super::identity::Identity;
use super::session::TlsStreamPair;
use super::trust::{self, ClientAuthPolicy, PeerPolicy, TrustPolicy, VerdictSlot};
use openssl::ex_data::Index;
use openssl::ssl::{Ssl, SslContextBuilder, SslMethod, SslMode, SslVerifyMode};
use openssl::x509::X509Name;
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl FromStr for TlsVersion {
    type Err = TlsError;

    /// Parse TLS version from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" | "1.0" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" | "1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" | "1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" | "1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }
}

impl TlsVersion {
    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(&self) -> openssl::ssl::SslVersion {
        use openssl::ssl::SslVersion;
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Get version as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Peer did not return a certificate: {0}")]
    PeerCertificateMissing(String),

    #[error("TLS operation failed: {0}")]
    OperationFailed(String),
}

/// Which side of the handshake a configuration drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

/// TLS configuration (immutable after building)
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) ctx: openssl::ssl::SslContext,
    pub(crate) side: Side,
    pub(crate) policy: PeerPolicy,
    pub(crate) slot_index: Index<Ssl, VerdictSlot>,
    // Client-specific fields
    pub(crate) servername: Option<String>,
}

impl TlsConfig {
    /// Create a new client configuration builder
    pub fn client() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Create a new server configuration builder
    pub fn server() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    pub fn policy(&self) -> PeerPolicy {
        self.policy
    }

    /// Wrap an established transport for the client side of the handshake.
    ///
    /// The transport is switched to non-blocking mode; the handshake itself is
    /// driven later by whoever owns the returned pair.
    pub fn connect<S>(&self, stream: S) -> Result<TlsStreamPair<S>, TlsError>
    where
        S: Read + Write + AsRawFd,
    {
        if self.side != Side::Client {
            return Err(TlsError::InvalidConfig(
                "Cannot use server config for client connection".to_string(),
            ));
        }

        let mut ssl = Ssl::new(&self.ctx)?;

        // SNI and the verification target both come from the host we dialled
        if let Some(ref servername) = self.servername {
            match servername.parse::<std::net::IpAddr>() {
                Ok(ip) => ssl.param_mut().set_ip(ip)?,
                Err(_) => {
                    ssl.set_hostname(servername)?;
                    ssl.param_mut().set_host(servername)?;
                }
            }
        }

        ssl.set_connect_state();
        TlsStreamPair::new(ssl, stream, self)
    }

    /// Wrap an accepted transport for the server side of the handshake.
    pub fn accept<S>(&self, stream: S) -> Result<TlsStreamPair<S>, TlsError>
    where
        S: Read + Write + AsRawFd,
    {
        if self.side != Side::Server {
            return Err(TlsError::InvalidConfig(
                "Cannot use client config for server accept".to_string(),
            ));
        }

        let mut ssl = Ssl::new(&self.ctx)?;
        ssl.set_accept_state();
        TlsStreamPair::new(ssl, stream, self)
    }
}

/// Settings shared by both builders
struct CommonSettings {
    min_version: Option<TlsVersion>,
    max_version: Option<TlsVersion>,
    identity: Option<Identity>,
    ca_file: Option<PathBuf>,
}

impl CommonSettings {
    fn new() -> Self {
        CommonSettings {
            min_version: None,
            max_version: None,
            identity: None,
            ca_file: None,
        }
    }

    fn apply(&self, ctx_builder: &mut SslContextBuilder) -> Result<(), TlsError> {
        if let (Some(min), Some(max)) = (self.min_version, self.max_version) {
            if min > max {
                return Err(TlsError::InvalidConfig(format!(
                    "minimum version {} is above maximum version {}",
                    min.as_str(),
                    max.as_str()
                )));
            }
        }

        ctx_builder.set_min_proto_version(self.min_version.map(|v| v.to_openssl_version()))?;
        ctx_builder.set_max_proto_version(self.max_version.map(|v| v.to_openssl_version()))?;

        // Non-blocking writes may be partial and are retried from a buffer
        // that can move between attempts
        ctx_builder.set_mode(SslMode::ENABLE_PARTIAL_WRITE | SslMode::ACCEPT_MOVING_WRITE_BUFFER);

        ctx_builder.set_default_verify_paths()?;
        if let Some(ref path) = self.ca_file {
            ctx_builder.set_ca_file(path)?;
        }

        if let Some(ref identity) = self.identity {
            identity.apply(ctx_builder)?;
        }

        Ok(())
    }
}

/// Set the verify mode with the chain verification callback attached, and
/// return the ex-data index the callback records its verdict under.
fn install_trust_callback(
    ctx_builder: &mut SslContextBuilder,
    mode: SslVerifyMode,
    policy: PeerPolicy,
) -> Result<Index<Ssl, VerdictSlot>, TlsError> {
    let slot_index = Ssl::new_ex_index::<VerdictSlot>()?;
    ctx_builder.set_verify_callback(mode, move |preverify_ok, ctx| {
        trust::check_peer_chain(preverify_ok, ctx, policy, slot_index)
    });
    Ok(slot_index)
}

/// Client configuration builder
pub struct ClientConfigBuilder {
    common: CommonSettings,
    servername: Option<String>,
    trust: TrustPolicy,
}

impl ClientConfigBuilder {
    fn new() -> Self {
        ClientConfigBuilder {
            common: CommonSettings::new(),
            servername: None,
            trust: TrustPolicy::default(),
        }
    }

    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Self {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.common.min_version = Some(min);
        self.common.max_version = Some(max);
        self
    }

    pub fn min_version(mut self, version: Option<TlsVersion>) -> Self {
        self.common.min_version = version;
        self
    }

    pub fn max_version(mut self, version: Option<TlsVersion>) -> Self {
        self.common.max_version = version;
        self
    }

    /// Set SNI servername, also used as the verification target
    pub fn servername(mut self, name: impl Into<String>) -> Self {
        self.servername = Some(name.into());
        self
    }

    /// Ignore server trust failures
    pub fn disable_server_trust_evaluation(mut self, disable: bool) -> Self {
        self.trust.disable_server_trust_evaluation = disable;
        self
    }

    /// Identity offered when the server asks for a client certificate
    pub fn identity(mut self, identity: Identity) -> Self {
        self.common.identity = Some(identity);
        self
    }

    /// Trust anchors in addition to the system defaults
    pub fn ca_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.common.ca_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        let mut ctx_builder = SslContextBuilder::new(SslMethod::tls_client())?;
        self.common.apply(&mut ctx_builder)?;

        // Always verify; the callback decides whether a failure is fatal
        let policy = PeerPolicy::Server(self.trust);
        let slot_index = install_trust_callback(&mut ctx_builder, SslVerifyMode::PEER, policy)?;

        Ok(TlsConfig {
            ctx: ctx_builder.build(),
            side: Side::Client,
            policy,
            slot_index,
            servername: self.servername,
        })
    }
}

/// Server configuration builder
pub struct ServerConfigBuilder {
    common: CommonSettings,
    client_auth: ClientAuthPolicy,
}

impl ServerConfigBuilder {
    fn new() -> Self {
        ServerConfigBuilder {
            common: CommonSettings::new(),
            client_auth: ClientAuthPolicy::None,
        }
    }

    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Self {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.common.min_version = Some(min);
        self.common.max_version = Some(max);
        self
    }

    pub fn min_version(mut self, version: Option<TlsVersion>) -> Self {
        self.common.min_version = version;
        self
    }

    pub fn max_version(mut self, version: Option<TlsVersion>) -> Self {
        self.common.max_version = version;
        self
    }

    /// Server identity presented during the handshake (mandatory)
    pub fn identity(mut self, identity: Identity) -> Self {
        self.common.identity = Some(identity);
        self
    }

    /// Set client certificate policy
    pub fn client_auth(mut self, policy: ClientAuthPolicy) -> Self {
        self.client_auth = policy;
        self
    }

    /// Trust anchors for client certificates, also advertised as acceptable CAs
    pub fn ca_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.common.ca_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        if self.common.identity.is_none() {
            return Err(TlsError::InvalidConfig(
                "a server identity is required".to_string(),
            ));
        }

        let mut ctx_builder = SslContextBuilder::new(SslMethod::tls_server())?;
        self.common.apply(&mut ctx_builder)?;

        if self.client_auth.requests_certificate() {
            if let Some(ref path) = self.common.ca_file {
                ctx_builder.set_client_ca_list(X509Name::load_client_ca_file(path)?);
            }
        }

        let policy = PeerPolicy::Client(self.client_auth);
        let slot_index =
            install_trust_callback(&mut ctx_builder, self.client_auth.verify_mode(), policy)?;

        Ok(TlsConfig {
            ctx: ctx_builder.build(),
            side: Side::Server,
            policy,
            slot_index,
            servername: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_version_parsing() {
        assert_eq!("TLSv1.2".parse::<TlsVersion>().unwrap(), TlsVersion::Tls12);
        assert_eq!("tlsv1.3".parse::<TlsVersion>().unwrap(), TlsVersion::Tls13);
        assert_eq!("TLS1.0".parse::<TlsVersion>().unwrap(), TlsVersion::Tls10);
        assert_eq!("1.1".parse::<TlsVersion>().unwrap(), TlsVersion::Tls11);
        assert!("SSLv3".parse::<TlsVersion>().is_err());
        assert!("invalid".parse::<TlsVersion>().is_err());
    }

    #[test]
    fn test_client_config_builder() {
        let config = TlsConfig::client()
            .version(TlsVersion::Tls13)
            .servername("example.com")
            .disable_server_trust_evaluation(true)
            .build()
            .unwrap();

        assert_eq!(config.side, Side::Client);
        assert_eq!(config.servername, Some("example.com".to_string()));
        assert_eq!(
            config.policy(),
            PeerPolicy::Server(TrustPolicy { disable_server_trust_evaluation: true })
        );
    }

    #[test]
    fn test_server_config_builder() {
        let config = TlsConfig::server()
            .identity(Identity::builtin().unwrap())
            .version(TlsVersion::Tls13)
            .client_auth(ClientAuthPolicy::RequestTrustedCertificate)
            .build()
            .unwrap();

        assert_eq!(config.side, Side::Server);
        assert_eq!(
            config.policy(),
            PeerPolicy::Client(ClientAuthPolicy::RequestTrustedCertificate)
        );
    }

    #[test]
    fn test_server_requires_identity() {
        let result = TlsConfig::server().build();
        assert!(matches!(result, Err(TlsError::InvalidConfig(_))));
    }

    #[test]
    fn test_inverted_version_range() {
        let result = TlsConfig::client()
            .version_range(TlsVersion::Tls13, TlsVersion::Tls12)
            .build();
        assert!(matches!(result, Err(TlsError::InvalidConfig(_))));
    }

    #[test]
    fn test_side_mismatch() {
        let client = TlsConfig::client().build().unwrap();
        let (a, _b) = std::os::unix::net::UnixStream::pair().unwrap();
        assert!(matches!(client.accept(a), Err(TlsError::InvalidConfig(_))));
    }
}
