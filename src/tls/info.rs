//! Negotiated handshake parameters
//!
//! Populated once a handshake completes and logged next to the peer chain.

use openssl::ssl::{NameType, SslRef};
use std::fmt;

/// What the handshake settled on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInfo {
    /// Negotiated TLS version (e.g., "TLSv1.3")
    pub version: String,

    /// Negotiated cipher suite
    pub cipher: String,

    /// SNI servername
    pub servername: Option<String>,

    /// Whether session was resumed
    pub session_reused: bool,
}

impl HandshakeInfo {
    /// Read the negotiated parameters from an SSL connection
    pub fn from_ssl(ssl: &SslRef) -> Self {
        HandshakeInfo {
            version: ssl.version_str().to_string(),
            cipher: ssl
                .current_cipher()
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| "<undef>".to_string()),
            servername: ssl.servername(NameType::HOST_NAME).map(|s| s.to_string()),
            session_reused: ssl.session_reused(),
        }
    }
}

impl fmt::Display for HandshakeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, cipher {}", self.version, self.cipher)?;
        if let Some(ref name) = self.servername {
            write!(f, ", server name {}", name)?;
        }
        if self.session_reused {
            f.write_str(", resumed session")?;
        }
        Ok(())
    }
}
