//! Identities: a private key plus the certificate (and chain) that goes with it

use super::builtin_cert::BUILTIN_CERT;
use super::cert;
use super::config::TlsError;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::ssl::SslContextBuilder;
use openssl::x509::X509;
use std::fmt;
use std::fs;
use std::path::Path;

/// Environment variable holding the PKCS#12 import password
pub const P12_PASSWORD_ENV: &str = "TLSTOOL_P12_PASSWORD";

/// A certificate with its private key and any intermediates to send along
pub struct Identity {
    certificate: X509,
    key: PKey<Private>,
    chain: Vec<X509>,
}

impl Identity {
    /// Parse an identity from PEM.
    ///
    /// The first certificate in `cert_pem` is the leaf, the rest are sent as
    /// the chain. The key is taken from `key_pem` when given, otherwise from
    /// `cert_pem`.
    pub fn from_pem(cert_pem: &[u8], key_pem: Option<&[u8]>) -> Result<Self, TlsError> {
        let mut certs = X509::stack_from_pem(cert_pem)
            .map_err(|e| TlsError::Certificate(format!("Failed to load certificate: {}", e)))?;
        if certs.is_empty() {
            return Err(TlsError::Certificate("no certificate found in PEM data".to_string()));
        }
        let certificate = certs.remove(0);

        let key = PKey::private_key_from_pem(key_pem.unwrap_or(cert_pem))
            .map_err(|e| TlsError::Certificate(format!("Failed to load private key: {}", e)))?;

        Self::new(certificate, key, certs)
    }

    /// Parse a PKCS#12 archive
    pub fn from_pkcs12(der: &[u8], password: &str) -> Result<Self, TlsError> {
        let parsed = Pkcs12::from_der(der)
            .and_then(|p12| p12.parse2(password))
            .map_err(|e| TlsError::Certificate(format!("Failed to load PKCS#12: {}", e)))?;

        let certificate = parsed
            .cert
            .ok_or_else(|| TlsError::Certificate("PKCS#12 archive has no certificate".to_string()))?;
        let key = parsed
            .pkey
            .ok_or_else(|| TlsError::Certificate("PKCS#12 archive has no private key".to_string()))?;
        let chain = parsed.ca.map(|stack| stack.into_iter().collect()).unwrap_or_default();

        Self::new(certificate, key, chain)
    }

    /// Load an identity from disk.
    ///
    /// `.p12` and `.pfx` files are read as PKCS#12 with the password from
    /// [`P12_PASSWORD_ENV`] (empty if unset); anything else is PEM.
    pub fn load<P: AsRef<Path>, K: AsRef<Path>>(path: P, key_path: Option<K>) -> Result<Self, TlsError> {
        let path = path.as_ref();
        let data = fs::read(path)?;

        let is_pkcs12 = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("p12") || ext.eq_ignore_ascii_case("pfx"))
            .unwrap_or(false);

        if is_pkcs12 {
            let password = std::env::var(P12_PASSWORD_ENV).unwrap_or_default();
            return Self::from_pkcs12(&data, &password);
        }

        match key_path {
            Some(key_path) => {
                let key = fs::read(key_path.as_ref())?;
                Self::from_pem(&data, Some(&key))
            }
            None => Self::from_pem(&data, None),
        }
    }

    /// The embedded self-signed `example.com` identity
    pub fn builtin() -> Result<Self, TlsError> {
        Self::from_pem(BUILTIN_CERT.as_bytes(), None)
            .map_err(|e| TlsError::Certificate(format!("Failed to load built-in identity: {}", e)))
    }

    fn new(certificate: X509, key: PKey<Private>, chain: Vec<X509>) -> Result<Self, TlsError> {
        let cert_key = certificate.public_key()?;
        if !key.public_eq(&cert_key) {
            return Err(TlsError::Certificate(
                "private key does not match certificate".to_string(),
            ));
        }

        Ok(Identity { certificate, key, chain })
    }

    /// Short description of who this identity claims to be
    pub fn subject_summary(&self) -> String {
        cert::subject_summary(&self.certificate)
    }

    pub(crate) fn apply(&self, ctx_builder: &mut SslContextBuilder) -> Result<(), TlsError> {
        ctx_builder.set_certificate(&self.certificate)?;
        ctx_builder.set_private_key(&self.key)?;
        for intermediate in &self.chain {
            ctx_builder.add_extra_chain_cert(intermediate.clone())?;
        }
        ctx_builder.check_private_key()?;
        Ok(())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("subject", &self.subject_summary())
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}
