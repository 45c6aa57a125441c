//! Certificate inspection
//!
//! Turns peer certificates into text for the operator: a one-line summary per
//! certificate and a hex dump of its DER encoding. Nothing here fails; input
//! that doesn't parse is described as such.

use openssl::nid::Nid;
use openssl::pkey::Id;
use openssl::ssl::SslRef;
use openssl::x509::{X509NameRef, X509Ref, X509};
use std::fmt::Write;

/// Certificate information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    /// Certificate subject (Common Name)
    pub subject: String,
    /// Certificate issuer (Common Name)
    pub issuer: String,
    pub not_before: String,
    pub not_after: String,
    /// Public key algorithm and size, e.g. "RSA 2048-bit"
    pub key: String,
    /// Subject Alternative Names (DNS names and IP addresses)
    pub subject_alt_names: Vec<String>,
}

impl CertInfo {
    /// Extract certificate information from an X.509 certificate
    pub fn from_x509(cert: &X509Ref) -> Self {
        CertInfo {
            subject: name_summary(cert.subject_name()),
            issuer: name_summary(cert.issuer_name()),
            not_before: cert.not_before().to_string(),
            not_after: cert.not_after().to_string(),
            key: key_summary(cert),
            subject_alt_names: subject_alt_names(cert),
        }
    }

    /// Parse DER and extract certificate information
    pub fn from_der(der: &[u8]) -> Option<Self> {
        X509::from_der(der).ok().map(|cert| Self::from_x509(&cert))
    }
}

impl std::fmt::Display for CertInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (issuer: {}, valid: {} to {}, key: {}",
            self.subject, self.issuer, self.not_before, self.not_after, self.key
        )?;
        if !self.subject_alt_names.is_empty() {
            write!(f, ", san: {}", self.subject_alt_names.join(", "))?;
        }
        f.write_str(")")
    }
}

/// Ordered peer certificates as DER, leaf first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerChain {
    certs: Vec<Vec<u8>>,
}

impl PeerChain {
    pub fn new(certs: Vec<Vec<u8>>) -> Self {
        PeerChain { certs }
    }

    /// Capture the chain the peer presented on a completed handshake.
    ///
    /// On the client side OpenSSL includes the leaf in `peer_cert_chain`; on
    /// the server side it doesn't, so the leaf is added once either way.
    pub fn from_ssl(ssl: &SslRef) -> Self {
        let mut certs: Vec<Vec<u8>> = Vec::new();

        if let Some(der) = ssl.peer_certificate().and_then(|cert| cert.to_der().ok()) {
            certs.push(der);
        }

        if let Some(chain) = ssl.peer_cert_chain() {
            for cert in chain {
                if let Ok(der) = cert.to_der() {
                    if certs.first() != Some(&der) {
                        certs.push(der);
                    }
                }
            }
        }

        PeerChain { certs }
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.certs.iter().map(Vec::as_slice)
    }
}

/// One-line summary of a DER certificate
pub fn summarize(der: &[u8]) -> String {
    match CertInfo::from_der(der) {
        Some(info) => info.to_string(),
        None => format!("<unparseable certificate ({} bytes)>", der.len()),
    }
}

/// Subject of a certificate as shown next to identities
pub fn subject_summary(cert: &X509Ref) -> String {
    name_summary(cert.subject_name())
}

/// Hex dump in the classic `offset  hex  |ascii|` layout, 16 bytes per line
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 4 + 16);

    for (line, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:08x} ", line * 16);
        for i in 0..16 {
            if i == 8 {
                out.push(' ');
            }
            match chunk.get(i) {
                Some(b) => {
                    let _ = write!(out, " {:02x}", b);
                }
                None => out.push_str("   "),
            }
        }
        out.push_str("  |");
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }

    let _ = write!(out, "{:08x}", data.len());
    out
}

/// Common Name, or the whole name when there is no CN
fn name_summary(name: &X509NameRef) -> String {
    if let Some(cn) = name
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
    {
        return cn.to_string();
    }

    let parts: Vec<String> = name
        .entries()
        .filter_map(|entry| {
            let field = entry.object().nid().short_name().ok()?;
            let value = entry.data().as_utf8().ok()?;
            Some(format!("{}={}", field, value))
        })
        .collect();

    if parts.is_empty() {
        "<undef>".to_string()
    } else {
        parts.join(", ")
    }
}

fn key_summary(cert: &X509Ref) -> String {
    let Ok(key) = cert.public_key() else {
        return "<unknown>".to_string();
    };

    let algorithm = match key.id() {
        Id::RSA => "RSA",
        Id::EC => "EC",
        Id::DSA => "DSA",
        Id::ED25519 => "Ed25519",
        Id::ED448 => "Ed448",
        _ => "unknown",
    };

    format!("{} {}-bit", algorithm, key.bits())
}

fn subject_alt_names(cert: &X509Ref) -> Vec<String> {
    let mut names = Vec::new();

    if let Some(san_ext) = cert.subject_alt_names() {
        for name in san_ext {
            if let Some(dns) = name.dnsname() {
                names.push(format!("DNS:{}", dns));
            } else if let Some(ip) = name.ipaddress() {
                if let Ok(octets) = <[u8; 4]>::try_from(ip) {
                    names.push(format!("IP:{}", std::net::Ipv4Addr::from(octets)));
                } else if let Ok(octets) = <[u8; 16]>::try_from(ip) {
                    names.push(format!("IP:{}", std::net::Ipv6Addr::from(octets)));
                }
            } else if let Some(email) = name.email() {
                names.push(format!("email:{}", email));
            } else if let Some(uri) = name.uri() {
                names.push(format!("URI:{}", uri));
            }
        }
    }

    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::builtin_cert::BUILTIN_CERT;

    fn builtin_der() -> Vec<u8> {
        X509::from_pem(BUILTIN_CERT.as_bytes()).unwrap().to_der().unwrap()
    }

    #[test]
    fn test_cert_info_from_builtin() {
        let info = CertInfo::from_der(&builtin_der()).unwrap();

        assert_eq!(info.subject, "example.com");
        assert_eq!(info.issuer, "example.com"); // Self-signed
        assert_eq!(info.key, "RSA 2048-bit");
        assert!(info.not_after.contains("2047"));

        assert_eq!(info.subject_alt_names.len(), 2);
        assert!(info.subject_alt_names.contains(&"DNS:example.com".to_string()));
        assert!(info.subject_alt_names.contains(&"DNS:*.example.com".to_string()));
    }

    #[test]
    fn test_summarize() {
        let summary = summarize(&builtin_der());
        assert!(summary.starts_with("example.com (issuer: example.com, valid: "));
        assert!(summary.contains("key: RSA 2048-bit"));
        assert!(summary.ends_with("san: DNS:example.com, DNS:*.example.com)"));
    }

    #[test]
    fn test_summarize_garbage() {
        assert_eq!(summarize(b"not a certificate"), "<unparseable certificate (17 bytes)>");
        assert_eq!(summarize(&[]), "<unparseable certificate (0 bytes)>");
    }

    #[test]
    fn test_hex_dump_layout() {
        let dump = hex_dump(b"0123456789abcdefXY\x00");
        let lines: Vec<&str> = dump.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "00000000  30 31 32 33 34 35 36 37  38 39 61 62 63 64 65 66  |0123456789abcdef|"
        );
        assert_eq!(lines[1], format!("00000010  58 59 00{}|XY.|", " ".repeat(42)));
        assert_eq!(lines[2], "00000013");
    }

    #[test]
    fn test_hex_dump_empty() {
        assert_eq!(hex_dump(&[]), "00000000");
    }

    #[test]
    fn test_peer_chain_accessors() {
        let chain = PeerChain::new(vec![builtin_der(), vec![1, 2, 3]]);
        assert_eq!(chain.len(), 2);
        assert!(!chain.is_empty());
        assert_eq!(chain.iter().next(), Some(builtin_der().as_slice()));
        assert_eq!(chain.iter().nth(1), Some(&[1u8, 2, 3][..]));
        assert!(PeerChain::default().is_empty());
    }
}
