//! Trust evaluation
//!
//! Peer chains are validated by OpenSSL during the handshake (expiry,
//! signatures up to a trusted anchor, host name or IP match). The outcome is
//! reduced to a [`ChainStatus`] and then judged by the configured policy:
//! [`TrustPolicy`] when we are the client looking at a server, and
//! [`ClientAuthPolicy`] when we are the server looking at a client.

use super::config::TlsError;
use openssl::ssl::{Ssl, SslVerifyMode};
use openssl::ex_data::Index;
use openssl::x509::{X509StoreContext, X509StoreContextRef};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// What standard validation said about the peer's chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    /// The peer presented no certificate
    Absent,
    /// The chain validated against the trust anchors
    Valid,
    /// The chain was presented but failed validation
    Invalid(String),
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainStatus::Absent => f.write_str("no certificate presented"),
            ChainStatus::Valid => f.write_str("chain is trusted"),
            ChainStatus::Invalid(reason) => write!(f, "chain is not trusted: {}", reason),
        }
    }
}

/// Policy decision for a peer chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustVerdict {
    Accept,
    Reject(String),
}

impl TrustVerdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, TrustVerdict::Accept)
    }
}

/// Client-side policy for the server's chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrustPolicy {
    /// Ignore trust failures and carry on with the connection
    pub disable_server_trust_evaluation: bool,
}

impl TrustPolicy {
    pub fn evaluate(&self, status: &ChainStatus) -> TrustVerdict {
        if self.disable_server_trust_evaluation {
            return TrustVerdict::Accept;
        }

        match status {
            ChainStatus::Valid => TrustVerdict::Accept,
            ChainStatus::Absent => TrustVerdict::Reject("server presented no certificate".to_string()),
            ChainStatus::Invalid(reason) => TrustVerdict::Reject(reason.clone()),
        }
    }
}

/// How the server authenticates clients
///
/// The variants are the cross product of "is a client certificate mandatory"
/// and "is a presented certificate trust-evaluated".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientAuthPolicy {
    /// Don't ask the client for a certificate
    #[default]
    None,
    /// Ask for a certificate, accept whatever comes back
    RequestCertificate,
    /// Ask for a certificate, evaluate trust if one is presented
    RequestTrustedCertificate,
    /// Insist on a certificate, don't evaluate trust
    RequireCertificate,
    /// Insist on a certificate and evaluate trust
    RequireTrustedCertificate,
}

impl ClientAuthPolicy {
    pub const ALL: [ClientAuthPolicy; 5] = [
        ClientAuthPolicy::None,
        ClientAuthPolicy::RequestCertificate,
        ClientAuthPolicy::RequestTrustedCertificate,
        ClientAuthPolicy::RequireCertificate,
        ClientAuthPolicy::RequireTrustedCertificate,
    ];

    /// Whether the server sends a CertificateRequest at all
    pub fn requests_certificate(&self) -> bool {
        !matches!(self, ClientAuthPolicy::None)
    }

    /// Whether a missing client certificate closes the connection
    pub fn requires_certificate(&self) -> bool {
        matches!(
            self,
            ClientAuthPolicy::RequireCertificate | ClientAuthPolicy::RequireTrustedCertificate
        )
    }

    /// Whether a presented certificate must pass trust evaluation
    pub fn evaluates_trust(&self) -> bool {
        matches!(
            self,
            ClientAuthPolicy::RequestTrustedCertificate | ClientAuthPolicy::RequireTrustedCertificate
        )
    }

    pub fn evaluate(&self, status: &ChainStatus) -> TrustVerdict {
        match status {
            ChainStatus::Absent if self.requires_certificate() => {
                TrustVerdict::Reject("client presented no certificate".to_string())
            }
            ChainStatus::Invalid(reason) if self.evaluates_trust() => {
                TrustVerdict::Reject(reason.clone())
            }
            _ => TrustVerdict::Accept,
        }
    }

    /// OpenSSL verification mode matching this policy
    pub fn verify_mode(&self) -> SslVerifyMode {
        if !self.requests_certificate() {
            SslVerifyMode::NONE
        } else if self.requires_certificate() {
            SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT
        } else {
            SslVerifyMode::PEER
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientAuthPolicy::None => "none",
            ClientAuthPolicy::RequestCertificate => "request",
            ClientAuthPolicy::RequestTrustedCertificate => "request-trusted",
            ClientAuthPolicy::RequireCertificate => "require",
            ClientAuthPolicy::RequireTrustedCertificate => "require-trusted",
        }
    }
}

impl FromStr for ClientAuthPolicy {
    type Err = TlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ClientAuthPolicy::ALL
            .into_iter()
            .find(|policy| policy.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TlsError::InvalidConfig(format!("unknown client auth policy: {}", s)))
    }
}

impl fmt::Display for ClientAuthPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The policy a connection applies to its peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerPolicy {
    /// We are the client; the peer is a server
    Server(TrustPolicy),
    /// We are the server; the peer is a client
    Client(ClientAuthPolicy),
}

impl PeerPolicy {
    pub fn evaluate(&self, status: &ChainStatus) -> TrustVerdict {
        match self {
            PeerPolicy::Server(policy) => policy.evaluate(status),
            PeerPolicy::Client(policy) => policy.evaluate(status),
        }
    }
}

/// Status and verdict for one peer chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainCheck {
    pub status: ChainStatus,
    pub verdict: TrustVerdict,
}

impl ChainCheck {
    pub fn evaluate(policy: PeerPolicy, status: ChainStatus) -> Self {
        let verdict = policy.evaluate(&status);
        ChainCheck { status, verdict }
    }
}

/// What the verification callback has learned about one peer chain.
///
/// OpenSSL calls the callback once per chain position, from the root down to
/// the leaf, and again for any error it finds along the way. The first error
/// decides the status; the check is recorded on the first fatal failure or
/// when the leaf is reached.
#[derive(Debug, Default)]
pub struct ChainVerification {
    first_failure: Option<String>,
    check: Option<ChainCheck>,
}

impl ChainVerification {
    fn status(&self) -> ChainStatus {
        match &self.first_failure {
            Some(reason) => ChainStatus::Invalid(reason.clone()),
            None => ChainStatus::Valid,
        }
    }

    /// Account for one callback invocation and return whether OpenSSL should
    /// keep going. `failure` is set when OpenSSL's own check failed here.
    pub(crate) fn record(&mut self, policy: PeerPolicy, failure: Option<String>, depth: u32) -> bool {
        if self.first_failure.is_none() {
            self.first_failure = failure;
        }

        let check = ChainCheck::evaluate(policy, self.status());
        let accepted = check.verdict.is_accept();
        if !accepted || depth == 0 {
            self.check = Some(check);
        }
        accepted
    }

    /// The recorded check, once
    pub(crate) fn take(&mut self) -> Option<ChainCheck> {
        self.check.take()
    }
}

/// Per-connection slot written by the verification callback and read by the
/// connection engine once the handshake step returns.
pub type VerdictSlot = Arc<Mutex<ChainVerification>>;

/// Verification callback body, run for every chain position.
pub(crate) fn check_peer_chain(
    preverify_ok: bool,
    ctx: &mut X509StoreContextRef,
    policy: PeerPolicy,
    slot_index: Index<Ssl, VerdictSlot>,
) -> bool {
    let depth = ctx.error_depth();
    let failure = (!preverify_ok)
        .then(|| format!("{} (depth {})", ctx.error().error_string(), depth));

    let slot = X509StoreContext::ssl_idx()
        .ok()
        .and_then(|ssl_idx| ctx.ex_data(ssl_idx))
        .and_then(|ssl| ssl.ex_data(slot_index));

    match slot {
        Some(slot) => match slot.lock() {
            Ok(mut verification) => verification.record(policy, failure, depth),
            Err(_) => false,
        },
        None => ChainVerification::default().record(policy, failure, depth),
    }
}
