//! Shared fixtures: a throwaway PKI and engines wired to socket pairs

#![allow(dead_code)]

use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName, SubjectKeyIdentifier,
};
use openssl::x509::{X509Builder, X509Name, X509};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tempfile::TempDir;
use tlstool::conn::{self, CloseCause, ConnectionEngine, ConnectionObserver, DisplayOptions, LocalBridge};
use tlstool::tls::{Identity, TlsStreamPair};

pub const IO_TIMEOUT: Duration = Duration::from_secs(10);

fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn name(cn: &str) -> X509Name {
    let mut builder = X509Name::builder().unwrap();
    builder.append_entry_by_text("CN", cn).unwrap();
    builder.build()
}

fn serial() -> Asn1Integer {
    let mut bn = BigNum::new().unwrap();
    bn.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();
    bn.to_asn1_integer().unwrap()
}

/// A certificate authority that lives for the duration of one test
pub struct TestCa {
    pub cert: X509,
    key: PKey<Private>,
    dir: TempDir,
}

impl TestCa {
    pub fn new(cn: &str) -> Self {
        let key = ec_key();
        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_serial_number(&serial()).unwrap();
        builder.set_subject_name(&name(cn)).unwrap();
        builder.set_issuer_name(&name(cn)).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        builder.set_not_after(&Asn1Time::days_from_now(30).unwrap()).unwrap();
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        builder
            .append_extension(KeyUsage::new().critical().key_cert_sign().crl_sign().build().unwrap())
            .unwrap();
        let ski = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(None, None))
            .unwrap();
        builder.append_extension(ski).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();

        TestCa {
            cert: builder.build(),
            key,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// Issue a leaf for 127.0.0.1 / localhost usable by either role
    pub fn issue(&self, cn: &str) -> Identity {
        self.issue_with_validity(
            cn,
            Asn1Time::days_from_now(0).unwrap(),
            Asn1Time::days_from_now(30).unwrap(),
        )
    }

    /// Issue a leaf that expired long ago
    pub fn issue_expired(&self, cn: &str) -> Identity {
        self.issue_with_validity(
            cn,
            Asn1Time::from_str("20200101000000Z").unwrap(),
            Asn1Time::from_str("20210101000000Z").unwrap(),
        )
    }

    fn issue_with_validity(&self, cn: &str, not_before: Asn1Time, not_after: Asn1Time) -> Identity {
        let key = ec_key();
        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_serial_number(&serial()).unwrap();
        builder.set_subject_name(&name(cn)).unwrap();
        builder.set_issuer_name(self.cert.subject_name()).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder.set_not_before(&not_before).unwrap();
        builder.set_not_after(&not_after).unwrap();
        builder
            .append_extension(BasicConstraints::new().build().unwrap())
            .unwrap();
        builder
            .append_extension(KeyUsage::new().critical().digital_signature().build().unwrap())
            .unwrap();
        builder
            .append_extension(ExtendedKeyUsage::new().server_auth().client_auth().build().unwrap())
            .unwrap();
        let san = SubjectAlternativeName::new()
            .dns("localhost")
            .ip("127.0.0.1")
            .build(&builder.x509v3_context(Some(&self.cert), None))
            .unwrap();
        builder.append_extension(san).unwrap();
        builder.sign(&self.key, MessageDigest::sha256()).unwrap();

        let cert = builder.build();
        Identity::from_pem(
            &cert.to_pem().unwrap(),
            Some(&key.private_key_to_pem_pkcs8().unwrap()),
        )
        .unwrap()
    }

    /// The CA certificate as a PEM file usable with `ca_file`
    pub fn ca_file(&self) -> PathBuf {
        let path = self.dir.path().join("ca.pem");
        std::fs::write(&path, self.cert.to_pem().unwrap()).unwrap();
        path
    }
}

/// Records lifecycle callbacks for later inspection
#[derive(Clone, Default)]
pub struct Recorder {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ConnectionObserver for Recorder {
    fn on_opened(&mut self) {
        self.events.lock().unwrap().push("opened".to_string());
    }

    fn on_closed(&mut self, cause: &CloseCause) {
        self.events.lock().unwrap().push(format!("closed: {}", cause));
    }
}

/// Test-side ends of an engine's local streams
pub struct LocalEnds {
    /// Writes here arrive as the engine's local input
    pub feeder: UnixStream,
    /// The engine's local output can be read here
    pub drain: UnixStream,
}

impl LocalEnds {
    /// A bridge for an engine plus the ends the test keeps
    pub fn new() -> (LocalBridge<UnixStream, UnixStream>, LocalEnds) {
        let (source, feeder) = UnixStream::pair().unwrap();
        let (sink, drain) = UnixStream::pair().unwrap();
        drain.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
        feeder.set_write_timeout(Some(IO_TIMEOUT)).unwrap();

        let bridge = LocalBridge::new(source, sink);
        (bridge, LocalEnds { feeder, drain })
    }

    pub fn send(&mut self, data: &[u8]) {
        self.feeder.write_all(data).unwrap();
    }

    pub fn expect(&mut self, expected: &[u8]) {
        let mut got = vec![0u8; expected.len()];
        self.drain.read_exact(&mut got).unwrap();
        assert_eq!(got, expected);
    }

    /// Signal EOF on the engine's local input
    pub fn finish_input(&self) {
        self.feeder.shutdown(std::net::Shutdown::Write).unwrap();
    }
}

/// Log lines written by one engine thread
#[derive(Clone, Default)]
pub struct CapturedLog {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLog {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.bytes.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// An engine running on its own thread
pub struct RunningEngine {
    pub local: LocalEnds,
    pub observer: Recorder,
    handle: JoinHandle<conn::Result<CloseCause>>,
}

impl RunningEngine {
    pub fn spawn(pair: TlsStreamPair<UnixStream>, options: DisplayOptions) -> Self {
        Self::spawn_inner(pair, options, None)
    }

    /// Like [`RunningEngine::spawn`], with the engine's log collected
    pub fn spawn_logged(
        pair: TlsStreamPair<UnixStream>,
        options: DisplayOptions,
    ) -> (Self, CapturedLog) {
        let log = CapturedLog::default();
        let engine = Self::spawn_inner(pair, options, Some(log.clone()));
        (engine, log)
    }

    fn spawn_inner(
        pair: TlsStreamPair<UnixStream>,
        options: DisplayOptions,
        log: Option<CapturedLog>,
    ) -> Self {
        let observer = Recorder::default();
        let thread_observer = observer.clone();
        let (bridge, local) = LocalEnds::new();

        let handle = thread::spawn(move || {
            let run = move || {
                let mut engine = ConnectionEngine::new(options, thread_observer);
                engine.start_connection(pair, bridge);
                engine.run()
            };
            match log {
                Some(log) => {
                    let subscriber = tracing_subscriber::fmt()
                        .with_writer(move || log.clone())
                        .with_ansi(false)
                        .with_max_level(tracing::Level::DEBUG)
                        .finish();
                    tracing::subscriber::with_default(subscriber, run)
                }
                None => run(),
            }
        });

        RunningEngine {
            local,
            observer,
            handle,
        }
    }

    pub fn join(self) -> (CloseCause, Vec<String>) {
        let cause = self.handle.join().unwrap().unwrap();
        (cause, self.observer.events())
    }
}
