//! Client and server roles over loopback TCP

mod common;

use common::{LocalEnds, TestCa};
use std::thread::{self, JoinHandle};
use tlstool::client::TlsClient;
use tlstool::conn::{self, CloseCause, DisplayOptions};
use tlstool::server::TlsServer;
use tlstool::tls::{ClientAuthPolicy, ClientConfigBuilder, Identity, TlsConfig};

struct Running {
    local: LocalEnds,
    handle: JoinHandle<conn::Result<CloseCause>>,
}

impl Running {
    fn join(self) -> CloseCause {
        self.handle.join().unwrap().unwrap()
    }
}

fn start_server(config: TlsConfig) -> (Running, u16) {
    let server = TlsServer::bind(
        config,
        "127.0.0.1:0".parse().unwrap(),
        DisplayOptions::default(),
    )
    .unwrap();
    let port = server.local_addr().unwrap().port();

    let (bridge, local) = LocalEnds::new();
    let handle = thread::spawn(move || server.accept_with(bridge));
    (Running { local, handle }, port)
}

fn start_client(builder: ClientConfigBuilder, port: u16) -> Running {
    let client = TlsClient::new(builder, "127.0.0.1", port, DisplayOptions::default()).unwrap();

    let (bridge, local) = LocalEnds::new();
    let handle = thread::spawn(move || client.run_with(bridge));
    Running { local, handle }
}

fn builtin_server(policy: ClientAuthPolicy) -> TlsConfig {
    TlsConfig::server()
        .identity(Identity::builtin().unwrap())
        .client_auth(policy)
        .build()
        .unwrap()
}

#[test]
fn test_trust_disabled_against_self_signed_server() {
    let (mut server, port) = start_server(builtin_server(ClientAuthPolicy::None));
    let mut client = start_client(TlsConfig::client().disable_server_trust_evaluation(true), port);

    // The server operator echoes what arrives
    client.local.send(b"hello\n");
    server.local.expect(b"hello\n");
    server.local.send(b"hello\n");
    client.local.expect(b"hello\n");

    client.local.finish_input();
    assert!(matches!(client.join(), CloseCause::Eof));
    assert!(matches!(server.join(), CloseCause::Eof));
}

#[test]
fn test_trust_enabled_against_self_signed_server() {
    let (server, port) = start_server(builtin_server(ClientAuthPolicy::None));
    let client = start_client(TlsConfig::client(), port);

    assert!(matches!(client.join(), CloseCause::TrustRejected(_)));
    assert!(matches!(server.join(), CloseCause::Error(_)));
}

#[test]
fn test_require_trusted_without_client_identity() {
    let (server, port) = start_server(builtin_server(ClientAuthPolicy::RequireTrustedCertificate));
    let client = start_client(TlsConfig::client().disable_server_trust_evaluation(true), port);

    match server.join() {
        CloseCause::TrustRejected(reason) => assert_eq!(reason, "client presented no certificate"),
        other => panic!("expected trust rejection, got {}", other),
    }
    assert!(matches!(client.join(), CloseCause::Error(_)));
}

#[test]
fn test_server_trusted_through_ca_file() {
    let ca = TestCa::new("Roles Test CA");
    let server_config = TlsConfig::server()
        .identity(ca.issue("roles server"))
        .build()
        .unwrap();

    let (mut server, port) = start_server(server_config);
    let mut client = start_client(TlsConfig::client().ca_file(ca.ca_file()), port);

    client.local.send(b"trusted");
    server.local.expect(b"trusted");

    server.local.finish_input();
    assert!(matches!(server.join(), CloseCause::Eof));
    assert!(matches!(client.join(), CloseCause::Eof));
}

#[test]
fn test_expired_server_certificate() {
    let ca = TestCa::new("Roles Test CA");
    let server_config = TlsConfig::server()
        .identity(ca.issue_expired("stale server"))
        .build()
        .unwrap();

    let (server, port) = start_server(server_config);
    let client = start_client(TlsConfig::client().ca_file(ca.ca_file()), port);

    match client.join() {
        CloseCause::TrustRejected(reason) => assert!(reason.contains("expired"), "{}", reason),
        other => panic!("expected trust rejection, got {}", other),
    }
    assert!(!server.join().is_clean());
}

#[test]
fn test_client_certificate_from_unknown_ca() {
    let ours = TestCa::new("Server Side CA");
    let theirs = TestCa::new("Somebody Else's CA");

    let server_config = TlsConfig::server()
        .identity(Identity::builtin().unwrap())
        .ca_file(ours.ca_file())
        .client_auth(ClientAuthPolicy::RequireTrustedCertificate)
        .build()
        .unwrap();

    let (server, port) = start_server(server_config);
    let client = start_client(
        TlsConfig::client()
            .disable_server_trust_evaluation(true)
            .identity(theirs.issue("stranger")),
        port,
    );

    assert!(matches!(server.join(), CloseCause::TrustRejected(_)));
    assert!(!client.join().is_clean());
}

#[test]
fn test_untrusted_client_certificate_accepted_when_only_requested() {
    let ours = TestCa::new("Server Side CA");
    let theirs = TestCa::new("Somebody Else's CA");

    let server_config = TlsConfig::server()
        .identity(Identity::builtin().unwrap())
        .ca_file(ours.ca_file())
        .client_auth(ClientAuthPolicy::RequestCertificate)
        .build()
        .unwrap();

    let (mut server, port) = start_server(server_config);
    let mut client = start_client(
        TlsConfig::client()
            .disable_server_trust_evaluation(true)
            .identity(theirs.issue("stranger")),
        port,
    );

    client.local.send(b"let me in");
    server.local.expect(b"let me in");

    client.local.finish_input();
    assert!(matches!(client.join(), CloseCause::Eof));
    assert!(matches!(server.join(), CloseCause::Eof));
}
