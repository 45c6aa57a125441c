use clap::{ArgAction, Args, Parser, Subcommand};
use std::fmt::Display;
use std::path::PathBuf;
use std::process;
use tlstool::client::TlsClient;
use tlstool::conn::{CloseCause, DisplayOptions, Error};
use tlstool::server::TlsServer;
use tlstool::tls::{ClientAuthPolicy, Identity, TlsConfig, TlsVersion};
use tracing::{error, info, warn};

/// Exit code for arguments rejected before any connection exists
const EXIT_ARGUMENT: i32 = 2;

/// Identity argument selecting the embedded self-signed certificate
const BUILTIN_IDENTITY: &str = "builtin";

#[derive(Parser)]
#[command(name = "tlstool", version)]
#[command(about = "TLS diagnostic client and server bridged to stdin/stdout", long_about = None)]
struct Cli {
    /// More log output (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to a TLS server
    ///
    /// The connection closes as soon as standard input reaches EOF, without
    /// waiting for the server to answer. When piping a request, keep the pipe
    /// open long enough for the reply, e.g. `(printf 'GET / HTTP/1.0\n\n'; sleep 5)`.
    Client {
        hostname: String,

        #[arg(value_parser = clap::value_parser!(u16).range(1..))]
        port: u16,

        /// Carry on even if the server's certificate is not trusted
        #[arg(long)]
        no_trust_check: bool,

        /// Identity offered if the server asks for a client certificate
        #[arg(long, value_name = "FILE")]
        client_identity: Option<PathBuf>,

        #[command(flatten)]
        common: CommonArgs,
    },
    /// Accept TLS connections, one at a time
    Server {
        /// Certificate and key file, or `builtin`
        identity: String,

        #[arg(value_parser = clap::value_parser!(u16).range(1..))]
        port: u16,

        #[arg(long, value_name = "POLICY", default_value = "none")]
        client_auth: ClientAuthPolicy,

        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Log a summary and hex dump of each peer certificate
    #[arg(long)]
    show_certs: bool,

    /// Send typed line feeds as CR LF and expand the `\n` escape
    #[arg(long)]
    crlf: bool,

    /// Private key, when not in the identity file
    #[arg(long, value_name = "FILE")]
    key: Option<PathBuf>,

    /// Extra trust anchors (PEM)
    #[arg(long, value_name = "FILE")]
    ca_file: Option<PathBuf>,

    #[arg(long, value_name = "VERSION")]
    min_tls: Option<TlsVersion>,

    #[arg(long, value_name = "VERSION")]
    max_tls: Option<TlsVersion>,
}

impl CommonArgs {
    fn display_options(&self) -> DisplayOptions {
        DisplayOptions {
            show_certificates: self.show_certs,
            translate_line_feed_to_crlf: self.crlf,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    tlstool::log::init(cli.verbose);

    let code = match cli.command {
        Command::Client {
            hostname,
            port,
            no_trust_check,
            client_identity,
            common,
        } => run_client(hostname, port, no_trust_check, client_identity, common),
        Command::Server {
            identity,
            port,
            client_auth,
            common,
        } => run_server(identity, port, client_auth, common),
    };

    process::exit(code);
}

fn argument_error(detail: impl Display) -> i32 {
    error!("{}", Error::Argument(detail.to_string()));
    EXIT_ARGUMENT
}

fn run_client(
    hostname: String,
    port: u16,
    no_trust_check: bool,
    client_identity: Option<PathBuf>,
    common: CommonArgs,
) -> i32 {
    let mut builder = TlsConfig::client()
        .min_version(common.min_tls)
        .max_version(common.max_tls)
        .disable_server_trust_evaluation(no_trust_check);

    if let Some(ref path) = common.ca_file {
        builder = builder.ca_file(path);
    }

    match client_identity {
        Some(path) => match Identity::load(&path, common.key.as_ref()) {
            Ok(identity) => {
                info!("client identity: {}", identity.subject_summary());
                builder = builder.identity(identity);
            }
            Err(e) => return argument_error(format!("{}: {}", path.display(), e)),
        },
        None if common.key.is_some() => warn!("--key ignored without --client-identity"),
        None => {}
    }

    let client = match TlsClient::new(builder, hostname, port, common.display_options()) {
        Ok(client) => client,
        Err(e) => return argument_error(e),
    };

    match client.run().and_then(CloseCause::into_result) {
        Ok(()) => 0,
        Err(e) => {
            error!("{}: {}", client.target(), e);
            1
        }
    }
}

fn run_server(identity: String, port: u16, client_auth: ClientAuthPolicy, common: CommonArgs) -> i32 {
    let identity = if identity == BUILTIN_IDENTITY {
        Identity::builtin()
    } else {
        Identity::load(&identity, common.key.as_ref())
    };
    let identity = match identity {
        Ok(identity) => identity,
        Err(e) => return argument_error(e),
    };
    info!("server identity: {}", identity.subject_summary());

    let mut builder = TlsConfig::server()
        .identity(identity)
        .client_auth(client_auth)
        .min_version(common.min_tls)
        .max_version(common.max_tls);

    if let Some(ref path) = common.ca_file {
        builder = builder.ca_file(path);
    }

    let config = match builder.build() {
        Ok(config) => config,
        Err(e) => return argument_error(e),
    };

    let server = match TlsServer::bind_port(config, port, common.display_options()) {
        Ok(server) => server,
        Err(e) => {
            error!("cannot listen on port {}: {}", port, e);
            return 1;
        }
    };

    match server.run() {
        Ok(()) => 0,
        Err(e) => {
            error!("{}", e);
            1
        }
    }
}
