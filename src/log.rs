//! Diagnostic output
//!
//! Every event is one plain line on standard error so it never mixes with the
//! payload on standard output. `RUST_LOG` overrides the level chosen by `-v`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter for a `-v` count
pub fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "tlstool=info",
        1 => "tlstool=debug",
        _ => "tlstool=trace",
    }
}

/// Install the global subscriber; later calls are ignored
pub fn init(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .try_init();
}
