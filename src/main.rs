use clap::Parser;
use gps_telemetry_relay::app::{Options, run_with_io};
use gps_telemetry_relay::broadcast::JsonLinesSink;
use gps_telemetry_relay::source::mqtt::MqttSource;
use std::panic::{self, PanicHookInfo};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

/// Log to stderr so stdout carries only the event stream.
///
/// `RUST_LOG` takes precedence over `--verbose`.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();
}

/// Cancel `cancel` on Ctrl-C / SIGINT.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("termination signal received");
                cancel.cancel();
            }
            Err(e) => error!(error = %e, "cannot listen for termination signal"),
        }
    });
}

#[tokio::main]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_tracing(options.verbose);

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let source = MqttSource::new(options.mqtt_config());
    let sink = (!options.quiet).then(|| JsonLinesSink::new(tokio::io::stdout()));

    match run_with_io(options, &source, sink, cancel).await {
        Ok(summary) => {
            info!(
                received = summary.ingest.received,
                stored = summary.ingest.stored,
                exported_rows = ?summary.exported_rows,
                "relay stopped"
            );
            std::process::exit(EXIT_SUCCESS)
        }
        Err(why) => {
            error!(error = %why, "relay failed");
            std::process::exit(EXIT_ERROR);
        }
    }
}
