//! micrelay capture daemon
//!
//! Serves microphone capture to micrelay clients over WebSocket.

use std::path::PathBuf;

use clap::Parser;
use micrelay_common::logging;
use micrelay_daemon::{run_server, DaemonConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "micrelay-daemon", version, about = "micrelay capture daemon")]
struct Args {
    /// TCP port to listen on (overrides the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind (overrides the config file)
    #[arg(long)]
    bind: Option<String>,

    /// Config file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log to the console only
    #[arg(long)]
    no_file_log: bool,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    save_config: bool,
}

fn main() {
    let args = Args::parse();

    // Flushes the file log when dropped at the end of main
    let _log_guard = init_logging(!args.no_file_log);

    info!("micrelay daemon starting (pid: {})...", std::process::id());

    let mut config = match &args.config {
        Some(path) => DaemonConfig::load_from(path),
        None => DaemonConfig::load(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if args.save_config {
        let saved = match &args.config {
            Some(path) => config.save_to(path),
            None => config.save(),
        };
        match saved {
            Ok(()) => info!("Saved configuration"),
            Err(e) => warn!("Failed to save configuration: {}", e),
        }
    }
    info!(
        "Capture command: {:?}, default format: {} Hz/{} ch/{} B",
        config.capture_command,
        config.default_config.sample_rate,
        config.default_config.channels,
        config.default_config.bytes_per_sample
    );

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create Tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(run_server(&config, shutdown, None));
    if let Err(e) = result {
        error!("Daemon error: {}", e);
        std::process::exit(1);
    }

    info!("micrelay daemon stopped");
}

/// Console logging always; a daily-rolling file log unless disabled.
fn init_logging(file_log: bool) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match file_log.then(open_log_file).flatten() {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    guard
}

fn open_log_file() -> Option<RollingFileAppender> {
    let dir = match logging::ensure_log_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Warning: Failed to create log directory: {}", e);
            return None;
        }
    };

    match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(5)
        .filename_prefix(logging::DAEMON_LOG_PREFIX)
        .filename_suffix("log")
        .build(&dir)
    {
        Ok(appender) => Some(appender),
        Err(e) => {
            eprintln!("Warning: Failed to create log file appender: {}", e);
            None
        }
    }
}

/// Set up signal handlers for graceful shutdown.
fn setup_signal_handlers(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!("Failed to create signal runtime: {}", e);
                    return;
                }
            };
            rt.block_on(async {
                let (mut sigterm, mut sigint, mut sighup) = match (
                    signal(SignalKind::terminate()),
                    signal(SignalKind::interrupt()),
                    signal(SignalKind::hangup()),
                ) {
                    (Ok(term), Ok(int), Ok(hup)) => (term, int, hup),
                    _ => {
                        error!("Failed to install signal handlers");
                        return;
                    }
                };

                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM");
                    }
                    _ = sigint.recv() => {
                        info!("Received SIGINT");
                    }
                    _ = sighup.recv() => {
                        info!("Received SIGHUP");
                    }
                }

                shutdown.cancel();
            });
        });
    }

    #[cfg(windows)]
    {
        if let Err(e) = ctrlc::set_handler(move || {
            info!("Received Ctrl+C");
            shutdown.cancel();
        }) {
            error!("Error setting Ctrl+C handler: {}", e);
        }
    }
}
