//! micrelay Command Line Interface
//!
//! Captures microphone audio through the micrelay client library (daemon
//! first, local device as fallback) and talks to the capture daemon directly
//! for status and control.

mod client;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use micrelay_client::{BackendManager, CaptureState, CaptureStatus, Chunk};
use micrelay_common::config::CONFIG_KEYS;
use micrelay_common::ipc::ControlMessage;
use micrelay_common::{ClientConfig, ConfigError, MicState, MicStatus};
use tokio::sync::mpsc;

use client::{Client, IpcError};

#[derive(Parser)]
#[command(name = "micrelay")]
#[command(author = "micrelay")]
#[command(version)]
#[command(about = "Microphone capture relay CLI", long_about = None)]
struct Cli {
    /// Output format
    #[arg(long, default_value = "text")]
    format: OutputFormat,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Increase verbosity
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture audio chunks from the daemon or the local microphone
    Listen {
        /// Stop after this many seconds (default: until Ctrl+C)
        #[arg(short, long)]
        seconds: Option<u64>,

        /// Write each chunk as a WAV file into this directory
        #[arg(short, long)]
        out: Option<PathBuf>,

        #[arg(long)]
        sample_rate: Option<u32>,

        #[arg(long)]
        channels: Option<u16>,

        #[arg(long)]
        bytes_per_sample: Option<u16>,

        #[arg(long)]
        seconds_per_chunk: Option<f64>,
    },

    /// Show the daemon's microphone state
    Status,

    /// Stop the daemon's capture session
    Stop,

    /// Measure round-trip time to the daemon
    Ping,

    /// Report which capture backend would be used
    Probe,

    /// Read or write persisted configuration values
    #[command(alias = "cfg")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Display all persisted configuration values
    Show,

    /// Get the value of a configuration key
    Get {
        /// Configuration key (see `config show`)
        key: String,
    },

    /// Set the value of a configuration key
    Set {
        /// Configuration key (see `config show`)
        key: String,

        /// New value
        value: String,
    },
}

/// Error with an associated exit code.
struct CliError {
    message: String,
    exit_code: i32,
}

impl CliError {
    fn new(message: impl Into<String>, exit_code: i32) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    fn general(message: impl Into<String>) -> Self {
        Self::new(message, 1)
    }

    fn usage(message: impl Into<String>) -> Self {
        Self::new(message, 64)
    }
}

impl From<String> for CliError {
    fn from(message: String) -> Self {
        Self::general(message)
    }
}

impl From<&str> for CliError {
    fn from(message: &str) -> Self {
        Self::general(message.to_string())
    }
}

impl From<IpcError> for CliError {
    fn from(e: IpcError) -> Self {
        Self::general(e.to_string())
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::usage(e.to_string())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{}: {}", "Error".red().bold(), e.message);
        std::process::exit(e.exit_code);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = ClientConfig::load();

    match &cli.command {
        Commands::Version => {
            println!("micrelay {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Config { action } => handle_config(action, &cli),
        Commands::Listen {
            seconds,
            out,
            sample_rate,
            channels,
            bytes_per_sample,
            seconds_per_chunk,
        } => {
            let mut config = config;
            apply_capture_overrides(
                &mut config,
                *sample_rate,
                *channels,
                *bytes_per_sample,
                *seconds_per_chunk,
            )?;
            handle_listen(&config, *seconds, out.as_deref(), &cli).await
        }
        Commands::Probe => handle_probe(&config, &cli).await,
        Commands::Status => {
            let client = connect(&config).await?;
            print_state(client.state(), &cli)?;
            client.close().await;
            Ok(())
        }
        Commands::Stop => {
            let mut client = connect(&config).await?;
            let state = client.request(ControlMessage::StopListening).await?;
            client.close().await;
            if state.state == MicStatus::Listening {
                return Err("Daemon is still listening".into());
            }
            if !cli.quiet {
                println!("{}", "Capture stopped".green());
            }
            Ok(())
        }
        Commands::Ping => {
            let mut client = connect(&config).await?;
            let rtt = client.ping().await?;
            client.close().await;
            if matches!(cli.format, OutputFormat::Json) {
                println!(
                    "{}",
                    serde_json::json!({ "status": "ok", "rtt_ms": rtt.as_secs_f64() * 1000.0 })
                );
            } else {
                println!(
                    "{} ({:.1} ms)",
                    "pong".green(),
                    rtt.as_secs_f64() * 1000.0
                );
            }
            Ok(())
        }
    }
}

async fn connect(config: &ClientConfig) -> Result<Client, CliError> {
    let timeout = Duration::from_millis(config.connect_timeout_ms);
    Ok(Client::connect(&config.daemon_url, timeout).await?)
}

fn apply_capture_overrides(
    config: &mut ClientConfig,
    sample_rate: Option<u32>,
    channels: Option<u16>,
    bytes_per_sample: Option<u16>,
    seconds_per_chunk: Option<f64>,
) -> Result<(), CliError> {
    if let Some(rate) = sample_rate {
        config.capture.sample_rate = rate;
    }
    if let Some(channels) = channels {
        config.capture.channel_count = channels;
    }
    if let Some(bytes) = bytes_per_sample {
        config.capture.bytes_per_sample = bytes;
    }
    if let Some(seconds) = seconds_per_chunk {
        config.capture.seconds_per_chunk = seconds;
    }
    config.capture.validate()?;
    Ok(())
}

fn print_state(state: &MicState, cli: &Cli) -> Result<(), CliError> {
    if matches!(cli.format, OutputFormat::Json) {
        println!(
            "{}",
            serde_json::to_string_pretty(state).map_err(|e| e.to_string())?
        );
        return Ok(());
    }

    let status_str = match state.state {
        MicStatus::Listening => "listening".green().bold(),
        MicStatus::Idle => "idle".dimmed(),
        MicStatus::Error => "error".red().bold(),
    };
    println!("Microphone: {}", status_str);
    println!(
        "Format: {} Hz, {} ch, {} bytes/sample, {} s/chunk",
        state.config.sample_rate,
        state.config.channels,
        state.config.bytes_per_sample,
        state.config.seconds_per_chunk
    );
    if !state.error.is_empty() {
        println!("Error: {}", state.error.red());
    }
    Ok(())
}

async fn handle_probe(config: &ClientConfig, cli: &Cli) -> Result<(), CliError> {
    let manager = BackendManager::from_config(config);
    let backend = manager.active_backend().await;
    let state = manager.get_state().await;
    manager.shutdown().await;

    if matches!(cli.format, OutputFormat::Json) {
        println!(
            "{}",
            serde_json::to_string_pretty(&state).map_err(|e| e.to_string())?
        );
    } else {
        println!("Backend: {}", backend.to_string().cyan().bold());
        if !state.error.is_empty() {
            println!("Error: {}", state.error.red());
        }
    }
    Ok(())
}

async fn handle_listen(
    config: &ClientConfig,
    seconds: Option<u64>,
    out: Option<&Path>,
    cli: &Cli,
) -> Result<(), CliError> {
    if let Some(dir) = out {
        std::fs::create_dir_all(dir)
            .map_err(|e| format!("Failed to create {}: {}", dir.display(), e))?;
    }

    let manager = BackendManager::from_config(config);

    let (state_tx, mut states) = mpsc::unbounded_channel::<CaptureState>();
    let (chunk_tx, mut chunks) = mpsc::unbounded_channel::<Chunk>();
    let _state_sub = manager
        .subscribe_state(move |state| {
            let _ = state_tx.send(state.clone());
        })
        .await;
    let _chunk_sub = manager
        .subscribe_chunks(move |chunk| {
            let _ = chunk_tx.send(chunk.clone());
        })
        .await;

    let initial = manager.get_state().await;
    if !cli.quiet {
        eprintln!(
            "Using {} backend ({})",
            initial.backend.to_string().cyan().bold(),
            initial.status
        );
    }

    if let Err(e) = manager.start().await {
        manager.shutdown().await;
        return Err(format!("Failed to start capture: {}", e).into());
    }

    let started = Local::now();
    let deadline = tokio::time::sleep(seconds.map_or(Duration::MAX, Duration::from_secs));
    tokio::pin!(deadline);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut last_status = initial.status;
    let mut count: u64 = 0;
    let mut bytes: u64 = 0;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                if !cli.quiet {
                    eprintln!("\n{}", "Interrupted".yellow());
                }
                break;
            }
            _ = &mut deadline => break,
            Some(state) = states.recv() => {
                if state.status != last_status || cli.verbose {
                    print_transition(&state, cli);
                }
                last_status = state.status;
            }
            Some(chunk) = chunks.recv() => {
                count += 1;
                bytes += chunk.len() as u64;
                if let Some(dir) = out {
                    let path = dir.join(chunk_file_name(&started, count));
                    std::fs::write(&path, chunk.as_bytes())
                        .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
                }
                if cli.verbose {
                    eprintln!("{}", format!("[chunk {}: {} bytes]", count, chunk.len()).dimmed());
                }
            }
        }
    }

    let _ = manager.stop().await;
    manager.shutdown().await;

    if matches!(cli.format, OutputFormat::Json) {
        println!(
            "{}",
            serde_json::json!({ "chunks": count, "bytes": bytes })
        );
    } else if !cli.quiet {
        println!(
            "{} {} ({} bytes)",
            count.to_string().green().bold(),
            if count == 1 { "chunk" } else { "chunks" },
            bytes
        );
    }
    Ok(())
}

fn print_transition(state: &CaptureState, cli: &Cli) {
    if cli.quiet {
        return;
    }
    let status = match state.status {
        CaptureStatus::Listening => state.status.to_string().green(),
        CaptureStatus::Error => state.status.to_string().red(),
        _ => state.status.to_string().yellow(),
    };
    if state.error.is_empty() {
        eprintln!("[{}] {}", state.backend, status);
    } else {
        eprintln!("[{}] {}: {}", state.backend, status, state.error);
    }
}

/// `chunk-<start timestamp>-<n>.wav`, numbered from 1.
fn chunk_file_name(started: &DateTime<Local>, index: u64) -> String {
    format!("chunk-{}-{:05}.wav", started.format("%Y%m%d-%H%M%S"), index)
}

/// Handle config subcommands. These only touch the local config file.
fn handle_config(action: &ConfigAction, cli: &Cli) -> Result<(), CliError> {
    let path = ClientConfig::config_path();
    let mut config = ClientConfig::load_from(&path);

    match action {
        ConfigAction::Show => {
            if matches!(cli.format, OutputFormat::Json) {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&config).map_err(|e| e.to_string())?
                );
            } else {
                for key in CONFIG_KEYS {
                    println!("{}: {}", key.bold(), config.get_value(key)?);
                }
            }
        }
        ConfigAction::Get { key } => {
            let value = config.get_value(key).map_err(unknown_key_hint)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            config.set_value(key, value).map_err(unknown_key_hint)?;
            config
                .save_to(&path)
                .map_err(|e| format!("Failed to save {}: {}", path.display(), e))?;
            if !cli.quiet {
                println!("{} {} = {}", "Set".green().bold(), key, config.get_value(key)?);
            }
        }
    }
    Ok(())
}

fn unknown_key_hint(e: ConfigError) -> CliError {
    match e {
        ConfigError::UnknownKey(key) => CliError::usage(format!(
            "Unknown configuration key '{}'. Valid keys: {}",
            key,
            CONFIG_KEYS.join(", ")
        )),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_chunk_file_name() {
        let started = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(chunk_file_name(&started, 1), "chunk-20240309-140507-00001.wav");
        assert_eq!(chunk_file_name(&started, 123), "chunk-20240309-140507-00123.wav");
    }

    #[test]
    fn test_capture_overrides_validate() {
        let mut config = ClientConfig::default();
        apply_capture_overrides(&mut config, Some(44_100), Some(2), None, Some(0.5)).ok();
        assert_eq!(config.capture.sample_rate, 44_100);
        assert_eq!(config.capture.channel_count, 2);
        assert_eq!(config.capture.seconds_per_chunk, 0.5);

        let err = apply_capture_overrides(&mut config, None, None, Some(3), None)
            .err()
            .unwrap();
        assert_eq!(err.exit_code, 64);
    }

    #[test]
    fn test_unknown_key_is_usage_error() {
        let err = unknown_key_hint(ConfigError::UnknownKey("volume".into()));
        assert_eq!(err.exit_code, 64);
        assert!(err.message.contains("daemon_url"));
    }
}
