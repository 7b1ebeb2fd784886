//! A single capture session: one recorder subprocess read in fixed windows,
//! each window framed as a WAV chunk.

use std::process::Stdio;
use std::time::Duration;

use micrelay_common::wav::{frame_chunk, WavSpec};
use micrelay_common::{ConfigError, MicConfig};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SessionError;

/// How a session launches its recorder.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Program followed by its arguments
    pub command: Vec<String>,
    /// Format the command actually records in
    pub native: MicConfig,
}

/// A running capture subprocess and the task reading from it.
pub struct CaptureSession {
    config: MicConfig,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CaptureSession {
    /// Spawn the recorder and start delivering chunks.
    ///
    /// `on_chunk` receives every framed chunk. `on_failed` is called once if
    /// reading from the recorder fails; the session does not restart itself.
    /// Neither callback runs after [`CaptureSession::stop`] returns.
    pub fn start<C, F>(
        options: &SessionOptions,
        config: MicConfig,
        on_chunk: C,
        on_failed: F,
    ) -> Result<Self, SessionError>
    where
        C: FnMut(Vec<u8>) + Send + 'static,
        F: FnOnce(String) + Send + 'static,
    {
        config.validate()?;
        let too_long = ConfigError::SecondsPerChunk(config.seconds_per_chunk);
        let window_len = config.read_window_len().ok_or(too_long.clone())?;
        let interval = config.chunk_interval().ok_or(too_long)?;

        let (program, args) = options
            .command
            .split_first()
            .ok_or(SessionError::EmptyCommand)?;

        if !same_sample_layout(&config, &options.native) {
            warn!(
                "Requested format {} Hz/{} ch/{} B differs from recorder format {} Hz/{} ch/{} B; chunks carry the requested header",
                config.sample_rate,
                config.channels,
                config.bytes_per_sample,
                options.native.sample_rate,
                options.native.channels,
                options.native.bytes_per_sample
            );
        }

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SessionError::Spawn {
                command: options.command.join(" "),
                source,
            })?;
        let stdout = child.stdout.take().ok_or(SessionError::NoStdout)?;

        info!(
            "Capture session started (pid: {:?}, window: {} bytes)",
            child.id(),
            window_len
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(read_loop(
            child,
            stdout,
            config,
            window_len,
            interval,
            cancel.clone(),
            on_chunk,
            on_failed,
        ));

        Ok(Self {
            config,
            cancel,
            task: Some(task),
        })
    }

    pub fn config(&self) -> &MicConfig {
        &self.config
    }

    /// Stop reading, terminate the subprocess and wait for both to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Capture task ended abnormally: {}", e);
            }
        }
        info!("Capture session stopped");
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn same_sample_layout(a: &MicConfig, b: &MicConfig) -> bool {
    a.sample_rate == b.sample_rate
        && a.channels == b.channels
        && a.bytes_per_sample == b.bytes_per_sample
}

async fn read_loop<C, F>(
    mut child: Child,
    mut stdout: ChildStdout,
    config: MicConfig,
    window_len: usize,
    interval: Duration,
    cancel: CancellationToken,
    mut on_chunk: C,
    on_failed: F,
) where
    C: FnMut(Vec<u8>),
    F: FnOnce(String),
{
    let spec = WavSpec::from(&config);
    let mut window = vec![0u8; window_len];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            read = stdout.read_exact(&mut window) => {
                if let Err(e) = read {
                    warn!("Capture read error: {}", e);
                    on_failed(e.to_string());
                    break;
                }
            }
        }

        on_chunk(frame_chunk(&window, &spec));

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    if let Err(e) = child.kill().await {
        debug!("Capture process already gone: {}", e);
    }
}
