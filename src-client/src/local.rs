//! Local capture backend.
//!
//! Acquisition walks an ordered list of [`CaptureStrategy`] implementations
//! and keeps the first one that starts. Samples from the winning strategy are
//! converted to the configured PCM width, cut into cadence windows and framed
//! as WAV chunks by a single driver task.

use std::io::Read;
use std::process::{Child, Command as ProcessCommand, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use micrelay_common::wav::{frame_chunk, WavSpec};
use micrelay_common::{CaptureConfig, ClientConfig, SampleFormat};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{CaptureBackend, EventSink};
use crate::error::{CaptureError, ClientError};
use crate::pcm::{self, ChunkAssembler};
use crate::state::{BackendKind, CaptureState, CaptureStatus, Chunk, StatusEvent};
use crate::timer::ReconnectTimer;

/// Samples handed from a capture strategy to the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBlock {
    /// Normalized samples, already interleaved
    Interleaved(Vec<f32>),
    /// Normalized samples, one buffer per channel
    Planar(Vec<Vec<f32>>),
    /// PCM bytes already in the configured format
    Encoded(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Samples(SampleBlock),
    /// The running stream failed and will produce nothing more
    Failed(String),
}

pub type EventSender = mpsc::UnboundedSender<CaptureEvent>;

/// One way of acquiring microphone samples.
pub trait CaptureStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start delivering samples for `config` into `events`.
    ///
    /// An error means this strategy could not initialize and the next one in
    /// the chain should be tried.
    fn start(
        &self,
        config: &CaptureConfig,
        events: EventSender,
    ) -> Result<Box<dyn ActiveCapture>, CaptureError>;
}

/// A running capture started by a [`CaptureStrategy`].
pub trait ActiveCapture: Send {
    /// Release every platform resource. Returns once nothing more will be
    /// delivered.
    fn stop(self: Box<Self>);
}

/// Settings for [`LocalBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct LocalOptions {
    /// Delay before retrying after an acquisition or stream failure
    pub retry_delay: Duration,
    /// Block size requested by the low-latency stream, in frames
    pub block_frames: u32,
    /// Recorder used when no direct stream can be opened
    pub recorder_command: Vec<String>,
}

impl Default for LocalOptions {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for LocalOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            retry_delay: Duration::from_millis(config.reconnect_delay_ms),
            block_frames: 1024,
            recorder_command: config.recorder_command.clone(),
        }
    }
}

/// The production acquisition chain, best first.
pub fn default_strategies(options: &LocalOptions) -> Vec<Box<dyn CaptureStrategy>> {
    vec![
        Box::new(LowLatencyStrategy {
            block_frames: options.block_frames,
        }),
        Box::new(DefaultStreamStrategy),
        Box::new(RecorderCommandStrategy {
            command: options.recorder_command.clone(),
        }),
    ]
}

fn input_device(device_id: Option<&str>) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    if let Some(wanted) = device_id {
        if let Ok(mut devices) = host.input_devices() {
            if let Some(device) = devices.find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            {
                return Ok(device);
            }
        }
        warn!("Input device {:?} not found, using the default", wanted);
    }
    host.default_input_device().ok_or(CaptureError::NoDevice)
}

fn build_stream<T, F>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    events: EventSender,
    convert: F,
) -> Result<cpal::Stream, CaptureError>
where
    T: cpal::SizedSample,
    F: Fn(T) -> f32 + Send + 'static,
{
    let errors = events.clone();
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let samples: Vec<f32> = data.iter().map(|s| convert(*s)).collect();
            let _ = events.send(CaptureEvent::Samples(SampleBlock::Interleaved(samples)));
        },
        move |err: cpal::StreamError| {
            let _ = errors.send(CaptureEvent::Failed(err.to_string()));
        },
        None,
    )?;
    Ok(stream)
}

/// Owns a cpal stream on a dedicated thread, since streams are not `Send`.
struct StreamThread {
    stop: std::sync::mpsc::Sender<()>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl ActiveCapture for StreamThread {
    fn stop(mut self: Box<Self>) {
        let _ = self.stop.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Capture stream thread panicked");
            }
        }
    }
}

fn spawn_stream_thread<F>(name: &'static str, build: F) -> Result<Box<dyn ActiveCapture>, CaptureError>
where
    F: FnOnce() -> Result<cpal::Stream, CaptureError> + Send + 'static,
{
    let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);
    let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

    let thread = std::thread::Builder::new()
        .name(format!("micrelay-{}", name))
        .spawn(move || {
            let stream = match build().and_then(|stream| {
                stream.play()?;
                Ok(stream)
            }) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));

            // Returns on an explicit stop or when the handle is dropped.
            let _ = stop_rx.recv();
            drop(stream);
        })
        .map_err(|source| CaptureError::Spawn {
            command: name.to_string(),
            source,
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(Box::new(StreamThread {
            stop: stop_tx,
            thread: Some(thread),
        })),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => {
            let _ = thread.join();
            Err(CaptureError::ThreadExited)
        }
    }
}

/// cpal input stream with a fixed block size at the requested format.
pub struct LowLatencyStrategy {
    pub block_frames: u32,
}

impl CaptureStrategy for LowLatencyStrategy {
    fn name(&self) -> &'static str {
        "low-latency"
    }

    fn start(
        &self,
        config: &CaptureConfig,
        events: EventSender,
    ) -> Result<Box<dyn ActiveCapture>, CaptureError> {
        let config = config.clone();
        let block_frames = self.block_frames;
        spawn_stream_thread(self.name(), move || {
            let device = input_device(config.device_id.as_deref())?;
            let stream_config = cpal::StreamConfig {
                channels: config.channel_count,
                sample_rate: cpal::SampleRate(config.sample_rate),
                buffer_size: cpal::BufferSize::Fixed(block_frames),
            };
            build_stream::<f32, _>(&device, &stream_config, events, |s| s)
        })
    }
}

/// cpal input stream with the device's default buffering and native sample
/// type, normalized to f32.
pub struct DefaultStreamStrategy;

impl CaptureStrategy for DefaultStreamStrategy {
    fn name(&self) -> &'static str {
        "default-stream"
    }

    fn start(
        &self,
        config: &CaptureConfig,
        events: EventSender,
    ) -> Result<Box<dyn ActiveCapture>, CaptureError> {
        let config = config.clone();
        spawn_stream_thread(self.name(), move || {
            let device = input_device(config.device_id.as_deref())?;
            let native = device.default_input_config()?;
            let stream_config = cpal::StreamConfig {
                channels: config.channel_count,
                sample_rate: cpal::SampleRate(config.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            match native.sample_format() {
                cpal::SampleFormat::F32 => {
                    build_stream::<f32, _>(&device, &stream_config, events, |s| s)
                }
                cpal::SampleFormat::I16 => {
                    build_stream::<i16, _>(&device, &stream_config, events, pcm::i16_to_f32)
                }
                cpal::SampleFormat::U16 => {
                    build_stream::<u16, _>(&device, &stream_config, events, pcm::u16_to_f32)
                }
                other => Err(CaptureError::UnsupportedFormat(format!("{:?}", other))),
            }
        })
    }
}

/// Arguments appended to the recorder command so it emits raw PCM in the
/// configured format (arecord syntax).
pub fn recorder_format_args(config: &CaptureConfig) -> Vec<String> {
    let format = match config.sample_format() {
        SampleFormat::Float => "FLOAT_LE",
        SampleFormat::Int => "S16_LE",
    };
    let mut args = vec![
        "-t".to_string(),
        "raw".to_string(),
        "-f".to_string(),
        format.to_string(),
        "-c".to_string(),
        config.channel_count.to_string(),
        "-r".to_string(),
        config.sample_rate.to_string(),
    ];
    if let Some(device) = &config.device_id {
        args.push("-D".to_string());
        args.push(device.clone());
    }
    args
}

/// External recorder process reading one chunk window at a time.
pub struct RecorderCommandStrategy {
    pub command: Vec<String>,
}

struct RecorderProcess {
    child: Child,
    reader: Option<std::thread::JoinHandle<()>>,
}

impl ActiveCapture for RecorderProcess {
    fn stop(mut self: Box<Self>) {
        if let Err(e) = self.child.kill() {
            debug!("Recorder already exited: {}", e);
        }
        let _ = self.child.wait();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl CaptureStrategy for RecorderCommandStrategy {
    fn name(&self) -> &'static str {
        "recorder-command"
    }

    fn start(
        &self,
        config: &CaptureConfig,
        events: EventSender,
    ) -> Result<Box<dyn ActiveCapture>, CaptureError> {
        let (program, args) = self.command.split_first().ok_or(CaptureError::EmptyCommand)?;
        let spawn_error = |source| CaptureError::Spawn {
            command: self.command.join(" "),
            source,
        };

        let mut child = ProcessCommand::new(program)
            .args(args)
            .args(recorder_format_args(config))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(spawn_error)?;

        let Some(mut stdout) = child.stdout.take() else {
            let _ = child.kill();
            return Err(spawn_error(std::io::Error::other("recorder stdout not captured")));
        };

        let window = config.chunk_payload_len().max(1);
        let reader = std::thread::Builder::new()
            .name("micrelay-recorder".to_string())
            .spawn(move || {
                let mut buffer = vec![0u8; window];
                loop {
                    match stdout.read_exact(&mut buffer) {
                        Ok(()) => {
                            let block = SampleBlock::Encoded(buffer.clone());
                            if events.send(CaptureEvent::Samples(block)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = events.send(CaptureEvent::Failed(format!(
                                "recorder output ended: {}",
                                e
                            )));
                            break;
                        }
                    }
                }
            });

        match reader {
            Ok(reader) => Ok(Box::new(RecorderProcess {
                child,
                reader: Some(reader),
            })),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(spawn_error(e))
            }
        }
    }
}

/// Start the first strategy in `strategies` that initializes.
fn start_first(
    strategies: &[Box<dyn CaptureStrategy>],
    config: &CaptureConfig,
    events: EventSender,
) -> Result<Box<dyn ActiveCapture>, CaptureError> {
    let mut failures = Vec::new();
    for strategy in strategies {
        match strategy.start(config, events.clone()) {
            Ok(active) => {
                info!("Local capture started via {}", strategy.name());
                return Ok(active);
            }
            Err(e) => {
                warn!("{} capture unavailable: {}", strategy.name(), e);
                failures.push(format!("{}: {}", strategy.name(), e));
            }
        }
    }
    Err(CaptureError::Exhausted(failures.join("; ")))
}

type Reply = oneshot::Sender<Result<(), ClientError>>;

enum Command {
    Configure(CaptureConfig, Reply),
    Start(Reply),
    Stop(Reply),
    ReportError(String, Reply),
}

/// Capture backend reading the local microphone.
pub struct LocalBackend {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Mutex<CaptureState>>,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl LocalBackend {
    /// Whether the platform exposes a default input device.
    pub fn is_supported() -> bool {
        cpal::default_host().default_input_device().is_some()
    }

    /// Open with the default acquisition chain.
    pub fn open(options: LocalOptions, config: CaptureConfig, sink: EventSink) -> Self {
        let strategies = default_strategies(&options);
        Self::with_strategies(options, config, strategies, sink)
    }

    /// Open with a custom acquisition chain, tried in order.
    pub fn with_strategies(
        options: LocalOptions,
        config: CaptureConfig,
        strategies: Vec<Box<dyn CaptureStrategy>>,
        sink: EventSink,
    ) -> Self {
        let mut state = CaptureState::new(BackendKind::Local);
        state.config = Some(config.clone());
        state.apply(StatusEvent::Open);
        sink.emit_state(&state);
        state.apply(StatusEvent::Opened);
        sink.emit_state(&state);

        let shared = Arc::new(Mutex::new(state));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let mut driver = LocalDriver {
            assembler: ChunkAssembler::new(config.chunk_payload_len()),
            options,
            strategies: Arc::new(strategies),
            sink,
            shared: shared.clone(),
            commands: command_rx,
            cancel: cancel.clone(),
            config,
            active: None,
            events: None,
            wants_listening: false,
            retry: ReconnectTimer::new(),
        };
        let handle = tokio::spawn(async move { driver.run().await });

        Self {
            commands,
            shared,
            cancel,
            driver: Some(handle),
        }
    }

    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<(), ClientError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| ClientError::Closed)?;
        response.await.map_err(|_| ClientError::Closed)?
    }
}

impl Drop for LocalBackend {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl CaptureBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn configure(&mut self, config: CaptureConfig) -> Result<(), ClientError> {
        self.request(|reply| Command::Configure(config, reply)).await
    }

    async fn start(&mut self) -> Result<(), ClientError> {
        self.request(Command::Start).await
    }

    async fn stop(&mut self) -> Result<(), ClientError> {
        self.request(Command::Stop).await
    }

    fn state(&self) -> CaptureState {
        self.shared.lock().clone()
    }

    async fn report_error(&mut self, error: String) {
        if let Err(e) = self.request(|reply| Command::ReportError(error, reply)).await {
            debug!("Could not report error to local backend: {}", e);
        }
    }

    async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                warn!("Local backend driver ended abnormally: {}", e);
            }
        }
    }
}

async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<CaptureEvent>>) -> Option<CaptureEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

struct LocalDriver {
    options: LocalOptions,
    strategies: Arc<Vec<Box<dyn CaptureStrategy>>>,
    sink: EventSink,
    shared: Arc<Mutex<CaptureState>>,
    commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
    config: CaptureConfig,
    active: Option<Box<dyn ActiveCapture>>,
    events: Option<mpsc::UnboundedReceiver<CaptureEvent>>,
    assembler: ChunkAssembler,
    wants_listening: bool,
    retry: ReconnectTimer,
}

impl LocalDriver {
    async fn run(&mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = next_event(&mut self.events) => self.on_capture_event(event).await,
                _ = self.retry.fired() => self.recover().await,
            }
        }

        self.retry.cancel();
        self.teardown().await;
        self.update(|state| {
            state.apply(StatusEvent::Close);
        });
        info!("Local capture closed");
    }

    fn update(&self, change: impl FnOnce(&mut CaptureState)) {
        let snapshot = {
            let mut state = self.shared.lock();
            change(&mut state);
            state.clone()
        };
        self.sink.emit_state(&snapshot);
    }

    fn status(&self) -> CaptureStatus {
        self.shared.lock().status
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Configure(config, reply) => {
                let _ = reply.send(self.reconfigure(config).await);
            }
            Command::Start(reply) => {
                let _ = reply.send(self.begin_listening().await);
            }
            Command::Stop(reply) => {
                self.stop_listening().await;
                let _ = reply.send(Ok(()));
            }
            Command::ReportError(error, reply) => {
                self.update(|state| state.error = error);
                let _ = reply.send(Ok(()));
            }
        }
    }

    /// Nothing fires after this until the next start.
    async fn stop_listening(&mut self) {
        self.wants_listening = false;
        match self.status() {
            CaptureStatus::Listening => {
                self.teardown().await;
                self.update(|state| {
                    state.apply(StatusEvent::Unlisten);
                });
                info!("Local capture stopped");
            }
            CaptureStatus::Error => {
                self.retry.cancel();
                self.recover().await;
                info!("Local capture stopped while recovering");
            }
            _ => {}
        }
    }

    async fn reconfigure(&mut self, config: CaptureConfig) -> Result<(), ClientError> {
        self.config = config.clone();
        self.update(|state| state.config = Some(config));

        if self.status() != CaptureStatus::Listening {
            return Ok(());
        }

        // Restart so the new format applies from the next chunk on.
        self.teardown().await;
        match self.acquire().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fail(e.to_string()).await;
                Err(e.into())
            }
        }
    }

    async fn begin_listening(&mut self) -> Result<(), ClientError> {
        self.wants_listening = true;
        match self.status() {
            CaptureStatus::Listening => return Ok(()),
            CaptureStatus::Connected => {}
            // Recovery is pending; it resumes listening once it succeeds.
            _ => return Ok(()),
        }

        match self.acquire().await {
            Ok(()) => {
                self.update(|state| {
                    state.apply(StatusEvent::Listen);
                    state.error.clear();
                });
                Ok(())
            }
            Err(e) => {
                self.fail(e.to_string()).await;
                Err(e.into())
            }
        }
    }

    /// Walk the strategy chain on the blocking pool; opening a device can
    /// stall for a long time.
    async fn acquire(&mut self) -> Result<(), CaptureError> {
        let (events, receiver) = mpsc::unbounded_channel();
        let strategies = self.strategies.clone();
        let config = self.config.clone();

        let active = tokio::task::spawn_blocking(move || start_first(&strategies, &config, events))
            .await
            .map_err(|e| CaptureError::Exhausted(format!("acquisition task failed: {}", e)))??;

        self.active = Some(active);
        self.events = Some(receiver);
        self.assembler = ChunkAssembler::new(self.config.chunk_payload_len());
        Ok(())
    }

    async fn teardown(&mut self) {
        self.events = None;
        if let Some(active) = self.active.take() {
            if let Err(e) = tokio::task::spawn_blocking(move || active.stop()).await {
                warn!("Releasing local capture failed: {}", e);
            }
        }
        self.assembler.reset();
    }

    async fn fail(&mut self, reason: String) {
        warn!("Local capture failed: {}", reason);
        self.teardown().await;
        self.update(|state| {
            state.apply(StatusEvent::Fail);
            state.error = reason;
        });
        self.retry.schedule(self.options.retry_delay);
    }

    async fn recover(&mut self) {
        self.update(|state| {
            state.apply(StatusEvent::Retry);
        });
        self.update(|state| {
            state.apply(StatusEvent::Opened);
            state.error.clear();
        });

        if self.wants_listening {
            info!("Resuming local capture");
            if let Err(e) = self.begin_listening().await {
                debug!("Local capture retry failed: {}", e);
            }
        }
    }

    async fn on_capture_event(&mut self, event: Option<CaptureEvent>) {
        match event {
            Some(CaptureEvent::Samples(block)) => self.on_samples(block),
            Some(CaptureEvent::Failed(reason)) => self.fail(reason).await,
            None => self.fail("capture stream ended".to_string()).await,
        }
    }

    fn on_samples(&mut self, block: SampleBlock) {
        let bytes = match block {
            SampleBlock::Interleaved(samples) => {
                pcm::encode_samples(&samples, self.config.bytes_per_sample)
            }
            SampleBlock::Planar(planes) => {
                pcm::encode_samples(&pcm::interleave(&planes), self.config.bytes_per_sample)
            }
            SampleBlock::Encoded(bytes) => bytes,
        };

        let spec = WavSpec::from(&self.config);
        for window in self.assembler.push(&bytes) {
            let chunk = Chunk::from(frame_chunk(&window, &spec));
            self.shared.lock().record_chunk(&chunk);
            self.sink.emit_chunk(&chunk);
        }
    }
}
