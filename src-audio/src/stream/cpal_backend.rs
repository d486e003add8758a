// ============================================================================
// cpal Hardware Source / Sink
// ============================================================================
//
// cpal::Stream is not Send, so each device gets its own thread that builds
// the stream, owns it and obeys play/pause/shutdown commands. Samples cross
// to the stream worker through a BlockingRing.
//
// Devices are opened with their native channel count; capture is downmixed
// to mono and render duplicates mono to every channel.

use super::io::{AudioBackend, Sink, Source};
use super::ring::BlockingRing;
use super::session::SessionHandle;
use crate::config::EngineConfig;
use crate::error::{RelayError, RelayResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use crossbeam::channel::{Sender, bounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

const OPEN_TIMEOUT: Duration = Duration::from_secs(3);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

/// Mono scratch size; callbacks larger than this are processed in chunks
const CALLBACK_CHUNK_FRAMES: usize = 4096;

enum DeviceCommand {
    Play(Sender<RelayResult<()>>),
    Pause(Sender<RelayResult<()>>),
    Shutdown,
}

/// Thread owning one cpal stream
struct DeviceThread {
    label: &'static str,
    command_tx: Sender<DeviceCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceThread {
    /// Spawn the thread and wait until `build` produced a stream
    fn spawn<F>(label: &'static str, build: F) -> RelayResult<Self>
    where
        F: FnOnce() -> RelayResult<Stream> + Send + 'static,
    {
        Self::spawn_with_timeout(label, OPEN_TIMEOUT, build)
    }

    fn spawn_with_timeout<S, F>(
        label: &'static str,
        open_timeout: Duration,
        build: F,
    ) -> RelayResult<Self>
    where
        S: StreamTrait + 'static,
        F: FnOnce() -> RelayResult<S> + Send + 'static,
    {
        let (command_tx, command_rx) = crossbeam::channel::unbounded::<DeviceCommand>();
        let (ready_tx, ready_rx) = bounded::<RelayResult<()>>(1);

        let handle = std::thread::Builder::new()
            .name(format!("relay-{}", label))
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => {
                        ready_tx.send(Ok(())).ok();
                        stream
                    }
                    Err(e) => {
                        ready_tx.send(Err(e)).ok();
                        return;
                    }
                };

                for command in command_rx.iter() {
                    match command {
                        DeviceCommand::Play(reply) => {
                            let result = stream.play().map_err(|e| {
                                RelayError::HardwareOpen(format!("{} play failed: {}", label, e))
                            });
                            reply.send(result).ok();
                        }
                        DeviceCommand::Pause(reply) => {
                            let result = stream.pause().map_err(|e| {
                                RelayError::Device(format!("{} pause failed: {}", label, e))
                            });
                            reply.send(result).ok();
                        }
                        DeviceCommand::Shutdown => break,
                    }
                }
                drop(stream);
                log::debug!("[{}] Device thread exited", label);
            })
            .map_err(|e| RelayError::WorkerSpawn(format!("{} thread: {}", label, e)))?;

        let thread = Self {
            label,
            command_tx,
            handle: Mutex::new(Some(handle)),
        };

        match ready_rx.recv_timeout(open_timeout) {
            Ok(Ok(())) => Ok(thread),
            Ok(Err(e)) => {
                thread.shutdown();
                Err(e)
            }
            Err(_) => {
                // still blocked in build(): detach, the queued Shutdown ends it later
                thread.command_tx.send(DeviceCommand::Shutdown).ok();
                drop(thread.handle.lock().take());
                log::warn!("[{}] Open timed out, detaching device thread", label);
                Err(RelayError::HardwareOpen(format!(
                    "{} did not open within {:?}",
                    label, open_timeout
                )))
            }
        }
    }

    fn request(&self, make: fn(Sender<RelayResult<()>>) -> DeviceCommand) -> RelayResult<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.command_tx
            .send(make(reply_tx))
            .map_err(|_| RelayError::Device(format!("{} thread is gone", self.label)))?;
        reply_rx
            .recv_timeout(COMMAND_TIMEOUT)
            .map_err(|_| RelayError::Device(format!("{} did not respond", self.label)))?
    }

    fn shutdown(&self) {
        self.command_tx.send(DeviceCommand::Shutdown).ok();
        if let Some(handle) = self.handle.lock().take() {
            handle.join().ok();
        }
    }
}

impl Drop for DeviceThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Find a device whose name contains `wanted`, or the host default
fn select_device(host: &cpal::Host, wanted: Option<&str>, input: bool) -> RelayResult<Device> {
    let kind = if input { "input" } else { "output" };
    if let Some(wanted) = wanted {
        let devices: Vec<Device> = if input {
            host.input_devices().map(|d| d.collect())
        } else {
            host.output_devices().map(|d| d.collect())
        }
        .map_err(|e| RelayError::HardwareOpen(format!("Failed to enumerate {} devices: {}", kind, e)))?;

        let found = devices
            .into_iter()
            .find(|d| d.name().map(|n| n.contains(wanted)).unwrap_or(false));
        match found {
            Some(device) => return Ok(device),
            None => log::warn!("[Devices] {} device '{}' not found, using default", kind, wanted),
        }
    }
    let default = if input {
        host.default_input_device()
    } else {
        host.default_output_device()
    };
    default.ok_or_else(|| RelayError::HardwareOpen(format!("No default {} device available", kind)))
}

fn stream_config(channels: u16, sample_rate: u32) -> StreamConfig {
    StreamConfig {
        channels: channels.max(1),
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    }
}

/// Average interleaved frames into `mono`; returns the frame count written
fn downmix_into(interleaved: &[f32], channels: usize, mono: &mut [f32]) -> usize {
    let scale = 1.0 / channels as f32;
    let mut frames = 0;
    for (slot, frame) in mono.iter_mut().zip(interleaved.chunks_exact(channels)) {
        *slot = frame.iter().sum::<f32>() * scale;
        frames += 1;
    }
    frames
}

/// Copy each mono sample to every channel of its frame
fn fan_out(mono: &[f32], channels: usize, interleaved: &mut [f32]) {
    for (frame, sample) in interleaved.chunks_exact_mut(channels).zip(mono) {
        frame.fill(*sample);
    }
}

fn worker_timeout(config: &EngineConfig) -> Duration {
    (config.block_duration() * 4).max(Duration::from_millis(100))
}

/// Microphone source backed by cpal
pub struct CpalSource {
    ring: Arc<BlockingRing>,
    faulted: Arc<AtomicBool>,
    released: AtomicBool,
    read_timeout: Duration,
    session: SessionHandle,
    device: DeviceThread,
}

impl CpalSource {
    /// Open the configured (or default) input device
    pub fn open(config: &EngineConfig) -> RelayResult<Self> {
        let ring = Arc::new(BlockingRing::new(config.block_frames * 8));
        let faulted = Arc::new(AtomicBool::new(false));
        let wanted = config.input_device.clone();
        let sample_rate = config.sample_rate;

        let cb_ring = Arc::clone(&ring);
        let cb_faulted = Arc::clone(&faulted);
        let device = DeviceThread::spawn("capture", move || {
            let host = cpal::default_host();
            let device = select_device(&host, wanted.as_deref(), true)?;
            let channels = device
                .default_input_config()
                .map(|c| c.channels())
                .unwrap_or(1)
                .max(1) as usize;
            let config = stream_config(channels as u16, sample_rate);
            log::info!(
                "[Capture] Opening '{}' at {} Hz, {} channel(s)",
                device.name().unwrap_or_else(|_| "Unknown".to_string()),
                sample_rate,
                channels
            );

            let mut mono = vec![0.0f32; CALLBACK_CHUNK_FRAMES];
            device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        for chunk in data.chunks(CALLBACK_CHUNK_FRAMES * channels) {
                            let frames = downmix_into(chunk, channels, &mut mono);
                            cb_ring.push(&mono[..frames]);
                        }
                    },
                    move |err| {
                        log::error!("[Capture] Stream error: {}", err);
                        cb_faulted.store(true, Ordering::Release);
                    },
                    None,
                )
                .map_err(|e| RelayError::HardwareOpen(format!("Failed to build input stream: {}", e)))
        })?;

        Ok(Self {
            ring,
            faulted,
            released: AtomicBool::new(false),
            read_timeout: worker_timeout(config),
            session: SessionHandle::next(),
            device,
        })
    }
}

impl Source for CpalSource {
    fn start(&self) -> RelayResult<()> {
        self.ring.reopen();
        self.device.request(DeviceCommand::Play)
    }

    fn stop(&self) -> RelayResult<()> {
        let result = self.device.request(DeviceCommand::Pause);
        self.ring.clear();
        result
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.ring.close();
        self.device.shutdown();
        log::info!("[Capture] Released {}", self.session);
    }

    fn read(&self, buffer: &mut [f32]) -> RelayResult<usize> {
        if self.released.load(Ordering::Acquire) {
            return Err(RelayError::TransientIo("capture released".to_string()));
        }
        if self.faulted.load(Ordering::Acquire) {
            return Err(RelayError::TransientIo("capture device error".to_string()));
        }
        Ok(self.ring.pop_blocking(buffer, self.read_timeout))
    }

    fn session(&self) -> SessionHandle {
        self.session
    }
}

/// Output sink backed by cpal
pub struct CpalSink {
    ring: Arc<BlockingRing>,
    faulted: Arc<AtomicBool>,
    released: AtomicBool,
    write_timeout: Duration,
    buffer_frames: usize,
    prime_frames: usize,
    session: SessionHandle,
    device: DeviceThread,
}

impl CpalSink {
    /// Open the configured (or default) output device
    pub fn open(config: &EngineConfig) -> RelayResult<Self> {
        let buffer_frames = config.sink_buffer_frames();
        let ring = Arc::new(BlockingRing::new(buffer_frames));
        let faulted = Arc::new(AtomicBool::new(false));
        let wanted = config.output_device.clone();
        let sample_rate = config.sample_rate;

        let cb_ring = Arc::clone(&ring);
        let cb_faulted = Arc::clone(&faulted);
        let device = DeviceThread::spawn("render", move || {
            let host = cpal::default_host();
            let device = select_device(&host, wanted.as_deref(), false)?;
            let channels = device
                .default_output_config()
                .map(|c| c.channels())
                .unwrap_or(2)
                .max(1) as usize;
            let config = stream_config(channels as u16, sample_rate);
            log::info!(
                "[Render] Opening '{}' at {} Hz, {} channel(s)",
                device.name().unwrap_or_else(|_| "Unknown".to_string()),
                sample_rate,
                channels
            );

            let mut mono = vec![0.0f32; CALLBACK_CHUNK_FRAMES];
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for chunk in data.chunks_mut(CALLBACK_CHUNK_FRAMES * channels) {
                            let frames = chunk.len() / channels;
                            cb_ring.pop_or_silence(&mut mono[..frames]);
                            fan_out(&mono[..frames], channels, chunk);
                        }
                    },
                    move |err| {
                        log::error!("[Render] Stream error: {}", err);
                        cb_faulted.store(true, Ordering::Release);
                    },
                    None,
                )
                .map_err(|e| RelayError::HardwareOpen(format!("Failed to build output stream: {}", e)))
        })?;

        Ok(Self {
            ring,
            faulted,
            released: AtomicBool::new(false),
            write_timeout: worker_timeout(config),
            buffer_frames,
            prime_frames: config.block_frames,
            session: SessionHandle::next(),
            device,
        })
    }
}

impl Sink for CpalSink {
    fn play(&self) -> RelayResult<()> {
        self.ring.reopen();
        // one block of silence so the first callback does not underrun
        self.ring.push(&vec![0.0; self.prime_frames]);
        self.device.request(DeviceCommand::Play)
    }

    fn stop(&self) -> RelayResult<()> {
        let result = self.device.request(DeviceCommand::Pause);
        self.ring.clear();
        result
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.ring.close();
        self.device.shutdown();
        log::info!(
            "[Render] Released {} ({} underruns)",
            self.session,
            self.ring.underruns()
        );
    }

    fn write(&self, buffer: &[f32]) -> RelayResult<usize> {
        if self.released.load(Ordering::Acquire) {
            return Err(RelayError::TransientIo("render released".to_string()));
        }
        if self.faulted.load(Ordering::Acquire) {
            return Err(RelayError::TransientIo("render device error".to_string()));
        }
        Ok(self.ring.push_blocking(buffer, self.write_timeout))
    }

    fn buffer_size_frames(&self) -> usize {
        self.buffer_frames
    }

    fn session(&self) -> SessionHandle {
        self.session
    }
}

/// Production backend: default cpal host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for CpalBackend {
    fn open_source(&self, config: &EngineConfig) -> RelayResult<Arc<dyn Source>> {
        Ok(Arc::new(CpalSource::open(config)?))
    }

    fn open_sink(&self, config: &EngineConfig) -> RelayResult<Arc<dyn Sink>> {
        Ok(Arc::new(CpalSink::open(config)?))
    }
}
