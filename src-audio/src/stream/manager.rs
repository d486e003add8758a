// ============================================================================
// Stream Manager - Real-time Relay Worker
// ============================================================================
//
// Owns the worker thread that runs read -> process -> write.
//
// Lifecycle:
// - start(): spawns the worker, which opens the sink then the source and
//   reports back; open failures are returned synchronously
// - stop(): clears the run flag, waits up to stop_timeout for the worker,
//   then releases the devices itself and detaches the worker
//
// The active source/sink references are shared with the control thread
// behind one mutex and always removed with take(), so each device is
// released exactly once whichever side gets there first. Every worker has
// its own run flag and epoch: a worker detached by a forced stop can never
// release devices or effects that belong to a newer worker.

use super::io::{AudioBackend, Sink, Source};
use super::pink_noise::PinkNoiseSource;
use crate::config::{EngineConfig, ProcessingConfig};
use crate::error::{RelayError, RelayResult};
use crate::events::{EventBus, RelayEvent};
use crate::processor::EffectChain;
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::{Mutex, RwLock};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use thread_priority::{ThreadPriority, set_current_thread_priority};

/// Consecutive failed reads/writes before the loop gives up
pub const MAX_CONSECUTIVE_IO_FAILURES: u32 = 25;

/// Upper bound for the worker to open its devices
const START_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after a failed read/write, so a dead device does not spin the CPU
const FAILURE_BACKOFF: Duration = Duration::from_millis(2);

/// Which source feeds the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Hardware microphone
    Live,
    /// Synthetic pink noise
    Test,
}

#[derive(Default)]
struct ActiveStreams {
    epoch: u64,
    source: Option<Arc<dyn Source>>,
    sink: Option<Arc<dyn Sink>>,
}

struct Worker {
    mode: StreamMode,
    epoch: u64,
    run: Arc<AtomicBool>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

/// Everything the worker thread needs
struct WorkerContext {
    backend: Arc<dyn AudioBackend>,
    processor: Arc<EffectChain>,
    events: EventBus,
    config: EngineConfig,
    processing: ProcessingConfig,
    mode: StreamMode,
    epoch: u64,
    run: Arc<AtomicBool>,
    active: Arc<Mutex<ActiveStreams>>,
}

enum LoopExit {
    Stopped,
    Faulted(String),
}

/// Manages the relay worker
pub struct StreamManager {
    backend: Arc<dyn AudioBackend>,
    processor: Arc<EffectChain>,
    events: EventBus,
    config: EngineConfig,
    lifecycle: Mutex<Option<Worker>>,
    current_run: RwLock<Option<Arc<AtomicBool>>>,
    active: Arc<Mutex<ActiveStreams>>,
    epochs: AtomicU64,
}

impl StreamManager {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        processor: Arc<EffectChain>,
        events: EventBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            backend,
            processor,
            events,
            config,
            lifecycle: Mutex::new(None),
            current_run: RwLock::new(None),
            active: Arc::new(Mutex::new(ActiveStreams::default())),
            epochs: AtomicU64::new(0),
        }
    }

    /// Start relaying. A call in the running mode is a no-op; a call in the
    /// other mode stops the running worker first.
    ///
    /// Returns once both devices are open and running, or with the open
    /// error; nothing stays open on failure.
    pub fn start(&self, mode: StreamMode, processing: &ProcessingConfig) -> RelayResult<()> {
        let mut lifecycle = self.lifecycle.lock();

        let current = lifecycle
            .as_ref()
            .map(|w| (w.mode, w.run.load(Ordering::Acquire)));
        match current {
            Some((current_mode, true)) if current_mode == mode => {
                log::debug!("[Stream] Already running ({:?}), start ignored", current_mode);
                return Ok(());
            }
            Some((current_mode, true)) => {
                log::info!("[Stream] Switching {:?} -> {:?}", current_mode, mode);
                self.stop_worker(&mut lifecycle);
            }
            Some((_, false)) => {
                // worker exited on its own (fault); reap it before starting over
                if let Some(worker) = lifecycle.take() {
                    self.reap(worker);
                }
            }
            None => {}
        }

        self.config.validate()?;

        let epoch = self.epochs.fetch_add(1, Ordering::Relaxed) + 1;
        let run = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded::<RelayResult<()>>(1);
        let (done_tx, done_rx) = bounded::<()>(1);

        let ctx = WorkerContext {
            backend: Arc::clone(&self.backend),
            processor: Arc::clone(&self.processor),
            events: self.events.clone(),
            config: self.config.clone(),
            processing: *processing,
            mode,
            epoch,
            run: Arc::clone(&run),
            active: Arc::clone(&self.active),
        };

        let handle = std::thread::Builder::new()
            .name("relay-stream".to_string())
            .spawn(move || run_worker(ctx, ready_tx, done_tx))
            .map_err(|e| RelayError::WorkerSpawn(e.to_string()))?;

        let mut worker = Worker {
            mode,
            epoch,
            run,
            done_rx,
            handle: Some(handle),
        };

        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok(())) => {
                log::info!("[Stream] Started ({:?})", mode);
                *self.current_run.write() = Some(Arc::clone(&worker.run));
                *lifecycle = Some(worker);
                Ok(())
            }
            Ok(Err(e)) => {
                log::error!("[Stream] Failed to start: {}", e);
                worker.run.store(false, Ordering::Release);
                self.reap(worker);
                Err(e)
            }
            Err(_) => {
                log::error!("[Stream] Worker did not become ready within {:?}", START_TIMEOUT);
                worker.run.store(false, Ordering::Release);
                self.force_release(worker.epoch);
                worker.handle.take();
                Err(RelayError::HardwareOpen("timed out opening audio devices".to_string()))
            }
        }
    }

    /// Stop relaying. Idempotent; devices are released when this returns.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock();
        self.stop_worker(&mut lifecycle);
    }

    fn stop_worker(&self, lifecycle: &mut Option<Worker>) {
        let Some(mut worker) = lifecycle.take() else {
            return;
        };
        *self.current_run.write() = None;

        worker.run.store(false, Ordering::Release);
        match worker.done_rx.recv_timeout(self.config.stop_timeout()) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = worker.handle.take() {
                    handle.join().ok();
                }
                log::info!("[Stream] Stopped ({:?})", worker.mode);
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "[Stream] Worker did not exit within {:?}, forcing cleanup",
                    self.config.stop_timeout()
                );
                self.force_release(worker.epoch);
                // detach: the worker exits once its blocked call returns
                worker.handle.take();
            }
        }
    }

    /// Forward a new configuration to the processor; never blocks the worker
    pub fn update_config(&self, processing: &ProcessingConfig) {
        self.processor.update_config(processing);
    }

    /// True while a worker is relaying
    pub fn is_running(&self) -> bool {
        self.current_run
            .read()
            .as_ref()
            .map(|run| run.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Mode of the current worker, if any
    pub fn mode(&self) -> Option<StreamMode> {
        if !self.is_running() {
            return None;
        }
        self.lifecycle.lock().as_ref().map(|w| w.mode)
    }

    /// Join a worker that already signalled (or is about to signal) completion
    fn reap(&self, mut worker: Worker) {
        match worker.done_rx.recv_timeout(self.config.stop_timeout()) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = worker.handle.take() {
                    handle.join().ok();
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                self.force_release(worker.epoch);
                worker.handle.take();
            }
        }
        let mut current = self.current_run.write();
        if current
            .as_ref()
            .map(|run| Arc::ptr_eq(run, &worker.run))
            .unwrap_or(false)
        {
            *current = None;
        }
    }

    /// Release devices of the given worker from the control thread
    fn force_release(&self, epoch: u64) {
        let (source, sink) = take_active(&self.active, epoch);
        release_streams(source, sink);
        self.processor.release();
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn take_active(
    active: &Mutex<ActiveStreams>,
    epoch: u64,
) -> (Option<Arc<dyn Source>>, Option<Arc<dyn Sink>>) {
    let mut active = active.lock();
    if active.epoch != epoch {
        return (None, None);
    }
    (active.source.take(), active.sink.take())
}

/// Stop and release both devices; a failure on one never skips the other
fn release_streams(source: Option<Arc<dyn Source>>, sink: Option<Arc<dyn Sink>>) {
    if let Some(source) = source {
        let result = catch_unwind(AssertUnwindSafe(|| {
            if let Err(e) = source.stop() {
                log::warn!("[Stream] Source stop failed: {}", e);
            }
            source.release();
        }));
        if result.is_err() {
            log::error!("[Stream] Source release panicked");
        }
    }
    if let Some(sink) = sink {
        let result = catch_unwind(AssertUnwindSafe(|| {
            if let Err(e) = sink.stop() {
                log::warn!("[Stream] Sink stop failed: {}", e);
            }
            sink.release();
        }));
        if result.is_err() {
            log::error!("[Stream] Sink release panicked");
        }
    }
}

/// Open sink first, then source. On failure nothing stays open.
fn open_streams(ctx: &WorkerContext) -> RelayResult<(Arc<dyn Source>, Arc<dyn Sink>)> {
    let sink = ctx.backend.open_sink(&ctx.config)?;

    let source: RelayResult<Arc<dyn Source>> = match ctx.mode {
        StreamMode::Live => ctx.backend.open_source(&ctx.config),
        StreamMode::Test => Ok(Arc::new(PinkNoiseSource::new(ctx.config.sample_rate))),
    };
    match source {
        Ok(source) => Ok((source, sink)),
        Err(e) => {
            release_streams(None, Some(sink));
            Err(e)
        }
    }
}

fn run_worker(ctx: WorkerContext, ready_tx: Sender<RelayResult<()>>, done_tx: Sender<()>) {
    if let Err(e) = set_current_thread_priority(ThreadPriority::Max) {
        log::warn!("[Stream] Could not raise worker priority: {:?}", e);
    }

    let (source, sink) = match open_streams(&ctx) {
        Ok(opened) => opened,
        Err(e) => {
            ctx.run.store(false, Ordering::Release);
            ready_tx.send(Err(e)).ok();
            done_tx.send(()).ok();
            return;
        }
    };

    // publish for a concurrent forced stop, unless we were cancelled meanwhile
    {
        let mut active = ctx.active.lock();
        if !ctx.run.load(Ordering::Acquire) {
            drop(active);
            release_streams(Some(source), Some(sink));
            ready_tx
                .send(Err(RelayError::HardwareOpen("start cancelled".to_string())))
                .ok();
            done_tx.send(()).ok();
            return;
        }
        active.epoch = ctx.epoch;
        active.source = Some(Arc::clone(&source));
        active.sink = Some(Arc::clone(&sink));
    }

    ctx.processor
        .attach(source.session(), sink.session(), &ctx.processing);

    let started = sink.play().and_then(|_| source.start());
    if let Err(e) = started {
        ctx.run.store(false, Ordering::Release);
        cleanup(&ctx);
        ready_tx.send(Err(e)).ok();
        done_tx.send(()).ok();
        return;
    }
    ready_tx.send(Ok(())).ok();

    log::info!(
        "[Stream] Relaying {} -> {} ({} frames/block, sink buffer {} frames)",
        source.session(),
        sink.session(),
        ctx.config.block_frames,
        sink.buffer_size_frames()
    );

    let exit = catch_unwind(AssertUnwindSafe(|| {
        relay_loop(&ctx, source.as_ref(), sink.as_ref())
    }))
    .unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        LoopExit::Faulted(format!("streaming loop panicked: {}", message))
    });

    drop(source);
    drop(sink);
    ctx.run.store(false, Ordering::Release);
    cleanup(&ctx);

    if let LoopExit::Faulted(message) = exit {
        log::error!("[Stream] {}", message);
        ctx.events.error(message);
        ctx.events.emit(RelayEvent::StreamFaulted);
    } else {
        log::info!("[Stream] Worker finished");
    }
    done_tx.send(()).ok();
}

fn cleanup(ctx: &WorkerContext) {
    let (source, sink) = take_active(&ctx.active, ctx.epoch);
    let owned = source.is_some() || sink.is_some();
    release_streams(source, sink);
    // a forced stop already released everything of this epoch
    if owned {
        ctx.processor.release();
    }
}

/// The relay loop. Returns when the run flag clears or I/O keeps failing.
fn relay_loop(ctx: &WorkerContext, source: &dyn Source, sink: &dyn Sink) -> LoopExit {
    let frames = ctx.config.block_frames;
    let mut buffer = vec![0.0_f32; frames];
    let mut failures: u32 = 0;
    let mut last_error = String::new();

    while ctx.run.load(Ordering::Acquire) {
        let read = match source.read(&mut buffer) {
            Ok(0) => {
                last_error = "no frames captured".to_string();
                0
            }
            Ok(n) => n.min(frames),
            Err(e) if !e.is_transient() => {
                if !ctx.run.load(Ordering::Acquire) {
                    break;
                }
                return LoopExit::Faulted(format!("capture failed: {}", e));
            }
            Err(e) => {
                last_error = e.to_string();
                0
            }
        };
        if !ctx.run.load(Ordering::Acquire) {
            break;
        }
        if read == 0 {
            failures += 1;
            if failures >= MAX_CONSECUTIVE_IO_FAILURES {
                return LoopExit::Faulted(format!(
                    "capture failed {} times in a row: {}",
                    failures, last_error
                ));
            }
            std::thread::sleep(FAILURE_BACKOFF);
            continue;
        }

        let block = &mut buffer[..read];
        ctx.processor.process_capture(block, read);
        ctx.processor.apply(block, read);
        ctx.processor.process_render(block, read);

        let written = match sink.write(block) {
            Ok(n) if n >= read => n,
            Ok(n) => {
                last_error = format!("short write {}/{}", n, read);
                n
            }
            Err(e) if !e.is_transient() => {
                if !ctx.run.load(Ordering::Acquire) {
                    break;
                }
                return LoopExit::Faulted(format!("render failed: {}", e));
            }
            Err(e) => {
                last_error = e.to_string();
                0
            }
        };
        if !ctx.run.load(Ordering::Acquire) {
            break;
        }
        if written < read {
            failures += 1;
            if failures >= MAX_CONSECUTIVE_IO_FAILURES {
                return LoopExit::Faulted(format!(
                    "render failed {} times in a row: {}",
                    failures, last_error
                ));
            }
            if written == 0 {
                std::thread::sleep(FAILURE_BACKOFF);
            }
            continue;
        }
        failures = 0;
        last_error.clear();
    }
    LoopExit::Stopped
}
