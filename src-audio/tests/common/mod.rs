// In-memory audio doubles shared by the integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use relay_audio::{
    AudioBackend, EngineConfig, RelayError, RelayResult, SessionHandle, Sink, Source,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Pause inside every read so the relay loop does not spin
const READ_PACING: Duration = Duration::from_millis(1);

/// How long a slow sink takes to open
pub const SLOW_OPEN_DELAY: Duration = Duration::from_millis(300);

/// Switches the tests flip to inject failures
#[derive(Default)]
pub struct Faults {
    pub fail_sink_open: AtomicBool,
    pub fail_source_open: AtomicBool,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    /// Reads block until the source is released, ignoring the run flag
    pub hang_reads: AtomicBool,
    /// Opening the sink takes `SLOW_OPEN_DELAY`
    pub slow_sink_open: AtomicBool,
    /// Reads fail with a device error instead of a transient one
    pub disconnect_source: AtomicBool,
}

impl Faults {
    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }
}

/// Plays back a fixed buffer, then silence
pub struct MemorySource {
    session: SessionHandle,
    faults: Arc<Faults>,
    samples: Mutex<VecDeque<f32>>,
    started: AtomicBool,
    released: AtomicBool,
}

impl MemorySource {
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

impl Source for MemorySource {
    fn start(&self) -> RelayResult<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> RelayResult<()> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    fn read(&self, buffer: &mut [f32]) -> RelayResult<usize> {
        while self.faults.hang_reads.load(Ordering::SeqCst) && !self.is_released() {
            std::thread::sleep(READ_PACING);
        }
        if self.is_released() {
            return Err(RelayError::TransientIo("source released".to_string()));
        }
        if self.faults.disconnect_source.load(Ordering::SeqCst) {
            return Err(RelayError::Device("microphone disconnected".to_string()));
        }
        if self.faults.fail_reads.load(Ordering::SeqCst) {
            return Err(RelayError::TransientIo("injected read failure".to_string()));
        }
        std::thread::sleep(READ_PACING);
        let mut samples = self.samples.lock();
        for slot in buffer.iter_mut() {
            *slot = samples.pop_front().unwrap_or(0.0);
        }
        Ok(buffer.len())
    }

    fn session(&self) -> SessionHandle {
        self.session
    }
}

/// Records everything written to it
pub struct MemorySink {
    session: SessionHandle,
    faults: Arc<Faults>,
    written: Mutex<Vec<f32>>,
    playing: AtomicBool,
    released: AtomicBool,
    buffer_frames: usize,
}

impl MemorySink {
    pub fn written(&self) -> Vec<f32> {
        self.written.lock().clone()
    }

    pub fn written_len(&self) -> usize {
        self.written.lock().len()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

impl Sink for MemorySink {
    fn play(&self) -> RelayResult<()> {
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> RelayResult<()> {
        self.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    fn write(&self, buffer: &[f32]) -> RelayResult<usize> {
        if self.is_released() {
            return Err(RelayError::TransientIo("sink released".to_string()));
        }
        if self.faults.fail_writes.load(Ordering::SeqCst) {
            return Err(RelayError::TransientIo("injected write failure".to_string()));
        }
        self.written.lock().extend_from_slice(buffer);
        Ok(buffer.len())
    }

    fn buffer_size_frames(&self) -> usize {
        self.buffer_frames
    }

    fn session(&self) -> SessionHandle {
        self.session
    }
}

/// Backend handing out memory devices and remembering each one
#[derive(Default)]
pub struct MemoryBackend {
    pub faults: Arc<Faults>,
    input: Mutex<Vec<f32>>,
    sources: Mutex<Vec<Arc<MemorySource>>>,
    sinks: Mutex<Vec<Arc<MemorySink>>>,
    sink_open_attempts: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every opened source plays these samples first
    pub fn with_input(samples: Vec<f32>) -> Arc<Self> {
        let backend = Self::default();
        *backend.input.lock() = samples;
        Arc::new(backend)
    }

    pub fn source_opens(&self) -> usize {
        self.sources.lock().len()
    }

    pub fn sink_opens(&self) -> usize {
        self.sinks.lock().len()
    }

    /// Calls to open_sink, including ones still in progress or failed
    pub fn sink_open_attempts(&self) -> usize {
        self.sink_open_attempts.load(Ordering::SeqCst)
    }

    pub fn last_source(&self) -> Option<Arc<MemorySource>> {
        self.sources.lock().last().cloned()
    }

    pub fn last_sink(&self) -> Option<Arc<MemorySink>> {
        self.sinks.lock().last().cloned()
    }
}

impl AudioBackend for MemoryBackend {
    fn open_source(&self, _config: &EngineConfig) -> RelayResult<Arc<dyn Source>> {
        if self.faults.fail_source_open.load(Ordering::SeqCst) {
            return Err(RelayError::HardwareOpen("microphone unavailable".to_string()));
        }
        let source = Arc::new(MemorySource {
            session: SessionHandle::next(),
            faults: Arc::clone(&self.faults),
            samples: Mutex::new(self.input.lock().iter().copied().collect()),
            started: AtomicBool::new(false),
            released: AtomicBool::new(false),
        });
        self.sources.lock().push(Arc::clone(&source));
        Ok(source)
    }

    fn open_sink(&self, config: &EngineConfig) -> RelayResult<Arc<dyn Sink>> {
        self.sink_open_attempts.fetch_add(1, Ordering::SeqCst);
        if self.faults.slow_sink_open.load(Ordering::SeqCst) {
            std::thread::sleep(SLOW_OPEN_DELAY);
        }
        if self.faults.fail_sink_open.load(Ordering::SeqCst) {
            return Err(RelayError::HardwareOpen("output device unavailable".to_string()));
        }
        let sink = Arc::new(MemorySink {
            session: SessionHandle::next(),
            faults: Arc::clone(&self.faults),
            written: Mutex::new(Vec::new()),
            playing: AtomicBool::new(false),
            released: AtomicBool::new(false),
            buffer_frames: config.sink_buffer_frames(),
        });
        self.sinks.lock().push(Arc::clone(&sink));
        Ok(sink)
    }
}

/// Small blocks and short timeouts keep the tests fast
pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        sample_rate: 48000,
        block_frames: 256,
        stop_timeout_ms: 200,
        ..EngineConfig::default()
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Ramp in [-0.5, 0.5), easy to compare sample by sample
pub fn ramp(len: usize) -> Vec<f32> {
    (0..len).map(|i| i as f32 / len as f32 - 0.5).collect()
}
