// ============================================================================
// Pink Noise Test Source
// ============================================================================
//
// Synthetic source for checking the output path without a microphone.
// Paul Kellett's refined filter: seven one-pole states driven by white
// noise, summed and scaled by 0.11. State is zeroed on every start().
// There is no audio session behind it, so it reports SessionHandle::NONE.

use super::io::Source;
use super::session::SessionHandle;
use crate::error::{RelayError, RelayResult};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Output scale bringing the filter sum roughly into [-1, 1]
pub const PINK_NOISE_GAIN: f32 = 0.11;

/// Kellett pink noise filter
#[derive(Debug, Clone, Default)]
pub struct PinkNoiseFilter {
    b: [f32; 7],
}

impl PinkNoiseFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.b = [0.0; 7];
    }

    pub fn state(&self) -> &[f32; 7] {
        &self.b
    }

    /// Filter one white noise sample in [-1, 1]
    #[inline]
    pub fn next(&mut self, white: f32) -> f32 {
        let b = &mut self.b;
        b[0] = 0.99886 * b[0] + white * 0.0555179;
        b[1] = 0.99332 * b[1] + white * 0.0750759;
        b[2] = 0.96900 * b[2] + white * 0.1538520;
        b[3] = 0.86650 * b[3] + white * 0.3104856;
        b[4] = 0.55000 * b[4] + white * 0.5329522;
        b[5] = -0.7616 * b[5] - white * 0.0168980;
        let pink = b[0] + b[1] + b[2] + b[3] + b[4] + b[5] + b[6] + white * 0.5362;
        b[6] = white * 0.115926;
        pink * PINK_NOISE_GAIN
    }
}

struct GeneratorState {
    filter: PinkNoiseFilter,
    rng: StdRng,
    next_deadline: Option<Instant>,
}

/// Pink noise `Source`, paced to the stream sample rate
pub struct PinkNoiseSource {
    sample_rate: u32,
    paced: bool,
    state: Mutex<GeneratorState>,
    released: AtomicBool,
}

impl PinkNoiseSource {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_rng(sample_rate, StdRng::from_os_rng())
    }

    /// Deterministic generator
    pub fn with_seed(sample_rate: u32, seed: u64) -> Self {
        Self::with_rng(sample_rate, StdRng::seed_from_u64(seed))
    }

    fn with_rng(sample_rate: u32, rng: StdRng) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            paced: true,
            state: Mutex::new(GeneratorState {
                filter: PinkNoiseFilter::new(),
                rng,
                next_deadline: None,
            }),
            released: AtomicBool::new(false),
        }
    }

    /// Generate as fast as asked instead of in real time
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    pub fn filter_state(&self) -> [f32; 7] {
        *self.state.lock().filter.state()
    }
}

impl Source for PinkNoiseSource {
    fn start(&self) -> RelayResult<()> {
        let mut state = self.state.lock();
        state.filter.reset();
        state.next_deadline = Some(Instant::now());
        Ok(())
    }

    fn stop(&self) -> RelayResult<()> {
        self.state.lock().next_deadline = None;
        Ok(())
    }

    fn release(&self) {
        self.released.store(true, Ordering::Release);
    }

    fn read(&self, buffer: &mut [f32]) -> RelayResult<usize> {
        if self.released.load(Ordering::Acquire) {
            return Err(RelayError::TransientIo("pink noise source released".to_string()));
        }

        let deadline = {
            let mut state = self.state.lock();
            let GeneratorState { filter, rng, next_deadline } = &mut *state;
            for sample in buffer.iter_mut() {
                let white: f32 = rng.random_range(-1.0..1.0);
                *sample = filter.next(white);
            }
            let block = Duration::from_secs_f64(buffer.len() as f64 / self.sample_rate as f64);
            next_deadline.map(|d| {
                let next = d + block;
                *next_deadline = Some(next);
                next
            })
        };

        if self.paced {
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if deadline > now {
                    std::thread::sleep(deadline - now);
                }
            }
        }
        Ok(buffer.len())
    }

    fn session(&self) -> SessionHandle {
        SessionHandle::NONE
    }
}
