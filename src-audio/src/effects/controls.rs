// ============================================================================
// Effect Controls
// ============================================================================
//
// Written from any thread, read by the audio thread once per block.
// Every field is an atomic; a generation counter tells the reader when to
// refresh its effects.

use crate::config::EQUALIZER_BAND_COUNT;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

/// Plain copy of the controls, handed to `Effect::update`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlSnapshot {
    pub noise_suppression: bool,
    pub dynamics_processing: bool,
    /// Band levels in millibels, already clamped to the backend range
    pub band_levels_mb: [i32; EQUALIZER_BAND_COUNT],
}

/// Lock-free effect parameters
pub struct EffectControls {
    noise_suppression: AtomicBool,
    dynamics_processing: AtomicBool,
    band_levels_mb: [AtomicI32; EQUALIZER_BAND_COUNT],
    generation: AtomicU64,
}

impl Default for EffectControls {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectControls {
    pub fn new() -> Self {
        Self {
            noise_suppression: AtomicBool::new(false),
            dynamics_processing: AtomicBool::new(false),
            band_levels_mb: std::array::from_fn(|_| AtomicI32::new(0)),
            generation: AtomicU64::new(1),
        }
    }

    /// Store a new snapshot and bump the generation
    pub fn store(&self, snapshot: &ControlSnapshot) {
        self.noise_suppression
            .store(snapshot.noise_suppression, Ordering::Relaxed);
        self.dynamics_processing
            .store(snapshot.dynamics_processing, Ordering::Relaxed);
        for (slot, level) in self.band_levels_mb.iter().zip(snapshot.band_levels_mb) {
            slot.store(level, Ordering::Relaxed);
        }
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Read the current values.
    ///
    /// Fields are read individually; a concurrent `store` may be observed
    /// partially, and the next generation bump repairs it on the next block.
    pub fn load(&self) -> ControlSnapshot {
        ControlSnapshot {
            noise_suppression: self.noise_suppression.load(Ordering::Relaxed),
            dynamics_processing: self.dynamics_processing.load(Ordering::Relaxed),
            band_levels_mb: std::array::from_fn(|i| self.band_levels_mb[i].load(Ordering::Relaxed)),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}
