// ============================================================================
// Atomic Gain
// ============================================================================
//
// Linear gain shared between the control thread and the audio thread.
// Stored as f32 bits in an AtomicU32: readers see the old or the new value,
// never a torn one.

use std::sync::atomic::{AtomicU32, Ordering};

pub struct AtomicGain {
    bits: AtomicU32,
}

impl AtomicGain {
    /// Create with a linear gain
    pub fn new(linear: f32) -> Self {
        Self {
            bits: AtomicU32::new(linear.to_bits()),
        }
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(&self, linear: f32) {
        self.bits.store(linear.to_bits(), Ordering::Relaxed);
    }

    /// Multiply samples by the current gain, reading the atomic once
    #[inline]
    pub fn apply(&self, buffer: &mut [f32]) {
        let gain = self.get();
        if gain == 1.0 {
            return;
        }
        for sample in buffer.iter_mut() {
            *sample *= gain;
        }
    }
}

impl Default for AtomicGain {
    fn default() -> Self {
        Self::new(1.0)
    }
}
