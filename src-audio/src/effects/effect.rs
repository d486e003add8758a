// ============================================================================
// Effect Trait Definition
// ============================================================================

use super::controls::ControlSnapshot;
use crate::error::RelayResult;

/// Effect categories the processor knows how to insert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    Denoiser,
    Equalizer,
    Limiter,
}

impl EffectKind {
    pub fn name(&self) -> &'static str {
        match self {
            EffectKind::Denoiser => "denoiser",
            EffectKind::Equalizer => "equalizer",
            EffectKind::Limiter => "limiter",
        }
    }
}

/// Information about an effect
#[derive(Debug, Clone)]
pub struct EffectInfo {
    pub name: String,
    pub description: String,
}

/// Mono in-place effect.
///
/// All methods except `update` and `process_in_place` are called from the
/// control thread while the audio thread is locked out. `process_in_place`
/// runs on the audio thread and must not allocate.
pub trait Effect: Send {
    /// Get effect information
    fn info(&self) -> EffectInfo;

    /// Which slot of the chain this effect fills
    fn kind(&self) -> EffectKind;

    /// Prepare internal state for the given sample rate
    fn initialize(&mut self, sample_rate: u32) -> RelayResult<()> {
        let _ = sample_rate;
        Ok(())
    }

    /// Clear filter/envelope state
    fn reset(&mut self) {}

    /// Pick up new control values. Called before a block whenever the
    /// controls changed since the previous block.
    fn update(&mut self, controls: &ControlSnapshot);

    /// Whether the effect currently alters the signal
    fn is_enabled(&self) -> bool;

    /// Process samples in place
    fn process_in_place(&mut self, buffer: &mut [f32]);

    /// Processing latency in samples
    fn latency_samples(&self) -> usize {
        0
    }
}
