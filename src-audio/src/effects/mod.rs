// ============================================================================
// Effect Chain Building Blocks
// ============================================================================
//
// Mono, in-place DSP effects used by the relay processor.
//
// Architecture:
// - Effect trait: in-place processing with shared control snapshot
// - EffectControls: lock-free parameters written by the control thread
// - EffectFactory: creates effect instances bound to audio sessions
//
// Insertion points mirror the hardware:
// - capture side (source session): denoiser
// - render side (sink session): equalizer, limiter

mod biquad;
mod controls;
mod denoiser;
mod effect;
mod equalizer;
mod factory;
mod gain;
mod limiter;

pub use biquad::{Biquad, BiquadCoefficients};
pub use controls::{ControlSnapshot, EffectControls};
pub use denoiser::Denoiser;
pub use effect::{Effect, EffectInfo, EffectKind};
pub use equalizer::{Equalizer, SOFTWARE_BAND_LEVEL_RANGE, db_to_millibels, millibels_to_db};
pub use factory::{EffectFactory, SoftwareEffects};
pub use gain::AtomicGain;
pub use limiter::{
    LIMITER_ATTACK_MS, LIMITER_POST_GAIN_DB, LIMITER_RATIO, LIMITER_RELEASE_MS,
    LIMITER_THRESHOLD_DB, Limiter,
};
