// ============================================================================
// Limiter
// ============================================================================
//
// Fixed-parameter peak limiter protecting the listener's ears.
//
// Parameters (not user adjustable):
// - threshold: -10 dB
// - attack: 1 ms, release: 60 ms
// - ratio: 10:1
// - post gain: 0 dB
//
// Output is finally clamped to [-1, 1].

use super::controls::ControlSnapshot;
use super::effect::{Effect, EffectInfo, EffectKind};
use crate::config::{DEFAULT_SAMPLE_RATE, db_to_linear};
use crate::error::RelayResult;
use crate::stream::SessionHandle;

pub const LIMITER_THRESHOLD_DB: f32 = -10.0;
pub const LIMITER_ATTACK_MS: f32 = 1.0;
pub const LIMITER_RELEASE_MS: f32 = 60.0;
pub const LIMITER_RATIO: f32 = 10.0;
pub const LIMITER_POST_GAIN_DB: f32 = 0.0;

pub struct Limiter {
    session: SessionHandle,
    sample_rate: u32,
    enabled: bool,
    /// Gain reduction in dB (positive)
    envelope_db: f32,
    attack_coeff: f32,
    release_coeff: f32,
    post_gain: f32,
}

impl Limiter {
    /// Create a limiter bound to a playback session
    pub fn new(session: SessionHandle) -> Self {
        let mut limiter = Self {
            session,
            sample_rate: DEFAULT_SAMPLE_RATE,
            enabled: false,
            envelope_db: 0.0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            post_gain: db_to_linear(LIMITER_POST_GAIN_DB),
        };
        limiter.update_coefficients();
        limiter
    }

    pub fn session(&self) -> SessionHandle {
        self.session
    }

    /// Current gain reduction in dB
    pub fn gain_reduction_db(&self) -> f32 {
        self.envelope_db
    }

    /// Calculate time coefficient for envelope follower
    fn time_to_coeff(time_ms: f32, sample_rate: u32) -> f32 {
        if time_ms <= 0.0 {
            0.0
        } else {
            (-1.0 / (time_ms * 0.001 * sample_rate as f32)).exp()
        }
    }

    fn update_coefficients(&mut self) {
        self.attack_coeff = Self::time_to_coeff(LIMITER_ATTACK_MS, self.sample_rate);
        self.release_coeff = Self::time_to_coeff(LIMITER_RELEASE_MS, self.sample_rate);
    }

    /// Static curve: reduction in dB for an input level
    fn target_reduction_db(input_db: f32) -> f32 {
        if input_db <= LIMITER_THRESHOLD_DB {
            0.0
        } else {
            (input_db - LIMITER_THRESHOLD_DB) * (1.0 - 1.0 / LIMITER_RATIO)
        }
    }
}

impl Effect for Limiter {
    fn info(&self) -> EffectInfo {
        EffectInfo {
            name: "Limiter".to_string(),
            description: "Peak limiter, -10 dB threshold at 10:1".to_string(),
        }
    }

    fn kind(&self) -> EffectKind {
        EffectKind::Limiter
    }

    fn initialize(&mut self, sample_rate: u32) -> RelayResult<()> {
        self.sample_rate = sample_rate;
        self.update_coefficients();
        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        self.envelope_db = 0.0;
    }

    fn update(&mut self, controls: &ControlSnapshot) {
        if self.enabled != controls.dynamics_processing {
            self.enabled = controls.dynamics_processing;
            self.reset();
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn process_in_place(&mut self, buffer: &mut [f32]) {
        if !self.enabled {
            return;
        }
        for sample in buffer.iter_mut() {
            let input_db = 20.0 * sample.abs().max(1e-10).log10();
            let target = Self::target_reduction_db(input_db);

            let coeff = if target > self.envelope_db {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope_db = target + coeff * (self.envelope_db - target);

            let gain = db_to_linear(-self.envelope_db) * self.post_gain;
            *sample = (*sample * gain).clamp(-1.0, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled() -> Limiter {
        let mut limiter = Limiter::new(SessionHandle::next());
        limiter.initialize(44100).unwrap();
        limiter.update(&ControlSnapshot {
            dynamics_processing: true,
            ..Default::default()
        });
        limiter
    }

    #[test]
    fn test_disabled_is_passthrough() {
        let mut limiter = Limiter::new(SessionHandle::next());
        let mut buffer = vec![0.9, -0.95, 0.2];
        let expected = buffer.clone();
        limiter.process_in_place(&mut buffer);
        assert_eq!(buffer, expected);
    }

    #[test]
    fn test_quiet_signal_untouched() {
        let mut limiter = enabled();
        // -20 dB, well under threshold
        let mut buffer = vec![0.1; 512];
        limiter.process_in_place(&mut buffer);
        for s in &buffer {
            assert!((s - 0.1).abs() < 1e-6);
        }
    }

    #[test]
    fn test_loud_signal_reduced() {
        let mut limiter = enabled();
        let mut buffer = vec![0.9; 4410];
        limiter.process_in_place(&mut buffer);
        // 0.9 is about -0.9 dB: 9.1 dB over threshold, reduced by ~8.2 dB
        let settled = buffer[4000];
        let settled_db = 20.0 * settled.log10();
        let expected_db = LIMITER_THRESHOLD_DB + (-0.915 - LIMITER_THRESHOLD_DB) / LIMITER_RATIO;
        assert!((settled_db - expected_db).abs() < 0.3, "settled at {} dB", settled_db);
        assert!(limiter.gain_reduction_db() > 7.0);
    }

    #[test]
    fn test_output_never_exceeds_full_scale() {
        let mut limiter = enabled();
        let mut buffer: Vec<f32> = (0..2048).map(|i| 3.0 * (i as f32 * 0.02).sin()).collect();
        limiter.process_in_place(&mut buffer);
        assert!(buffer.iter().all(|s| s.abs() <= 1.0));
    }
}
