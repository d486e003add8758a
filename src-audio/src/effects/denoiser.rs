// ============================================================================
// Denoiser
// ============================================================================
//
// Adaptive downward expander. Tracks a slow noise floor under a fast peak
// envelope and attenuates whatever stays within 3x of the floor.
//
// Constants:
// - envelope attack/release: 0.1 / 0.001 per sample
// - noise floor adaptation: 1e-4 per sample (10x slower while above floor)
// - expansion ratio 2:1, gain floor 0.1 (-20 dB)

use super::controls::ControlSnapshot;
use super::effect::{Effect, EffectInfo, EffectKind};
use crate::stream::SessionHandle;

const ATTACK_ALPHA: f32 = 0.1;
const RELEASE_ALPHA: f32 = 0.001;
const NOISE_ALPHA: f32 = 0.0001;
const EXPANDER_RATIO: f32 = 2.0;
const THRESHOLD_FACTOR: f32 = 3.0;
const MIN_GAIN: f32 = 0.1;
const INITIAL_NOISE_FLOOR: f32 = 0.01;

pub struct Denoiser {
    session: SessionHandle,
    enabled: bool,
    envelope: f32,
    noise_floor: f32,
}

impl Denoiser {
    /// Create a denoiser bound to a capture session
    pub fn new(session: SessionHandle) -> Self {
        Self {
            session,
            enabled: false,
            envelope: 0.0,
            noise_floor: INITIAL_NOISE_FLOOR,
        }
    }

    pub fn session(&self) -> SessionHandle {
        self.session
    }

    pub fn noise_floor(&self) -> f32 {
        self.noise_floor
    }

    #[inline]
    fn gain_for(&mut self, sample: f32) -> f32 {
        let level = sample.abs();
        let alpha = if level > self.envelope {
            ATTACK_ALPHA
        } else {
            RELEASE_ALPHA
        };
        self.envelope += alpha * (level - self.envelope);

        let adapt = if self.envelope < self.noise_floor {
            NOISE_ALPHA
        } else {
            NOISE_ALPHA * 0.1
        };
        self.noise_floor += adapt * (self.envelope - self.noise_floor);

        let threshold = self.noise_floor * THRESHOLD_FACTOR;
        if self.envelope < threshold {
            (self.envelope / (threshold + 1e-6))
                .powf(EXPANDER_RATIO - 1.0)
                .max(MIN_GAIN)
        } else {
            1.0
        }
    }
}

impl Effect for Denoiser {
    fn info(&self) -> EffectInfo {
        EffectInfo {
            name: "Denoiser".to_string(),
            description: "Adaptive expander attenuating the estimated noise floor".to_string(),
        }
    }

    fn kind(&self) -> EffectKind {
        EffectKind::Denoiser
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
        self.noise_floor = INITIAL_NOISE_FLOOR;
    }

    fn update(&mut self, controls: &ControlSnapshot) {
        if self.enabled != controls.noise_suppression {
            self.enabled = controls.noise_suppression;
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
            let gain = self.gain_for(*sample);
            *sample *= gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled() -> Denoiser {
        let mut d = Denoiser::new(SessionHandle::next());
        d.update(&ControlSnapshot {
            noise_suppression: true,
            ..Default::default()
        });
        d
    }

    #[test]
    fn test_disabled_is_passthrough() {
        let mut d = Denoiser::new(SessionHandle::next());
        let mut buffer = vec![0.001, -0.002, 0.5];
        let expected = buffer.clone();
        d.process_in_place(&mut buffer);
        assert_eq!(buffer, expected);
    }

    #[test]
    fn test_quiet_signal_attenuated() {
        let mut d = enabled();
        let mut buffer: Vec<f32> = (0..4410).map(|i| 0.002 * (i as f32 * 0.3).sin()).collect();
        let input_peak = buffer.iter().fold(0.0_f32, |m, x| m.max(x.abs()));
        d.process_in_place(&mut buffer);
        let tail_peak = buffer[4000..].iter().fold(0.0_f32, |m, x| m.max(x.abs()));
        assert!(tail_peak < input_peak * 0.5, "tail {} input {}", tail_peak, input_peak);
        // never below the gain floor
        assert!(tail_peak >= input_peak * MIN_GAIN * 0.5);
    }

    #[test]
    fn test_loud_signal_passes() {
        let mut d = enabled();
        let mut buffer: Vec<f32> = (0..4410).map(|i| 0.5 * (i as f32 * 0.05).sin()).collect();
        let input = buffer.clone();
        d.process_in_place(&mut buffer);
        let diff: f32 = buffer[2000..]
            .iter()
            .zip(&input[2000..])
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max);
        assert!(diff < 1e-6, "loud signal altered by {}", diff);
    }

    #[test]
    fn test_toggle_resets_state() {
        let mut d = enabled();
        let mut buffer = vec![0.3; 1000];
        d.process_in_place(&mut buffer);
        assert!(d.envelope > 0.0);
        d.update(&ControlSnapshot::default());
        assert_eq!(d.envelope, 0.0);
        assert_eq!(d.noise_floor(), INITIAL_NOISE_FLOOR);
    }
}
