// ============================================================================
// Five-band Equalizer
// ============================================================================
//
// Peaking filters at fixed centers (60 Hz .. 14 kHz), Q = 0.707.
// Levels arrive in millibels, the native unit of platform equalizers, and
// are clamped to the range the backend reports.

use super::biquad::{Biquad, BiquadCoefficients};
use super::controls::ControlSnapshot;
use super::effect::{Effect, EffectInfo, EffectKind};
use crate::config::{DEFAULT_SAMPLE_RATE, EQUALIZER_BAND_COUNT, EQUALIZER_CENTERS_HZ};
use crate::error::RelayResult;
use crate::stream::SessionHandle;

/// Valid band level range of the software equalizer, in millibels
pub const SOFTWARE_BAND_LEVEL_RANGE: (i32, i32) = (-1500, 1500);

const BAND_Q: f32 = 0.707;

/// Convert dB to millibels (rounded)
pub fn db_to_millibels(db: f32) -> i32 {
    if !db.is_finite() {
        return 0;
    }
    (db * 100.0).round() as i32
}

pub fn millibels_to_db(mb: i32) -> f32 {
    mb as f32 / 100.0
}

struct Band {
    center_hz: f32,
    level_mb: i32,
    filter: Biquad,
}

pub struct Equalizer {
    session: SessionHandle,
    sample_rate: u32,
    level_range: (i32, i32),
    bands: Vec<Band>,
}

impl Equalizer {
    /// Create an equalizer bound to a playback session
    ///
    /// # Arguments
    /// * `session` - Sink session the equalizer is attached to
    /// * `level_range` - Valid band level range in millibels (min, max)
    pub fn new(session: SessionHandle, level_range: (i32, i32)) -> Self {
        let bands = EQUALIZER_CENTERS_HZ
            .iter()
            .map(|&center_hz| Band {
                center_hz,
                level_mb: 0,
                filter: Biquad::default(),
            })
            .collect();
        Self {
            session,
            sample_rate: DEFAULT_SAMPLE_RATE,
            level_range,
            bands,
        }
    }

    pub fn session(&self) -> SessionHandle {
        self.session
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn band_level(&self, band: usize) -> Option<i32> {
        self.bands.get(band).map(|b| b.level_mb)
    }

    /// Set a band level; out-of-range values are clamped, unknown bands ignored
    pub fn set_band_level(&mut self, band: usize, level_mb: i32) {
        let (min, max) = self.level_range;
        let sample_rate = self.sample_rate as f32;
        let Some(b) = self.bands.get_mut(band) else {
            return;
        };
        let level = level_mb.clamp(min, max);
        if level == b.level_mb {
            return;
        }
        b.level_mb = level;
        let coeffs = if level == 0 || b.center_hz >= sample_rate * 0.5 {
            BiquadCoefficients::IDENTITY
        } else {
            BiquadCoefficients::peaking(b.center_hz, sample_rate, BAND_Q, millibels_to_db(level))
        };
        b.filter.set_coefficients(coeffs);
    }

    fn rebuild(&mut self) {
        // set_band_level skips unchanged levels, so zero them first
        let mut levels = [0; EQUALIZER_BAND_COUNT];
        for (band, level) in self.bands.iter_mut().zip(levels.iter_mut()) {
            *level = band.level_mb;
            band.level_mb = 0;
            band.filter = Biquad::default();
        }
        for (i, level) in levels.into_iter().enumerate() {
            self.set_band_level(i, level);
        }
    }
}

impl Effect for Equalizer {
    fn info(&self) -> EffectInfo {
        EffectInfo {
            name: "Equalizer".to_string(),
            description: format!("{}-band peaking equalizer", EQUALIZER_BAND_COUNT),
        }
    }

    fn kind(&self) -> EffectKind {
        EffectKind::Equalizer
    }

    fn initialize(&mut self, sample_rate: u32) -> RelayResult<()> {
        self.sample_rate = sample_rate;
        self.rebuild();
        Ok(())
    }

    fn reset(&mut self) {
        for band in &mut self.bands {
            band.filter.reset();
        }
    }

    fn update(&mut self, controls: &ControlSnapshot) {
        let count = self.bands.len().min(controls.band_levels_mb.len());
        for band in 0..count {
            self.set_band_level(band, controls.band_levels_mb[band]);
        }
    }

    fn is_enabled(&self) -> bool {
        self.bands.iter().any(|b| b.level_mb != 0)
    }

    fn process_in_place(&mut self, buffer: &mut [f32]) {
        for band in self.bands.iter_mut().filter(|b| b.level_mb != 0) {
            for sample in buffer.iter_mut() {
                *sample = band.filter.process(*sample);
            }
        }
    }
}
