// ============================================================================
// Effect Factory
// ============================================================================
//
// Seam between the processor and whatever provides effect implementations.
// A factory may not support every effect; the processor then runs without
// it and reports the effect as unavailable.

use super::denoiser::Denoiser;
use super::effect::{Effect, EffectKind};
use super::equalizer::{Equalizer, SOFTWARE_BAND_LEVEL_RANGE};
use super::limiter::Limiter;
use crate::error::{RelayError, RelayResult};
use crate::stream::SessionHandle;
use std::collections::HashSet;

/// Creates effect instances bound to audio sessions
pub trait EffectFactory: Send + Sync {
    /// Denoiser inserted on the capture session
    fn create_denoiser(&self, session: SessionHandle) -> RelayResult<Box<dyn Effect>>;

    /// Equalizer inserted on the playback session
    fn create_equalizer(&self, session: SessionHandle) -> RelayResult<Box<dyn Effect>>;

    /// Limiter inserted on the playback session
    fn create_limiter(&self, session: SessionHandle) -> RelayResult<Box<dyn Effect>>;

    /// Valid equalizer band level range in millibels (min, max)
    fn band_level_range(&self) -> (i32, i32);
}

/// In-process DSP implementation of every effect
#[derive(Debug, Clone, Default)]
pub struct SoftwareEffects {
    unsupported: HashSet<EffectKind>,
}

impl SoftwareEffects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `kind` as unsupported, as a platform lacking it would
    pub fn without(mut self, kind: EffectKind) -> Self {
        self.unsupported.insert(kind);
        self
    }

    fn check(&self, kind: EffectKind, session: SessionHandle) -> RelayResult<()> {
        if self.unsupported.contains(&kind) {
            return Err(RelayError::EffectUnavailable(format!(
                "{} not supported",
                kind.name()
            )));
        }
        if session.is_none() {
            return Err(RelayError::EffectUnavailable(format!(
                "{} needs an audio session",
                kind.name()
            )));
        }
        Ok(())
    }
}

impl EffectFactory for SoftwareEffects {
    fn create_denoiser(&self, session: SessionHandle) -> RelayResult<Box<dyn Effect>> {
        self.check(EffectKind::Denoiser, session)?;
        Ok(Box::new(Denoiser::new(session)))
    }

    fn create_equalizer(&self, session: SessionHandle) -> RelayResult<Box<dyn Effect>> {
        self.check(EffectKind::Equalizer, session)?;
        Ok(Box::new(Equalizer::new(session, self.band_level_range())))
    }

    fn create_limiter(&self, session: SessionHandle) -> RelayResult<Box<dyn Effect>> {
        self.check(EffectKind::Limiter, session)?;
        Ok(Box::new(Limiter::new(session)))
    }

    fn band_level_range(&self) -> (i32, i32) {
        SOFTWARE_BAND_LEVEL_RANGE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_software_effects_create_all() {
        let factory = SoftwareEffects::new();
        let session = SessionHandle::next();
        assert_eq!(factory.create_denoiser(session).unwrap().kind(), EffectKind::Denoiser);
        assert_eq!(factory.create_equalizer(session).unwrap().kind(), EffectKind::Equalizer);
        assert_eq!(factory.create_limiter(session).unwrap().kind(), EffectKind::Limiter);
    }

    #[test]
    fn test_none_session_is_unavailable() {
        let factory = SoftwareEffects::new();
        let err = factory.create_denoiser(SessionHandle::NONE).err().unwrap();
        assert!(matches!(err, RelayError::EffectUnavailable(_)));
    }

    #[test]
    fn test_without_marks_unsupported() {
        let factory = SoftwareEffects::new().without(EffectKind::Limiter);
        assert!(factory.create_limiter(SessionHandle::next()).is_err());
        assert!(factory.create_equalizer(SessionHandle::next()).is_ok());
    }
}
