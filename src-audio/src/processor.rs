// ============================================================================
// Effect Chain Processor
// ============================================================================
//
// Owns the per-session effect instances and the master gain.
//
// Threading:
// - attach/update_config/release: any control thread
// - apply/process_capture/process_render: the stream worker
//
// The worker only ever try_locks the instances; if a control thread holds
// the lock (attach/release in progress) the block passes through untouched.
// Gain and effect parameters are atomics, so config updates never block the
// audio thread.

use crate::config::{
    EQUALIZER_BAND_COUNT, MAX_MIC_GAIN_DB, MIN_MIC_GAIN_DB, ProcessingConfig, db_to_linear,
};
use crate::effects::{
    AtomicGain, ControlSnapshot, Effect, EffectControls, EffectFactory, EffectKind,
    db_to_millibels,
};
use crate::events::{EventBus, RelayEvent};
use crate::stream::SessionHandle;
use parking_lot::Mutex;
use std::sync::Arc;

/// Which effects the current attach could create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EffectAvailability {
    pub noise_suppression: bool,
    pub equalizer: bool,
    pub dynamics_processing: bool,
}

#[derive(Default)]
struct EffectInstances {
    attached: bool,
    source_session: SessionHandle,
    sink_session: SessionHandle,
    capture: Vec<Box<dyn Effect>>,
    render: Vec<Box<dyn Effect>>,
    seen_generation: u64,
    availability: EffectAvailability,
}

impl EffectInstances {
    /// Push new control values into every effect if they changed
    fn refresh(&mut self, controls: &EffectControls) {
        let generation = controls.generation();
        if generation == self.seen_generation {
            return;
        }
        let snapshot = controls.load();
        for effect in self.capture.iter_mut().chain(self.render.iter_mut()) {
            effect.update(&snapshot);
        }
        self.seen_generation = generation;
    }

    fn clear(&mut self) {
        self.capture.clear();
        self.render.clear();
        self.attached = false;
        self.source_session = SessionHandle::NONE;
        self.sink_session = SessionHandle::NONE;
        self.seen_generation = 0;
    }
}

/// Effect chain shared between the control flow and the stream worker
pub struct EffectChain {
    factory: Arc<dyn EffectFactory>,
    events: EventBus,
    sample_rate: u32,
    gain: AtomicGain,
    controls: EffectControls,
    instances: Mutex<EffectInstances>,
}

impl EffectChain {
    /// Create a processor
    ///
    /// # Arguments
    /// * `factory` - Source of effect instances
    /// * `events` - Where availability events are published
    /// * `sample_rate` - Stream sample rate used to initialize effects
    pub fn new(factory: Arc<dyn EffectFactory>, events: EventBus, sample_rate: u32) -> Self {
        Self {
            factory,
            events,
            sample_rate,
            gain: AtomicGain::default(),
            controls: EffectControls::new(),
            instances: Mutex::new(EffectInstances::default()),
        }
    }

    /// Bind effects to the given sessions.
    ///
    /// Attaching the same session pair again only pushes the config. A new
    /// pair tears down the previous instances and creates fresh ones; the
    /// availability of each optional effect is then announced once.
    pub fn attach(
        &self,
        source_session: SessionHandle,
        sink_session: SessionHandle,
        config: &ProcessingConfig,
    ) -> EffectAvailability {
        self.update_config(config);

        let mut instances = self.instances.lock();
        if instances.attached
            && instances.source_session == source_session
            && instances.sink_session == sink_session
        {
            return instances.availability;
        }

        instances.clear();
        // generation first: a store racing the build below bumps it again
        let generation = self.controls.generation();
        let snapshot = self.controls.load();

        let denoiser = self.create(EffectKind::Denoiser, source_session, &snapshot);
        let equalizer = self.create(EffectKind::Equalizer, sink_session, &snapshot);
        let limiter = self.create(EffectKind::Limiter, sink_session, &snapshot);

        let availability = EffectAvailability {
            noise_suppression: denoiser.is_some(),
            equalizer: equalizer.is_some(),
            dynamics_processing: limiter.is_some(),
        };

        instances.capture.extend(denoiser);
        instances.render.extend(equalizer);
        instances.render.extend(limiter);
        instances.source_session = source_session;
        instances.sink_session = sink_session;
        instances.seen_generation = generation;
        instances.availability = availability;
        instances.attached = true;
        drop(instances);

        log::info!(
            "[Processor] Attached to {} / {}: denoiser={} equalizer={} limiter={}",
            source_session,
            sink_session,
            availability.noise_suppression,
            availability.equalizer,
            availability.dynamics_processing
        );

        self.events.emit(RelayEvent::NoiseSuppressionAvailability(
            availability.noise_suppression,
        ));
        self.events.emit(RelayEvent::DynamicsProcessingAvailability(
            availability.dynamics_processing,
        ));

        availability
    }

    fn create(
        &self,
        kind: EffectKind,
        session: SessionHandle,
        snapshot: &ControlSnapshot,
    ) -> Option<Box<dyn Effect>> {
        if session.is_none() {
            log::info!("[Processor] No audio session for {}, skipping", kind.name());
            return None;
        }
        let created = match kind {
            EffectKind::Denoiser => self.factory.create_denoiser(session),
            EffectKind::Equalizer => self.factory.create_equalizer(session),
            EffectKind::Limiter => self.factory.create_limiter(session),
        };
        let mut effect = match created {
            Ok(effect) => effect,
            Err(e) => {
                log::warn!("[Processor] {} unavailable: {}", kind.name(), e);
                return None;
            }
        };
        if let Err(e) = effect.initialize(self.sample_rate) {
            log::warn!("[Processor] Failed to initialize {}: {}", kind.name(), e);
            return None;
        }
        effect.update(snapshot);
        Some(effect)
    }

    /// Multiply the first `frames` samples by the master gain.
    ///
    /// Real-time safe: one atomic load, no allocation, no lock.
    #[inline]
    pub fn apply(&self, buffer: &mut [f32], frames: usize) {
        let n = frames.min(buffer.len());
        self.gain.apply(&mut buffer[..n]);
    }

    /// Run capture-side effects (denoiser)
    pub fn process_capture(&self, buffer: &mut [f32], frames: usize) {
        let n = frames.min(buffer.len());
        if let Some(mut instances) = self.instances.try_lock() {
            instances.refresh(&self.controls);
            for effect in instances.capture.iter_mut() {
                effect.process_in_place(&mut buffer[..n]);
            }
        }
    }

    /// Run render-side effects (equalizer, limiter)
    pub fn process_render(&self, buffer: &mut [f32], frames: usize) {
        let n = frames.min(buffer.len());
        if let Some(mut instances) = self.instances.try_lock() {
            instances.refresh(&self.controls);
            for effect in instances.render.iter_mut() {
                effect.process_in_place(&mut buffer[..n]);
            }
        }
    }

    /// Push a new configuration. Out-of-range values are clamped.
    pub fn update_config(&self, config: &ProcessingConfig) {
        let min_gain = db_to_linear(MIN_MIC_GAIN_DB);
        let max_gain = db_to_linear(MAX_MIC_GAIN_DB);
        let gain = if config.gain.is_finite() {
            config.gain.clamp(min_gain, max_gain)
        } else {
            1.0
        };
        self.gain.set(gain);

        let (min_mb, max_mb) = self.factory.band_level_range();
        let mut band_levels_mb = [0; EQUALIZER_BAND_COUNT];
        for (level, db) in band_levels_mb.iter_mut().zip(config.equalizer_bands) {
            *level = db_to_millibels(db).clamp(min_mb, max_mb);
        }

        self.controls.store(&ControlSnapshot {
            noise_suppression: config.noise_suppression,
            dynamics_processing: config.dynamics_processing,
            band_levels_mb,
        });
    }

    /// Tear down all effect instances. Safe to call repeatedly.
    pub fn release(&self) {
        let mut instances = self.instances.lock();
        if instances.attached {
            log::info!(
                "[Processor] Releasing effects for {} / {}",
                instances.source_session,
                instances.sink_session
            );
        }
        instances.clear();
    }

    pub fn is_attached(&self) -> bool {
        self.instances.lock().attached
    }

    /// Availability recorded by the last attach
    pub fn availability(&self) -> EffectAvailability {
        self.instances.lock().availability
    }

    /// Current linear master gain
    pub fn gain(&self) -> f32 {
        self.gain.get()
    }

    /// Current effect controls, as the effects will see them
    pub fn controls(&self) -> ControlSnapshot {
        self.controls.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::SoftwareEffects;
    use crate::error::RelayResult;

    fn chain(factory: SoftwareEffects) -> (EffectChain, crossbeam::channel::Receiver<RelayEvent>) {
        let events = EventBus::new();
        let rx = events.subscribe();
        (EffectChain::new(Arc::new(factory), events, 44100), rx)
    }

    #[test]
    fn test_apply_gain() {
        let (chain, _rx) = chain(SoftwareEffects::new());
        chain.update_config(&ProcessingConfig {
            gain: db_to_linear(6.0),
            ..Default::default()
        });
        let mut buffer = vec![0.1_f32; 8];
        chain.apply(&mut buffer, 4);
        let expected = 0.1 * db_to_linear(6.0);
        assert!(buffer[..4].iter().all(|s| (s - expected).abs() < 1e-6));
        // frames beyond the count are untouched
        assert!(buffer[4..].iter().all(|s| *s == 0.1));
    }

    #[test]
    fn test_zero_db_identity() {
        let (chain, _rx) = chain(SoftwareEffects::new());
        chain.attach(SessionHandle::next(), SessionHandle::next(), &ProcessingConfig::default());
        let input: Vec<f32> = (0..256).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();
        let mut buffer = input.clone();
        chain.process_capture(&mut buffer, 256);
        chain.apply(&mut buffer, 256);
        chain.process_render(&mut buffer, 256);
        for (a, b) in buffer.iter().zip(&input) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_attach_emits_availability_once() {
        let (chain, rx) = chain(SoftwareEffects::new());
        let source = SessionHandle::next();
        let sink = SessionHandle::next();
        let cfg = ProcessingConfig::default();

        let availability = chain.attach(source, sink, &cfg);
        assert!(availability.noise_suppression);
        assert!(availability.dynamics_processing);
        assert_eq!(rx.try_recv().unwrap(), RelayEvent::NoiseSuppressionAvailability(true));
        assert_eq!(rx.try_recv().unwrap(), RelayEvent::DynamicsProcessingAvailability(true));

        // Same sessions: idempotent, no new events
        chain.attach(source, sink, &cfg);
        assert!(rx.try_recv().is_err());

        // New session: effects re-created, events again
        chain.attach(SessionHandle::next(), sink, &cfg);
        assert_eq!(rx.try_recv().unwrap(), RelayEvent::NoiseSuppressionAvailability(true));
        assert_eq!(rx.try_recv().unwrap(), RelayEvent::DynamicsProcessingAvailability(true));
    }

    #[test]
    fn test_none_session_means_no_denoiser() {
        let (chain, rx) = chain(SoftwareEffects::new());
        let availability =
            chain.attach(SessionHandle::NONE, SessionHandle::next(), &ProcessingConfig::default());
        assert!(!availability.noise_suppression);
        assert!(availability.equalizer);
        assert_eq!(rx.try_recv().unwrap(), RelayEvent::NoiseSuppressionAvailability(false));
    }

    #[test]
    fn test_unsupported_effect_continues() {
        let (chain, rx) = chain(SoftwareEffects::new().without(EffectKind::Limiter));
        let availability =
            chain.attach(SessionHandle::next(), SessionHandle::next(), &ProcessingConfig::default());
        assert!(availability.noise_suppression);
        assert!(!availability.dynamics_processing);
        assert_eq!(chain.availability(), availability);
        let events: Vec<_> = rx.try_iter().collect();
        assert!(events.contains(&RelayEvent::DynamicsProcessingAvailability(false)));
    }

    #[test]
    fn test_update_config_clamps() {
        let (chain, _rx) = chain(SoftwareEffects::new());
        chain.update_config(&ProcessingConfig {
            gain: 1000.0,
            equalizer_bands: [-40.0, 0.0, 5.0, 40.0, f32::NAN],
            ..Default::default()
        });
        assert!((chain.gain() - db_to_linear(MAX_MIC_GAIN_DB)).abs() < 1e-3);
        assert_eq!(chain.controls().band_levels_mb, [-1500, 0, 500, 1500, 0]);
    }

    #[test]
    fn test_release_is_idempotent() {
        let (chain, _rx) = chain(SoftwareEffects::new());
        chain.release();
        chain.attach(SessionHandle::next(), SessionHandle::next(), &ProcessingConfig::default());
        assert!(chain.is_attached());
        chain.release();
        chain.release();
        assert!(!chain.is_attached());
    }

    #[test]
    fn test_config_reaches_attached_effects() {
        let (chain, _rx) = chain(SoftwareEffects::new());
        chain.attach(SessionHandle::next(), SessionHandle::next(), &ProcessingConfig::default());
        chain.update_config(&ProcessingConfig {
            dynamics_processing: true,
            ..Default::default()
        });
        let mut buffer = vec![0.99_f32; 4410];
        chain.process_render(&mut buffer, 4410);
        assert!(buffer[4000] < 0.5, "limiter not engaged: {}", buffer[4000]);
    }

    /// Factory that changes the config while the chain builds its effects
    struct ReconfiguringFactory {
        inner: SoftwareEffects,
        chain: parking_lot::Mutex<Option<Arc<EffectChain>>>,
    }

    impl EffectFactory for ReconfiguringFactory {
        fn create_denoiser(&self, session: SessionHandle) -> RelayResult<Box<dyn Effect>> {
            if let Some(chain) = self.chain.lock().take() {
                chain.update_config(&ProcessingConfig {
                    dynamics_processing: true,
                    ..Default::default()
                });
            }
            self.inner.create_denoiser(session)
        }

        fn create_equalizer(&self, session: SessionHandle) -> RelayResult<Box<dyn Effect>> {
            self.inner.create_equalizer(session)
        }

        fn create_limiter(&self, session: SessionHandle) -> RelayResult<Box<dyn Effect>> {
            self.inner.create_limiter(session)
        }

        fn band_level_range(&self) -> (i32, i32) {
            self.inner.band_level_range()
        }
    }

    #[test]
    fn test_config_stored_during_attach_is_applied() {
        let factory = Arc::new(ReconfiguringFactory {
            inner: SoftwareEffects::new(),
            chain: parking_lot::Mutex::new(None),
        });
        let chain = Arc::new(EffectChain::new(
            Arc::clone(&factory) as Arc<dyn EffectFactory>,
            EventBus::new(),
            44100,
        ));
        *factory.chain.lock() = Some(Arc::clone(&chain));

        chain.attach(SessionHandle::next(), SessionHandle::next(), &ProcessingConfig::default());
        assert!(chain.controls().dynamics_processing);

        let mut buffer = vec![0.99_f32; 4410];
        chain.process_render(&mut buffer, 4410);
        assert!(buffer[4000] < 0.5, "limiter not engaged: {}", buffer[4000]);
    }
}
