// ============================================================================
// Relay Engine
// ============================================================================
//
// Owns the effect chain and the stream manager. Constructed explicitly and
// passed by handle; there is no global instance.

use crate::config::{EngineConfig, ProcessingConfig};
use crate::effects::EffectFactory;
use crate::error::RelayResult;
use crate::events::EventBus;
use crate::processor::{EffectAvailability, EffectChain};
use crate::stream::{AudioBackend, StreamManager, StreamMode};
use parking_lot::RwLock;
use std::sync::Arc;

pub struct Engine {
    processor: Arc<EffectChain>,
    streams: StreamManager,
    config: RwLock<ProcessingConfig>,
    engine_config: EngineConfig,
    events: EventBus,
}

impl Engine {
    /// Create an engine
    ///
    /// # Arguments
    /// * `backend` - Opens hardware sources and sinks
    /// * `factory` - Provides effect instances
    /// * `engine_config` - Hardware and lifecycle parameters
    /// * `events` - Bus for availability/error notifications
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        factory: Arc<dyn EffectFactory>,
        engine_config: EngineConfig,
        events: EventBus,
    ) -> Self {
        let processor = Arc::new(EffectChain::new(
            factory,
            events.clone(),
            engine_config.sample_rate,
        ));
        let streams = StreamManager::new(
            backend,
            Arc::clone(&processor),
            events.clone(),
            engine_config.clone(),
        );
        Self {
            processor,
            streams,
            config: RwLock::new(ProcessingConfig::default()),
            engine_config,
            events,
        }
    }

    /// Relay the microphone
    pub fn start(&self) -> RelayResult<()> {
        let config = *self.config.read();
        self.streams.start(StreamMode::Live, &config)
    }

    /// Relay pink noise instead of the microphone
    pub fn start_test(&self) -> RelayResult<()> {
        let config = *self.config.read();
        self.streams.start(StreamMode::Test, &config)
    }

    pub fn stop(&self) {
        self.streams.stop();
    }

    /// Replace the processing configuration; last write wins
    pub fn update_config(&self, config: ProcessingConfig) {
        *self.config.write() = config;
        self.streams.update_config(&config);
    }

    pub fn config(&self) -> ProcessingConfig {
        *self.config.read()
    }

    pub fn is_running(&self) -> bool {
        self.streams.is_running()
    }

    pub fn mode(&self) -> Option<StreamMode> {
        self.streams.mode()
    }

    pub fn availability(&self) -> EffectAvailability {
        self.processor.availability()
    }

    pub fn processor(&self) -> &Arc<EffectChain> {
        &self.processor
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine_config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}
