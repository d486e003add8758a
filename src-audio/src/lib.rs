// ============================================================================
// Relay Audio - Assistive Listening Relay
// ============================================================================
//
// Captures the microphone, runs it through denoiser, equalizer, limiter and
// gain, and renders it on a hearing aid or headset in real time.

use std::sync::Once;

pub mod config;
pub use config::{
    EQUALIZER_BAND_COUNT, EQUALIZER_CENTERS_HZ, EQUALIZER_LABELS, EngineConfig, ProcessingConfig,
    RelaySettings, db_to_linear, linear_to_db,
};

pub mod config_watcher;
pub use config_watcher::{SettingsEvent, SettingsWatcher};

pub mod effects;
pub use effects::{Effect, EffectFactory, EffectKind, SoftwareEffects};

pub mod engine;
pub use engine::Engine;

pub mod error;
pub use error::{RelayError, RelayResult};

pub mod events;
pub use events::{EventBus, RelayEvent, StateSignal, StreamState};

pub mod orchestrator;
pub use orchestrator::{Orchestrator, PlatformServices};

pub mod platform;
pub use platform::{
    AudioFocus, ExclusiveAudioFocus, PermissionGate, StaticPermissions, TimedWakeLock, WakeLock,
};

pub mod processor;
pub use processor::{EffectAvailability, EffectChain};

pub mod router;
pub use router::{
    CompatibilityPolicy, DeviceChange, DeviceDescriptor, DeviceKind, DeviceRouter, DeviceWatcher,
};

pub mod stream;
pub use stream::{
    AudioBackend, CpalBackend, PinkNoiseSource, SessionHandle, Sink, Source, StreamManager,
    StreamMode,
};

pub const RELAY_VERSION: &str = env!("CARGO_PKG_VERSION");

static INIT: Once = Once::new();

/// Initialize logging; RUST_LOG overrides the default filter
pub fn init_logging() {
    INIT.call_once(|| {
        let env = env_logger::Env::default().default_filter_or("relay_audio=info,relay=info");
        env_logger::Builder::from_env(env).init();
        log::info!("Relay audio v{} starting", RELAY_VERSION);
    });
}
