// ============================================================================
// Orchestrator - Relay Lifecycle State Machine
// ============================================================================
//
// States: Idle <-> Streaming, Idle <-> TestStreaming.
//
// Transitions are serialized by one mutex. Starting a mode stops the other
// first. Wake lock and audio focus are held exactly while a mode is active;
// every path back to Idle releases them.

use crate::config::{ProcessingConfig, RelaySettings};
use crate::engine::Engine;
use crate::error::{RelayError, RelayResult};
use crate::events::{EventBus, RelayEvent, StateSignal, StreamState};
use crate::platform::{AudioFocus, PermissionGate, WakeLock};
use crate::router::{DeviceChange, DeviceDescriptor, DeviceRouter};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Platform services the orchestrator holds while relaying
#[derive(Clone)]
pub struct PlatformServices {
    pub wake_lock: Arc<dyn WakeLock>,
    pub audio_focus: Arc<dyn AudioFocus>,
    pub permissions: Arc<dyn PermissionGate>,
}

pub struct Orchestrator {
    engine: Arc<Engine>,
    router: Arc<DeviceRouter>,
    services: PlatformServices,
    events: EventBus,
    wake_lock_timeout: Duration,
    request_focus: bool,
    state: Mutex<StreamState>,
    is_streaming: StateSignal<bool>,
    is_test_mode: StateSignal<bool>,
    target_device_connected: StateSignal<bool>,
}

impl Orchestrator {
    pub fn new(engine: Arc<Engine>, router: Arc<DeviceRouter>, services: PlatformServices) -> Self {
        let events = engine.events().clone();
        let wake_lock_timeout = engine.engine_config().wake_lock_timeout();
        let request_focus = engine.engine_config().request_audio_focus;
        let target = router.target_available();
        Self {
            engine,
            router,
            services,
            events,
            wake_lock_timeout,
            request_focus,
            state: Mutex::new(StreamState::Idle),
            is_streaming: StateSignal::new(false),
            is_test_mode: StateSignal::new(false),
            target_device_connected: StateSignal::new(target),
        }
    }

    /// Relay the microphone to the target device
    pub fn start(&self) -> RelayResult<()> {
        let mut state = self.state.lock();
        self.start_locked(&mut state, StreamState::Streaming)
    }

    /// Relay pink noise to the target device
    pub fn start_test(&self) -> RelayResult<()> {
        let mut state = self.state.lock();
        self.start_locked(&mut state, StreamState::TestStreaming)
    }

    /// Stop whatever runs. Safe to call in any state.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        self.stop_locked(&mut state);
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock()
    }

    pub fn is_streaming(&self) -> &StateSignal<bool> {
        &self.is_streaming
    }

    pub fn is_test_mode(&self) -> &StateSignal<bool> {
        &self.is_test_mode
    }

    pub fn target_device_connected(&self) -> &StateSignal<bool> {
        &self.target_device_connected
    }

    pub fn router(&self) -> &Arc<DeviceRouter> {
        &self.router
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn on_devices_added(&self, added: &[DeviceDescriptor]) {
        self.router.devices_added(added);
        self.reevaluate_topology();
    }

    pub fn on_devices_removed(&self, removed: &[DeviceDescriptor]) {
        self.router.devices_removed(removed);
        self.reevaluate_topology();
    }

    pub fn on_device_change(&self, change: &DeviceChange) {
        match change {
            DeviceChange::Added(devices) => self.on_devices_added(devices),
            DeviceChange::Removed(devices) => self.on_devices_removed(devices),
        }
    }

    /// Audio ownership was revoked: stop emitting
    pub fn on_focus_lost(&self) {
        log::info!("[Orchestrator] Audio focus lost, stopping");
        self.stop();
    }

    /// The stream worker gave up; fall back to Idle and free resources
    pub fn on_stream_fault(&self) {
        let mut state = self.state.lock();
        if state.is_active() && !self.engine.is_running() {
            log::warn!("[Orchestrator] Stream faulted while {:?}", *state);
            self.stop_locked(&mut state);
        }
    }

    /// Periodic housekeeping: detect a dead worker and renew an expired
    /// wake lock while active
    pub fn tick(&self) {
        let mut state = self.state.lock();
        if !state.is_active() {
            return;
        }
        if !self.engine.is_running() {
            log::warn!("[Orchestrator] Worker no longer running, returning to Idle");
            self.stop_locked(&mut state);
            return;
        }
        if !self.services.wake_lock.is_held() {
            if let Err(e) = self.services.wake_lock.acquire(self.wake_lock_timeout) {
                log::warn!("[Orchestrator] Failed to renew wake lock: {}", e);
            }
        }
    }

    /// Apply new user settings: processing values and routing preference
    pub fn update_settings(&self, settings: &RelaySettings) {
        self.engine
            .update_config(ProcessingConfig::from_settings(settings));
        if self.router.primary_only() != settings.primary_device_only {
            self.router.set_primary_only(settings.primary_device_only);
            let available = self.refresh_target();
            let mut state = self.state.lock();
            if state.is_active() && !available {
                log::info!("[Orchestrator] No compatible device under the new policy, stopping");
                self.stop_locked(&mut state);
            }
        }
    }

    fn refresh_target(&self) -> bool {
        let available = self.router.target_available();
        self.target_device_connected.set(available);
        available
    }

    fn reevaluate_topology(&self) {
        let available = self.refresh_target();
        let mut state = self.state.lock();
        if !state.is_active() {
            return;
        }
        if !available {
            log::info!("[Orchestrator] Target device gone, stopping");
            self.stop_locked(&mut state);
            return;
        }
        let mode = *state;
        if mode == StreamState::Streaming && self.services.permissions.check().is_err() {
            log::warn!("[Orchestrator] Topology changed but permissions are missing, not restarting");
            return;
        }
        log::info!("[Orchestrator] Topology changed, restarting {:?}", mode);
        self.stop_locked(&mut state);
        if let Err(e) = self.start_locked(&mut state, mode) {
            log::error!("[Orchestrator] Restart failed: {}", e);
        }
    }

    fn start_locked(&self, state: &mut StreamState, target: StreamState) -> RelayResult<()> {
        if *state == target {
            if self.engine.is_running() {
                log::debug!("[Orchestrator] Already {:?}", target);
                return Ok(());
            }
            // worker died underneath us
            self.stop_locked(state);
        }
        if state.is_active() {
            log::info!("[Orchestrator] Switching {:?} -> {:?}", *state, target);
            self.stop_locked(state);
        }

        if let Err(e) = self.check_guards(target) {
            self.events.error(e.to_string());
            return Err(e);
        }

        if let Err(e) = self.services.wake_lock.acquire(self.wake_lock_timeout) {
            self.events.error(e.to_string());
            return Err(e);
        }
        if self.request_focus {
            if let Err(e) = self.services.audio_focus.request() {
                self.services.wake_lock.release();
                self.events.error(e.to_string());
                return Err(e);
            }
        }

        let started = match target {
            StreamState::TestStreaming => self.engine.start_test(),
            _ => self.engine.start(),
        };
        if let Err(e) = started {
            log::error!("[Orchestrator] Failed to start {:?}: {}", target, e);
            self.release_services();
            self.events.error(e.to_string());
            return Err(e);
        }

        self.set_state(state, target);
        Ok(())
    }

    fn check_guards(&self, target: StreamState) -> RelayResult<()> {
        if !self.refresh_target() {
            return Err(RelayError::NoCompatibleDevice);
        }
        if target == StreamState::Streaming {
            self.services.permissions.check()?;
        }
        Ok(())
    }

    fn stop_locked(&self, state: &mut StreamState) {
        self.engine.stop();
        self.release_services();
        self.set_state(state, StreamState::Idle);
    }

    fn release_services(&self) {
        self.services.audio_focus.abandon();
        self.services.wake_lock.release();
    }

    fn set_state(&self, state: &mut StreamState, next: StreamState) {
        let changed = *state != next;
        *state = next;
        self.is_streaming.set(next == StreamState::Streaming);
        self.is_test_mode.set(next == StreamState::TestStreaming);
        if changed {
            log::info!("[Orchestrator] State -> {:?}", next);
            self.events.emit(RelayEvent::StateChanged(next));
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}
