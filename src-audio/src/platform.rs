// ============================================================================
// Platform Services
// ============================================================================
//
// Resources the orchestrator must hold while relaying: a CPU wake lock,
// exclusive audio focus and runtime permissions. On a desktop these are
// in-process bookkeeping; mobile front ends plug in their own implementations.

use crate::error::{RelayError, RelayResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Keeps the CPU awake while relaying
pub trait WakeLock: Send + Sync {
    /// Acquire for at most `timeout`
    fn acquire(&self, timeout: Duration) -> RelayResult<()>;

    /// Release; no-op when not held
    fn release(&self);

    fn is_held(&self) -> bool;
}

/// Exclusive ownership of audio output
pub trait AudioFocus: Send + Sync {
    fn request(&self) -> RelayResult<()>;

    /// Give focus back; no-op when not held
    fn abandon(&self);

    fn has_focus(&self) -> bool;
}

/// Runtime permissions required for live relaying
pub trait PermissionGate: Send + Sync {
    /// Microphone capture
    fn can_record(&self) -> bool;

    /// Access to connected output devices (e.g. Bluetooth)
    fn can_use_devices(&self) -> bool;

    fn check(&self) -> RelayResult<()> {
        if !self.can_record() {
            return Err(RelayError::PermissionDenied("microphone".to_string()));
        }
        if !self.can_use_devices() {
            return Err(RelayError::PermissionDenied("output devices".to_string()));
        }
        Ok(())
    }
}

/// Wake lock that expires on its own after the requested timeout
#[derive(Default)]
pub struct TimedWakeLock {
    deadline: Mutex<Option<Instant>>,
    acquisitions: AtomicU64,
}

impl TimedWakeLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times the lock was acquired
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }
}

impl WakeLock for TimedWakeLock {
    fn acquire(&self, timeout: Duration) -> RelayResult<()> {
        *self.deadline.lock() = Some(Instant::now() + timeout);
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        log::debug!("[Platform] Wake lock acquired for {:?}", timeout);
        Ok(())
    }

    fn release(&self) {
        if self.deadline.lock().take().is_some() {
            log::debug!("[Platform] Wake lock released");
        }
    }

    fn is_held(&self) -> bool {
        self.deadline
            .lock()
            .map(|deadline| Instant::now() < deadline)
            .unwrap_or(false)
    }
}

/// In-process audio focus holder
#[derive(Default)]
pub struct ExclusiveAudioFocus {
    held: AtomicBool,
}

impl ExclusiveAudioFocus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioFocus for ExclusiveAudioFocus {
    fn request(&self) -> RelayResult<()> {
        self.held.store(true, Ordering::Release);
        Ok(())
    }

    fn abandon(&self) {
        self.held.store(false, Ordering::Release);
    }

    fn has_focus(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Fixed, adjustable permission grants
pub struct StaticPermissions {
    record: AtomicBool,
    devices: AtomicBool,
}

impl StaticPermissions {
    pub fn granted() -> Self {
        Self::new(true, true)
    }

    pub fn new(record: bool, devices: bool) -> Self {
        Self {
            record: AtomicBool::new(record),
            devices: AtomicBool::new(devices),
        }
    }

    pub fn set_record(&self, granted: bool) {
        self.record.store(granted, Ordering::Release);
    }

    pub fn set_devices(&self, granted: bool) {
        self.devices.store(granted, Ordering::Release);
    }
}

impl PermissionGate for StaticPermissions {
    fn can_record(&self) -> bool {
        self.record.load(Ordering::Acquire)
    }

    fn can_use_devices(&self) -> bool {
        self.devices.load(Ordering::Acquire)
    }
}
