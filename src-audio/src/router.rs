// ============================================================================
// Device Router
// ============================================================================
//
// Tracks attached output devices and reduces them, through a swappable
// compatibility policy, to one answer: is a relay target connected?
//
// DeviceWatcher turns periodic enumeration into added/removed events, the
// topology observer the orchestrator subscribes to.

use crate::error::{RelayError, RelayResult};
use cpal::traits::{DeviceTrait, HostTrait};
use crossbeam::channel::{Receiver, Sender, unbounded};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Output device classes relevant to routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceKind {
    HearingAid,
    WiredHeadset,
    WiredHeadphones,
    UsbHeadset,
    BluetoothA2dp,
    BleHeadset,
    BluetoothSco,
    BuiltinSpeaker,
    Other,
}

impl DeviceKind {
    /// Guess the class from a device name
    pub fn infer(name: &str) -> Self {
        let lower = name.to_lowercase();
        let tokens: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        let has_token = |t: &str| tokens.contains(&t);

        if lower.contains("hearing") {
            DeviceKind::HearingAid
        } else if lower.contains("hands-free") || has_token("handsfree") || has_token("sco") {
            DeviceKind::BluetoothSco
        } else if lower.contains("le audio") || has_token("ble") {
            DeviceKind::BleHeadset
        } else if lower.contains("bluetooth") || has_token("a2dp") || lower.contains("airpods") {
            DeviceKind::BluetoothA2dp
        } else if has_token("usb") {
            DeviceKind::UsbHeadset
        } else if lower.contains("headset") {
            DeviceKind::WiredHeadset
        } else if lower.contains("headphone") {
            DeviceKind::WiredHeadphones
        } else if lower.contains("speaker") {
            DeviceKind::BuiltinSpeaker
        } else {
            DeviceKind::Other
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceKind::HearingAid => "hearing aid",
            DeviceKind::WiredHeadset => "wired headset",
            DeviceKind::WiredHeadphones => "wired headphones",
            DeviceKind::UsbHeadset => "usb headset",
            DeviceKind::BluetoothA2dp => "bluetooth a2dp",
            DeviceKind::BleHeadset => "ble headset",
            DeviceKind::BluetoothSco => "bluetooth sco",
            DeviceKind::BuiltinSpeaker => "speaker",
            DeviceKind::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// One attached output device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
        }
    }
}

/// Descriptors for an enumeration in host order. Repeated names get
/// `#2`, `#3`... appended to their id so identical devices stay distinct.
pub fn descriptors_from_names<I>(names: I) -> Vec<DeviceDescriptor>
where
    I: IntoIterator<Item = String>,
{
    let mut seen: HashMap<String, usize> = HashMap::new();
    names
        .into_iter()
        .map(|name| {
            let count = seen.entry(name.clone()).or_insert(0);
            *count += 1;
            let id = if *count == 1 {
                name.clone()
            } else {
                format!("{}#{}", name, count)
            };
            DeviceDescriptor::new(id, name.as_str(), DeviceKind::infer(&name))
        })
        .collect()
}

/// Decides whether a device is a relay target.
/// The second argument is the user's "primary device only" toggle.
pub type CompatibilityPolicy = Arc<dyn Fn(&DeviceDescriptor, bool) -> bool + Send + Sync>;

/// Hearing aids always qualify; without the toggle, wired, USB and
/// Bluetooth listening devices qualify too. Speakers never do.
pub fn default_policy() -> CompatibilityPolicy {
    Arc::new(|device: &DeviceDescriptor, primary_only: bool| match device.kind {
        DeviceKind::HearingAid => true,
        DeviceKind::WiredHeadset
        | DeviceKind::WiredHeadphones
        | DeviceKind::UsbHeadset
        | DeviceKind::BluetoothA2dp
        | DeviceKind::BleHeadset
        | DeviceKind::BluetoothSco => !primary_only,
        DeviceKind::BuiltinSpeaker | DeviceKind::Other => false,
    })
}

/// Immutable view of the attached devices
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSnapshot {
    pub devices: Vec<DeviceDescriptor>,
}

impl DeviceSnapshot {
    pub fn target_available(&self, policy: &CompatibilityPolicy, primary_only: bool) -> bool {
        self.devices.iter().any(|d| policy(d, primary_only))
    }
}

/// Device set plus routing policy
pub struct DeviceRouter {
    devices: Mutex<BTreeMap<String, DeviceDescriptor>>,
    policy: RwLock<CompatibilityPolicy>,
    primary_only: AtomicBool,
}

impl Default for DeviceRouter {
    fn default() -> Self {
        Self::new(default_policy())
    }
}

impl DeviceRouter {
    pub fn new(policy: CompatibilityPolicy) -> Self {
        Self {
            devices: Mutex::new(BTreeMap::new()),
            policy: RwLock::new(policy),
            primary_only: AtomicBool::new(false),
        }
    }

    pub fn set_policy(&self, policy: CompatibilityPolicy) {
        *self.policy.write() = policy;
    }

    pub fn set_primary_only(&self, primary_only: bool) {
        self.primary_only.store(primary_only, Ordering::Release);
    }

    pub fn primary_only(&self) -> bool {
        self.primary_only.load(Ordering::Acquire)
    }

    /// Replace the whole device set
    pub fn set_snapshot(&self, devices: Vec<DeviceDescriptor>) {
        let mut map = self.devices.lock();
        map.clear();
        for device in devices {
            map.insert(device.id.clone(), device);
        }
    }

    pub fn devices_added(&self, added: &[DeviceDescriptor]) {
        let mut map = self.devices.lock();
        for device in added {
            map.insert(device.id.clone(), device.clone());
        }
    }

    pub fn devices_removed(&self, removed: &[DeviceDescriptor]) {
        let mut map = self.devices.lock();
        for device in removed {
            map.remove(&device.id);
        }
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            devices: self.devices.lock().values().cloned().collect(),
        }
    }

    pub fn is_compatible(&self, device: &DeviceDescriptor) -> bool {
        let policy = self.policy.read();
        (*policy)(device, self.primary_only())
    }

    /// Devices the policy currently accepts
    pub fn compatible_devices(&self) -> Vec<DeviceDescriptor> {
        let policy = self.policy.read().clone();
        let primary_only = self.primary_only();
        self.devices
            .lock()
            .values()
            .filter(|d| policy(*d, primary_only))
            .cloned()
            .collect()
    }

    /// Is at least one compatible device attached
    pub fn target_available(&self) -> bool {
        let policy = self.policy.read().clone();
        self.snapshot().target_available(&policy, self.primary_only())
    }
}

/// Topology change reported by the watcher
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceChange {
    Added(Vec<DeviceDescriptor>),
    Removed(Vec<DeviceDescriptor>),
}

/// Split the difference between two enumerations into (added, removed)
pub fn diff_devices(
    previous: &[DeviceDescriptor],
    current: &[DeviceDescriptor],
) -> (Vec<DeviceDescriptor>, Vec<DeviceDescriptor>) {
    let added = current
        .iter()
        .filter(|d| !previous.iter().any(|p| p.id == d.id))
        .cloned()
        .collect();
    let removed = previous
        .iter()
        .filter(|p| !current.iter().any(|d| d.id == p.id))
        .cloned()
        .collect();
    (added, removed)
}

fn enumerate(input: bool) -> RelayResult<Vec<DeviceDescriptor>> {
    let host = cpal::default_host();
    let devices: Vec<cpal::Device> = if input {
        host.input_devices().map(|d| d.collect())
    } else {
        host.output_devices().map(|d| d.collect())
    }
    .map_err(|e| RelayError::Device(format!("Failed to enumerate devices: {}", e)))?;

    Ok(descriptors_from_names(devices.iter().filter_map(|d| d.name().ok())))
}

/// Output devices of the default cpal host
pub fn enumerate_output_devices() -> RelayResult<Vec<DeviceDescriptor>> {
    enumerate(false)
}

/// Input devices of the default cpal host
pub fn enumerate_input_devices() -> RelayResult<Vec<DeviceDescriptor>> {
    enumerate(true)
}

/// Polls device enumeration and reports changes
pub struct DeviceWatcher {
    initial: Vec<DeviceDescriptor>,
    event_rx: Receiver<DeviceChange>,
    shutdown_tx: Option<Sender<()>>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl DeviceWatcher {
    /// Watch the default cpal host's output devices
    pub fn cpal(interval: Duration) -> RelayResult<Self> {
        Self::spawn(interval, enumerate_output_devices)
    }

    /// Watch an arbitrary enumeration function
    ///
    /// # Arguments
    /// * `interval` - Polling period
    /// * `enumerate` - Returns the currently attached devices
    pub fn spawn<F>(interval: Duration, enumerate: F) -> RelayResult<Self>
    where
        F: Fn() -> RelayResult<Vec<DeviceDescriptor>> + Send + 'static,
    {
        let initial = enumerate()?;
        let (event_tx, event_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = unbounded::<()>();

        let mut previous = initial.clone();
        let thread_handle = thread::Builder::new()
            .name("device-watcher".to_string())
            .spawn(move || {
                log::debug!("[Device Watcher] Polling every {:?}", interval);
                loop {
                    match shutdown_rx.recv_timeout(interval) {
                        Ok(()) | Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
                        Err(crossbeam::channel::RecvTimeoutError::Timeout) => {}
                    }
                    let current = match enumerate() {
                        Ok(current) => current,
                        Err(e) => {
                            log::warn!("[Device Watcher] {}", e);
                            continue;
                        }
                    };
                    let (added, removed) = diff_devices(&previous, &current);
                    if !removed.is_empty() {
                        log::info!("[Device Watcher] Removed: {:?}", names(&removed));
                        if event_tx.send(DeviceChange::Removed(removed)).is_err() {
                            break;
                        }
                    }
                    if !added.is_empty() {
                        log::info!("[Device Watcher] Added: {:?}", names(&added));
                        if event_tx.send(DeviceChange::Added(added)).is_err() {
                            break;
                        }
                    }
                    previous = current;
                }
                log::debug!("[Device Watcher] Stopped");
            })
            .map_err(|e| RelayError::WorkerSpawn(format!("device watcher: {}", e)))?;

        Ok(Self {
            initial,
            event_rx,
            shutdown_tx: Some(shutdown_tx),
            thread_handle: Some(thread_handle),
        })
    }

    /// Devices present when the watcher started
    pub fn initial(&self) -> &[DeviceDescriptor] {
        &self.initial
    }

    pub fn receiver(&self) -> &Receiver<DeviceChange> {
        &self.event_rx
    }

    pub fn try_recv(&self) -> Option<DeviceChange> {
        self.event_rx.try_recv().ok()
    }

    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            tx.send(()).ok();
        }
        if let Some(handle) = self.thread_handle.take() {
            handle.join().ok();
        }
    }
}

impl Drop for DeviceWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn names(devices: &[DeviceDescriptor]) -> Vec<&str> {
    devices.iter().map(|d| d.name.as_str()).collect()
}
