// ============================================================================
// Settings Watcher - File Watching and Reload Signal
// ============================================================================
//
// Watches the settings YAML and re-parses it on change. On Unix, SIGHUP
// forces a reload even when the file system did not report anything.
//
// Only value changes are reported: editors that save in several steps
// produce a single Changed event per distinct result.

use crate::config::RelaySettings;
use crate::error::{RelayError, RelayResult};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

#[cfg(unix)]
use std::sync::Arc;
#[cfg(unix)]
use std::sync::atomic::{AtomicBool, Ordering};

/// Poll period of the watcher thread
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub enum SettingsEvent {
    /// The file parsed to new settings
    Changed(RelaySettings),
    /// The file could not be read or parsed; the previous settings stay in force
    Invalid(String),
}

/// Settings file watcher handle
pub struct SettingsWatcher {
    path: PathBuf,
    event_rx: Receiver<SettingsEvent>,
    shutdown_tx: Option<Sender<()>>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl SettingsWatcher {
    /// Start watching `path`
    ///
    /// # Arguments
    /// * `path` - Settings YAML; may not exist yet
    /// * `initial` - Settings currently in force, used to suppress no-op reloads
    /// * `watch_signals` - Reload on SIGHUP (Unix only)
    pub fn new(path: PathBuf, initial: RelaySettings, watch_signals: bool) -> RelayResult<Self> {
        let (event_tx, event_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = unbounded::<()>();
        let (changed_tx, changed_rx) = unbounded::<()>();

        let file_watcher = setup_file_watcher(&path, changed_tx)?;

        #[cfg(unix)]
        let reload_flag = if watch_signals {
            Some(setup_reload_signal()?)
        } else {
            None
        };
        #[cfg(not(unix))]
        if watch_signals {
            log::warn!("[Settings Watcher] Signal reload not supported on this platform");
        }

        let thread_path = path.clone();
        let thread_handle = thread::Builder::new()
            .name("settings-watcher".to_string())
            .spawn(move || {
                // keep the notify watcher alive for the lifetime of the thread
                let _file_watcher = file_watcher;
                let mut last = initial;
                log::info!("[Settings Watcher] Watching {:?}", thread_path);
                loop {
                    match shutdown_rx.recv_timeout(POLL_INTERVAL) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }

                    let mut reload = false;
                    while changed_rx.try_recv().is_ok() {
                        reload = true;
                    }
                    #[cfg(unix)]
                    if let Some(flag) = reload_flag.as_ref() {
                        if flag.swap(false, Ordering::Relaxed) {
                            log::info!("[Settings Watcher] Reload signal received (SIGHUP)");
                            reload = true;
                        }
                    }
                    if !reload {
                        continue;
                    }

                    let event = match reload_settings(&thread_path, &last) {
                        Some(event) => event,
                        None => continue,
                    };
                    if let SettingsEvent::Changed(settings) = &event {
                        last = settings.clone();
                    }
                    if event_tx.send(event).is_err() {
                        break;
                    }
                }
                log::debug!("[Settings Watcher] Stopped");
            })
            .map_err(|e| RelayError::WorkerSpawn(format!("settings watcher: {}", e)))?;

        Ok(Self {
            path,
            event_rx,
            shutdown_tx: Some(shutdown_tx),
            thread_handle: Some(thread_handle),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn receiver(&self) -> &Receiver<SettingsEvent> {
        &self.event_rx
    }

    /// Non-blocking receive
    pub fn try_recv(&self) -> Option<SettingsEvent> {
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

impl Drop for SettingsWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Re-read the file; None when nothing changed
fn reload_settings(path: &Path, last: &RelaySettings) -> Option<SettingsEvent> {
    if !path.exists() {
        return None;
    }
    match RelaySettings::load(path) {
        Ok(settings) if settings == *last => None,
        Ok(settings) => {
            log::info!("[Settings Watcher] Settings changed");
            Some(SettingsEvent::Changed(settings))
        }
        Err(e) => {
            log::warn!("[Settings Watcher] Ignoring invalid settings: {}", e);
            Some(SettingsEvent::Invalid(e.to_string()))
        }
    }
}

fn setup_file_watcher(path: &Path, changed_tx: Sender<()>) -> RelayResult<notify::RecommendedWatcher> {
    use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    changed_tx.send(()).ok();
                }
            }
            Err(e) => log::warn!("[Settings Watcher] Watch error: {}", e),
        },
        Config::default(),
    )
    .map_err(|e| RelayError::Config(format!("failed to create file watcher: {}", e)))?;

    // watch the directory so editors that replace the file are still seen
    let watch_path = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    watcher
        .watch(&watch_path, RecursiveMode::NonRecursive)
        .map_err(|e| RelayError::Config(format!("failed to watch {:?}: {}", watch_path, e)))?;
    Ok(watcher)
}

#[cfg(unix)]
fn setup_reload_signal() -> RelayResult<Arc<AtomicBool>> {
    let reload = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGHUP, Arc::clone(&reload))?;
    Ok(reload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Instant;

    fn wait_for_event(watcher: &SettingsWatcher, timeout: Duration) -> Option<SettingsEvent> {
        watcher.receiver().recv_timeout(timeout).ok()
    }

    #[test]
    fn test_reload_settings_skips_unchanged() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("settings.yaml");
        let settings = RelaySettings::default();
        settings.save(&path).unwrap();

        assert_eq!(reload_settings(&path, &settings), None);
        assert_eq!(reload_settings(&temp_dir.path().join("missing.yaml"), &settings), None);
    }

    #[test]
    fn test_reload_settings_reports_invalid() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("settings.yaml");
        fs::write(&path, "microphoneGain: [not, a, number]").unwrap();

        let event = reload_settings(&path, &RelaySettings::default());
        assert!(matches!(event, Some(SettingsEvent::Invalid(_))));
    }

    #[test]
    fn test_file_change_delivers_settings() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("settings.yaml");
        RelaySettings::default().save(&path).unwrap();

        let watcher = SettingsWatcher::new(path.clone(), RelaySettings::default(), false).unwrap();
        thread::sleep(Duration::from_millis(100));

        fs::write(&path, "microphoneGain: 12.0\nnoiseSuppressionEnabled: true\n").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut received = None;
        while Instant::now() < deadline {
            match wait_for_event(&watcher, Duration::from_millis(200)) {
                Some(SettingsEvent::Changed(settings)) => {
                    received = Some(settings);
                    break;
                }
                Some(SettingsEvent::Invalid(_)) | None => {}
            }
        }
        let settings = received.expect("settings change not delivered");
        assert_eq!(settings.microphone_gain, 12.0);
        assert!(settings.noise_suppression_enabled);
    }
}
