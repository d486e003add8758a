//! Assistive listening relay
//!
//! Relays the microphone (or pink noise with `--test`) to a hearing aid or
//! headset, following device arrivals and removals and applying settings
//! file edits while running.
//!
//! Usage:
//!   relay run --config settings.yaml [--engine engine.yaml] [--test] [--primary-only]
//!   relay devices [--json]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam::channel::{Receiver, bounded, never, select, tick};
use relay_audio::router::{enumerate_input_devices, enumerate_output_devices};
use relay_audio::{
    CpalBackend, DeviceRouter, DeviceWatcher, Engine, EngineConfig, EventBus, ExclusiveAudioFocus,
    Orchestrator, PlatformServices, RelayEvent, RelaySettings, SettingsEvent, SettingsWatcher,
    SoftwareEffects, StaticPermissions, StreamState, TimedWakeLock,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Housekeeping period: wake lock renewal and worker health
const TICK_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Relay the microphone to a hearing aid or headset", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay until interrupted
    Run {
        /// Settings YAML (gain, effects, equalizer); watched for changes
        #[arg(long)]
        config: Option<PathBuf>,

        /// Engine YAML (sample rate, block size, devices, timeouts)
        #[arg(long)]
        engine: Option<PathBuf>,

        /// Relay pink noise instead of the microphone
        #[arg(long)]
        test: bool,

        /// Only relay to hearing aids
        #[arg(long)]
        primary_only: bool,
    },
    /// List audio devices and their inferred kind
    Devices {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct DeviceListing {
    inputs: Vec<relay_audio::DeviceDescriptor>,
    outputs: Vec<relay_audio::DeviceDescriptor>,
}

fn main() -> Result<()> {
    relay_audio::init_logging();
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            engine,
            test,
            primary_only,
        } => run(config, engine, test, primary_only),
        Command::Devices { json } => list_devices(json),
    }
}

fn list_devices(json: bool) -> Result<()> {
    let listing = DeviceListing {
        inputs: enumerate_input_devices().context("failed to enumerate input devices")?,
        outputs: enumerate_output_devices().context("failed to enumerate output devices")?,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    let router = DeviceRouter::default();
    println!("Inputs:");
    for device in &listing.inputs {
        println!("  {:<40} {}", device.name, device.kind);
    }
    println!("Outputs:");
    for device in &listing.outputs {
        let marker = if router.is_compatible(device) { "*" } else { " " };
        println!("{} {:<40} {}", marker, device.name, device.kind);
    }
    println!("(* = relay target)");
    Ok(())
}

fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read engine config {:?}", path))?;
    let config: EngineConfig = serde_yaml::from_str(&text)
        .with_context(|| format!("failed to parse engine config {:?}", path))?;
    config.validate()?;
    Ok(config)
}

fn load_settings(path: Option<&Path>) -> Result<RelaySettings> {
    match path {
        Some(path) if path.exists() => RelaySettings::load(path)
            .with_context(|| format!("failed to load settings {:?}", path)),
        Some(path) => {
            log::info!("Settings file {:?} not found, using defaults", path);
            Ok(RelaySettings::default())
        }
        None => Ok(RelaySettings::default()),
    }
}

fn run(
    config_path: Option<PathBuf>,
    engine_path: Option<PathBuf>,
    test: bool,
    primary_only: bool,
) -> Result<()> {
    let engine_config = load_engine_config(engine_path.as_deref())?;
    let mut settings = load_settings(config_path.as_deref())?;
    settings.primary_device_only |= primary_only;

    let events = EventBus::new();
    let event_rx = events.subscribe();

    let engine = Arc::new(Engine::new(
        Arc::new(CpalBackend::new()),
        Arc::new(SoftwareEffects::new()),
        engine_config.clone(),
        events,
    ));

    let mut device_watcher = DeviceWatcher::cpal(engine_config.device_poll_interval())
        .context("failed to start device watcher")?;
    let router = Arc::new(DeviceRouter::default());
    router.set_snapshot(device_watcher.initial().to_vec());

    let orchestrator = Orchestrator::new(
        Arc::clone(&engine),
        Arc::clone(&router),
        PlatformServices {
            wake_lock: Arc::new(TimedWakeLock::new()),
            audio_focus: Arc::new(ExclusiveAudioFocus::new()),
            permissions: Arc::new(StaticPermissions::granted()),
        },
    );
    orchestrator.update_settings(&settings);

    let mut settings_watcher = match config_path {
        Some(path) => Some(
            SettingsWatcher::new(path, settings.clone(), true)
                .context("failed to watch settings file")?,
        ),
        None => None,
    };

    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        shutdown_tx.try_send(()).ok();
    })
    .context("failed to install Ctrl-C handler")?;

    let started = if test {
        orchestrator.start_test()
    } else {
        orchestrator.start()
    };
    if let Err(e) = started {
        log::warn!("Not relaying yet: {} (waiting for a compatible device)", e);
    }
    // remember what the user asked for, so a later device arrival can resume
    let wanted = if test {
        StreamState::TestStreaming
    } else {
        StreamState::Streaming
    };

    let settings_rx: Receiver<SettingsEvent> = settings_watcher
        .as_ref()
        .map(|w| w.receiver().clone())
        .unwrap_or_else(never);
    let device_rx = device_watcher.receiver().clone();
    let ticker = tick(TICK_INTERVAL);

    log::info!("Relay running, press Ctrl-C to stop");
    loop {
        select! {
            recv(shutdown_rx) -> _ => {
                log::info!("Shutdown requested");
                break;
            }
            recv(device_rx) -> change => {
                let Ok(change) = change else { break };
                orchestrator.on_device_change(&change);
                resume_if_idle(&orchestrator, wanted);
            }
            recv(settings_rx) -> event => match event {
                Ok(SettingsEvent::Changed(mut next)) => {
                    next.primary_device_only |= primary_only;
                    orchestrator.update_settings(&next);
                    resume_if_idle(&orchestrator, wanted);
                }
                Ok(SettingsEvent::Invalid(message)) => {
                    log::warn!("Keeping previous settings: {}", message);
                }
                Err(_) => {}
            },
            recv(event_rx) -> event => match event {
                Ok(RelayEvent::Error(message)) => log::error!("{}", message),
                Ok(RelayEvent::StreamFaulted) => orchestrator.on_stream_fault(),
                Ok(RelayEvent::StateChanged(state)) => log::info!("State: {:?}", state),
                Ok(RelayEvent::NoiseSuppressionAvailability(available)) => {
                    log::info!("Noise suppression available: {}", available)
                }
                Ok(RelayEvent::DynamicsProcessingAvailability(available)) => {
                    log::info!("Dynamics processing available: {}", available)
                }
                Err(_) => break,
            },
            recv(ticker) -> _ => orchestrator.tick(),
        }
    }

    orchestrator.stop();
    if let Some(watcher) = settings_watcher.as_mut() {
        watcher.shutdown();
    }
    device_watcher.shutdown();
    Ok(())
}

/// Start the requested mode once a compatible device shows up
fn resume_if_idle(orchestrator: &Orchestrator, wanted: StreamState) {
    if orchestrator.state() != StreamState::Idle || !orchestrator.router().target_available() {
        return;
    }
    let result = match wanted {
        StreamState::TestStreaming => orchestrator.start_test(),
        _ => orchestrator.start(),
    };
    if let Err(e) = result {
        log::warn!("Could not resume relaying: {}", e);
    }
}
