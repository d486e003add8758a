// ============================================================================
// Events and State Signals
// ============================================================================
//
// EventBus: one-shot notifications, broadcast to every live subscriber.
// Delivery is FIFO per producer and not replayed; a late subscriber misses
// earlier events.
//
// StateSignal: a current value plus change notifications. New subscribers
// receive the current value first.

use crossbeam::channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use std::sync::Arc;

/// Relay lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Streaming,
    TestStreaming,
}

impl StreamState {
    pub fn is_active(&self) -> bool {
        !matches!(self, StreamState::Idle)
    }
}

/// One-shot notifications exposed to the UI layer
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// Denoiser support, reported once per attach
    NoiseSuppressionAvailability(bool),
    /// Limiter support, reported once per attach
    DynamicsProcessingAvailability(bool),
    /// Non-fatal, user-visible error message
    Error(String),
    /// The stream worker gave up after a fault and cleaned up
    StreamFaulted,
    /// Orchestrator state transition
    StateChanged(StreamState),
}

/// Multi-subscriber broadcast of `RelayEvent`s
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<RelayEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber; it only sees events emitted from now on
    pub fn subscribe(&self) -> Receiver<RelayEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Broadcast an event, dropping subscribers whose receiver is gone
    pub fn emit(&self, event: RelayEvent) {
        log::debug!("[Events] {:?}", event);
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Convenience for `RelayEvent::Error`
    pub fn error(&self, message: impl Into<String>) {
        self.emit(RelayEvent::Error(message.into()));
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

struct SignalInner<T> {
    value: T,
    watchers: Vec<Sender<T>>,
}

/// Observable value with replay of the current state
#[derive(Clone)]
pub struct StateSignal<T: Clone + PartialEq + Send + 'static> {
    inner: Arc<Mutex<SignalInner<T>>>,
}

impl<T: Clone + PartialEq + Send + 'static> StateSignal<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SignalInner {
                value,
                watchers: Vec::new(),
            })),
        }
    }

    /// Current value
    pub fn get(&self) -> T {
        self.inner.lock().value.clone()
    }

    /// Update the value; watchers are notified only when it changes.
    /// Returns true if the value changed.
    pub fn set(&self, value: T) -> bool {
        let mut inner = self.inner.lock();
        if inner.value == value {
            return false;
        }
        inner.value = value.clone();
        inner.watchers.retain(|tx| tx.send(value.clone()).is_ok());
        true
    }

    /// Subscribe; the current value is delivered immediately
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = unbounded();
        let mut inner = self.inner.lock();
        if tx.send(inner.value.clone()).is_ok() {
            inner.watchers.push(tx);
        }
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_bus_broadcast() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.emit(RelayEvent::NoiseSuppressionAvailability(true));
        bus.error("boom");

        for rx in [&a, &b] {
            assert_eq!(rx.try_recv().unwrap(), RelayEvent::NoiseSuppressionAvailability(true));
            assert_eq!(rx.try_recv().unwrap(), RelayEvent::Error("boom".to_string()));
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_event_bus_late_subscriber_misses_events() {
        let bus = EventBus::new();
        bus.emit(RelayEvent::StreamFaulted);
        let late = bus.subscribe();
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn test_event_bus_prunes_dropped_subscribers() {
        let bus = EventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);
        bus.emit(RelayEvent::StreamFaulted);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(keep.try_recv().unwrap(), RelayEvent::StreamFaulted);
    }

    #[test]
    fn test_state_signal_replays_and_dedups() {
        let signal = StateSignal::new(false);
        let rx = signal.subscribe();
        assert_eq!(rx.try_recv().unwrap(), false);

        assert!(!signal.set(false));
        assert!(rx.try_recv().is_err());

        assert!(signal.set(true));
        assert_eq!(rx.try_recv().unwrap(), true);
        assert!(signal.get());

        let late = signal.subscribe();
        assert_eq!(late.try_recv().unwrap(), true);
    }
}
