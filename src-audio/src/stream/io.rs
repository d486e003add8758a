// ============================================================================
// Source / Sink Abstraction
// ============================================================================
//
// Capability interfaces for "produces frames" and "accepts frames".
// Methods take &self so the control thread can force a release while the
// stream worker is blocked inside read() or write().

use super::session::SessionHandle;
use crate::config::EngineConfig;
use crate::error::RelayResult;
use std::sync::Arc;

/// Produces mono frames
pub trait Source: Send + Sync {
    /// Begin capturing
    fn start(&self) -> RelayResult<()>;

    /// Stop capturing; the source can be started again
    fn stop(&self) -> RelayResult<()>;

    /// Free the underlying device. Idempotent; pending reads return.
    fn release(&self);

    /// Blocking read of up to `buffer.len()` frames, returns frames read
    fn read(&self, buffer: &mut [f32]) -> RelayResult<usize>;

    /// Capture session for effect attachment
    fn session(&self) -> SessionHandle;
}

/// Accepts mono frames
pub trait Sink: Send + Sync {
    /// Begin rendering
    fn play(&self) -> RelayResult<()>;

    /// Stop rendering; the sink can be played again
    fn stop(&self) -> RelayResult<()>;

    /// Free the underlying device. Idempotent; pending writes return.
    fn release(&self);

    /// Blocking write, returns frames accepted
    fn write(&self, buffer: &[f32]) -> RelayResult<usize>;

    /// Size of the device buffer in frames
    fn buffer_size_frames(&self) -> usize;

    /// Playback session for effect attachment
    fn session(&self) -> SessionHandle;
}

/// Opens hardware sources and sinks
pub trait AudioBackend: Send + Sync {
    /// Open the capture device (microphone)
    fn open_source(&self, config: &EngineConfig) -> RelayResult<Arc<dyn Source>>;

    /// Open the render device
    fn open_sink(&self, config: &EngineConfig) -> RelayResult<Arc<dyn Sink>>;
}
