// ============================================================================
// Streams
// ============================================================================
//
// Sources, sinks and the worker that relays between them.

mod cpal_backend;
mod io;
mod manager;
mod pink_noise;
mod ring;
mod session;

pub use cpal_backend::{CpalBackend, CpalSink, CpalSource};
pub use io::{AudioBackend, Sink, Source};
pub use manager::{MAX_CONSECUTIVE_IO_FAILURES, StreamManager, StreamMode};
pub use pink_noise::{PINK_NOISE_GAIN, PinkNoiseFilter, PinkNoiseSource};
pub use ring::BlockingRing;
pub use session::SessionHandle;
