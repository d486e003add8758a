// ============================================================================
// Session Handles
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_SESSION: AtomicU32 = AtomicU32::new(1);

/// Opaque id of an open capture or playback stream.
///
/// Effects are attached per session. `SessionHandle::NONE` marks a stream
/// with no real audio session behind it (the synthetic test generator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SessionHandle(u32);

impl SessionHandle {
    pub const NONE: SessionHandle = SessionHandle(0);

    /// Allocate a fresh, process-unique handle
    pub fn next() -> Self {
        loop {
            let id = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return SessionHandle(id);
            }
        }
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    pub fn id(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "session(none)")
        } else {
            write!(f, "session({})", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique_and_not_none() {
        let a = SessionHandle::next();
        let b = SessionHandle::next();
        assert_ne!(a, b);
        assert!(!a.is_none());
        assert!(SessionHandle::NONE.is_none());
        assert_eq!(SessionHandle::default(), SessionHandle::NONE);
    }
}
