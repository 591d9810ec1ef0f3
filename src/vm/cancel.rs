use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A flag the engine polls once per instruction.
///
/// Clones share the flag, so a watchdog thread can stop a running engine.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Clear the flag so the engine can run again.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}
