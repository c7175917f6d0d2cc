//! Cancellation signal shared between the cancel endpoint and running jobs.
//!
//! The flag carries no job identity: a request cancels whichever job is
//! running, or the next one to start if none is.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    flag: Arc<AtomicBool>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Guard that clears the signal when dropped, whatever path the job takes.
    pub fn clear_on_drop(&self) -> ClearOnDrop<'_> {
        ClearOnDrop { signal: self }
    }
}

pub struct ClearOnDrop<'a> {
    signal: &'a CancellationSignal,
}

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.signal.clear();
    }
}
