//! Cooperative cancellation flag (spec.md §4.8): the lookup state machine
//! polls this between steps rather than being preempted, matching the
//! `AtomicBool` flag pattern used throughout the pack for cooperative
//! shutdown (e.g. `lib-network`'s Bluetooth monitor active flag).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
