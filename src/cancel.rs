//! Cooperative cancellation signal shared between a job's worker and the
//! orchestrator's `interrupt` call.
//!
//! A single atomic boolean per job (`spec.md` §5, §9 "Design Notes"). The
//! worker polls it between units of work -- chunks (C5), EPUB job items
//! (C6), SRT blocks (C7) -- and never aborts an in-flight HTTP request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cheaply cloneable cancellation flag. Cloning shares the same underlying
/// boolean; `cancel()` observed through any clone is visible to all others.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates a token that starts out not cancelled.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Monotonically sets the flag. Idempotent; never un-cancels.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Polls the flag. Cheap enough to call between every unit of work.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
