//! [`CancelToken`] – cooperative cancellation for in-flight units of work.
//!
//! There is no safe way to preempt another thread mid-instruction, so an
//! interrupt is modelled as a token the controller raises and the running
//! interpreter polls at its own safe checkpoints. Work that never reaches a
//! checkpoint simply finishes; that is the accepted cost of cooperative
//! cancellation.
//!
//! The kernel loop clears the token at every unit-of-work boundary so a
//! raise aimed at one unit cannot leak into the next.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cloneable cancellation token; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    raised: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the token. Called by the controller delivering an interrupt, or
    /// by a shutdown path aborting whatever is in flight.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    /// Lower the token at a unit-of-work boundary. Called by the kernel
    /// thread only.
    pub fn clear(&self) {
        self.raised.store(false, Ordering::Release);
    }

    /// Checkpoint poll: `true` once the token has been raised.
    pub fn is_cancelled(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}
