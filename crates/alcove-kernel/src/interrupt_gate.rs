//! [`InterruptGate`] – cancellation-eligibility flag for one kernel.
//!
//! The kernel can only be interrupted safely while it is executing a
//! submitted unit of work; outside that window a cancellation could corrupt
//! the engine's internal state. The gate makes the window visible to the
//! controller: the kernel thread opens it right before handing a request to
//! the interpreter and closes it right after, and the controller reads it
//! when deciding whether an interrupt request may be delivered at all.
//!
//! Single writer (the kernel thread), single reader (the controller); an
//! atomic flag with acquire/release ordering is all the synchronisation
//! required.

use std::sync::atomic::{AtomicBool, Ordering};

/// Two-state flag: `NotInterruptible` (initial) or `Interruptible`.
///
/// Share it between the kernel thread and the controller with an
/// [`Arc`][std::sync::Arc].
#[derive(Debug, Default)]
pub struct InterruptGate {
    open: AtomicBool,
}

impl InterruptGate {
    /// Create a gate in the `NotInterruptible` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter an interruptable window. Called by the kernel thread only, at
    /// the start of a unit of work.
    pub fn open(&self) {
        self.open.store(true, Ordering::Release);
    }

    /// Leave the interruptable window. Called by the kernel thread only, at
    /// the end of a unit of work.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// `true` while the kernel is inside an interruptable window.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_not_interruptible() {
        let gate = InterruptGate::new();
        assert!(!gate.is_open());
    }

    #[test]
    fn open_then_close_roundtrip() {
        let gate = InterruptGate::new();
        gate.open();
        assert!(gate.is_open());
        gate.close();
        assert!(!gate.is_open());
    }

    #[test]
    fn close_on_closed_gate_is_a_noop() {
        let gate = InterruptGate::new();
        gate.close();
        assert!(!gate.is_open());
    }

    #[test]
    fn visible_across_threads() {
        use std::sync::Arc;

        let gate = Arc::new(InterruptGate::new());
        let writer = Arc::clone(&gate);
        let handle = std::thread::spawn(move || writer.open());
        handle.join().expect("writer thread");
        assert!(gate.is_open());
    }
}
