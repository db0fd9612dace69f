//! [`KernelHandle`] – identity and ownership of one embedded kernel.
//!
//! The handle owns the kernel thread's [`JoinHandle`] and shares everything
//! the controller needs to observe or influence the thread from outside: the
//! state cell, the interrupt gate, the cancellation token, and the transport
//! context. Invariant: at most one live thread per handle, and the handle is
//! only dropped after `cleanup()` has confirmed the join.
//!
//! Exit statuses are recorded exactly once. A panicking kernel thread is
//! reported as [`ExitStatus::FAULT`]; no panic payload crosses the thread
//! boundary.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use alcove_kernel::{CancelToken, InterruptGate};
use alcove_transport::TransportContext;
use alcove_types::{ExitStatus, KernelState, StateCell};
use tracing::{info, warn};
use uuid::Uuid;

/// One embedded kernel instance: the owned thread plus its shared controls.
pub struct KernelHandle {
    id: Uuid,
    thread: Mutex<Option<JoinHandle<ExitStatus>>>,
    exit_status: Mutex<Option<ExitStatus>>,
    state: Arc<StateCell>,
    gate: Arc<InterruptGate>,
    token: CancelToken,
    ctx: Arc<TransportContext>,
}

impl std::fmt::Debug for KernelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelHandle").field("id", &self.id).finish()
    }
}

impl KernelHandle {
    pub(crate) fn new(
        thread: JoinHandle<ExitStatus>,
        ctx: Arc<TransportContext>,
        state: Arc<StateCell>,
        gate: Arc<InterruptGate>,
        token: CancelToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            thread: Mutex::new(Some(thread)),
            exit_status: Mutex::new(None),
            state,
            gate,
            token,
            ctx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> KernelState {
        self.state.load()
    }

    pub fn state_cell(&self) -> &Arc<StateCell> {
        &self.state
    }

    pub fn gate(&self) -> &Arc<InterruptGate> {
        &self.gate
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn transport(&self) -> &Arc<TransportContext> {
        &self.ctx
    }

    /// Flip `Starting → Running`. The manager calls this only after the
    /// connection metadata exists on disk.
    pub fn mark_running(&self) -> bool {
        let advanced = self.state.advance(KernelState::Starting, KernelState::Running);
        if advanced {
            info!(kernel = %self.id, "kernel running");
        }
        advanced
    }

    /// Non-blocking liveness check.
    pub fn is_alive(&self) -> bool {
        lock(&self.thread)
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    /// Non-blocking exit probe: `None` while the thread lives, the recorded
    /// status once it has finished. Joins a finished thread as a side effect
    /// so the status gets recorded exactly once.
    pub fn poll(&self) -> Option<ExitStatus> {
        if let Some(status) = *lock(&self.exit_status) {
            return Some(status);
        }
        {
            let slot = lock(&self.thread);
            if let Some(thread) = slot.as_ref()
                && !thread.is_finished()
            {
                return None;
            }
        }
        Some(self.join())
    }

    /// Block until the kernel thread has exited and return its status.
    /// Safe to call from several threads; late callers get the recorded
    /// status.
    pub fn join(&self) -> ExitStatus {
        let mut slot = lock(&self.thread);
        match slot.take() {
            Some(thread) => {
                let status = thread.join().unwrap_or_else(|_| {
                    warn!(kernel = %self.id, "kernel thread panicked");
                    ExitStatus::FAULT
                });
                *lock(&self.exit_status) = Some(status);
                self.state.store(KernelState::Stopped);
                info!(kernel = %self.id, %status, "kernel thread joined");
                status
            }
            // Another caller joined first; the status is recorded.
            None => lock(&self.exit_status).unwrap_or(ExitStatus::FAULT),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn handle_for(thread: JoinHandle<ExitStatus>) -> KernelHandle {
        let ctx = Arc::new(TransportContext::bind("tcp", "127.0.0.1").expect("bind"));
        KernelHandle::new(
            thread,
            ctx,
            Arc::new(StateCell::new(KernelState::Starting)),
            Arc::new(InterruptGate::new()),
            CancelToken::new(),
        )
    }

    #[test]
    fn poll_is_none_while_the_thread_lives() {
        let thread = std::thread::spawn(|| {
            std::thread::sleep(Duration::from_millis(200));
            ExitStatus::CLEAN
        });
        let handle = handle_for(thread);
        assert!(handle.is_alive());
        assert_eq!(handle.poll(), None);
        assert_eq!(handle.join(), ExitStatus::CLEAN);
    }

    #[test]
    fn poll_reports_the_status_after_exit() {
        let thread = std::thread::spawn(|| ExitStatus::CLEAN);
        let handle = handle_for(thread);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(status) = handle.poll() {
                assert_eq!(status, ExitStatus::CLEAN);
                break;
            }
            assert!(std::time::Instant::now() < deadline, "thread never exited");
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!handle.is_alive());
        assert_eq!(handle.state(), KernelState::Stopped);
    }

    #[test]
    fn a_panicking_thread_reports_a_fault() {
        let thread = std::thread::spawn(|| -> ExitStatus { panic!("kernel blew up") });
        let handle = handle_for(thread);
        assert_eq!(handle.join(), ExitStatus::FAULT);
    }

    #[test]
    fn join_twice_returns_the_recorded_status() {
        let thread = std::thread::spawn(|| ExitStatus::KILLED);
        let handle = handle_for(thread);
        assert_eq!(handle.join(), ExitStatus::KILLED);
        assert_eq!(handle.join(), ExitStatus::KILLED);
    }

    #[test]
    fn mark_running_only_advances_from_starting() {
        let thread = std::thread::spawn(|| ExitStatus::CLEAN);
        let handle = handle_for(thread);
        assert!(handle.mark_running());
        assert_eq!(handle.state(), KernelState::Running);
        // A second call has nothing left to advance.
        assert!(!handle.mark_running());
        handle.join();
    }
}
