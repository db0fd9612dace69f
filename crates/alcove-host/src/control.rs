//! [`ProcessControl`] – the process facade, and its thread-backed
//! implementation [`EmbeddedKernel`].
//!
//! Kernel-management code wants child-process semantics: probe for an exit
//! status, deliver signals, wait, tear down. The trait captures exactly that
//! surface, so a manager never learns whether the kernel behind it is a
//! thread in this process or a real child — [`EmbeddedKernel`] here and
//! [`SubprocessKernel`][crate::subprocess::SubprocessKernel] are
//! interchangeable peers.
//!
//! # Signal semantics
//!
//! * `Terminate` / `Kill` – best-effort stop of the kernel event loop. The
//!   in-flight unit of work gets its cancellation token raised but is not
//!   guaranteed to unwind cleanly.
//! * `Interrupt` – delivered only while the [`InterruptGate`] is open;
//!   outside a window the request is dropped silently, not queued.
//!
//! [`InterruptGate`]: alcove_kernel::InterruptGate

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use alcove_kernel::Interpreter;
use alcove_types::{
    AlcoveError, ExitStatus, KernelMessage, KernelSignal, KernelState, ShutdownMode,
};
use tracing::{debug, info};

use crate::handle::KernelHandle;
use crate::runner::KernelThreadRunner;

/// Interval between exit probes inside [`ProcessControl::wait`].
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Process-like lifecycle operations over an arbitrary backing mechanism.
pub trait ProcessControl: Send + Sync {
    /// Non-blocking exit probe: `None` while the kernel is alive,
    /// `Some(status)` once it has stopped. Never blocks, never fails.
    fn poll(&self) -> Option<ExitStatus>;

    /// Deliver one signal from the accepted set. Best-effort; see the module
    /// docs for the per-signal guarantees.
    fn send_signal(&self, signal: KernelSignal);

    /// Sleep-poll [`poll`][ProcessControl::poll] until it reports an exit or
    /// `timeout` elapses. A timeout is not an error; the caller re-checks.
    fn wait(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            if self.poll().is_some() || Instant::now() >= deadline {
                return;
            }
            std::thread::sleep(WAIT_POLL);
        }
    }

    fn terminate(&self) {
        self.send_signal(KernelSignal::Terminate);
    }

    fn kill(&self) {
        self.send_signal(KernelSignal::Kill);
    }

    /// Ordered teardown of the kernel and everything it spawned. Returns the
    /// liveness verdict: `true` when nothing the kernel owned is left
    /// running. Idempotent — a second call returns the recorded verdict
    /// promptly.
    fn cleanup(&self) -> bool;
}

/// Per-step record of one cleanup pass; the verdict is the conjunction.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownReport {
    pub heartbeat_stopped: bool,
    pub kernel_joined: bool,
    pub publisher_stopped: bool,
    pub writer_stopped: bool,
    pub context_destroyed: bool,
}

impl ShutdownReport {
    /// `true` when only the initiating thread is left of everything this
    /// kernel's context spawned.
    pub fn all_quiet(&self) -> bool {
        self.heartbeat_stopped
            && self.kernel_joined
            && self.publisher_stopped
            && self.writer_stopped
            && self.context_destroyed
    }
}

/// Thread-backed [`ProcessControl`]: the control surface over one
/// [`KernelHandle`].
pub struct EmbeddedKernel {
    handle: KernelHandle,
    cleanup_verdict: OnceLock<bool>,
}

impl EmbeddedKernel {
    /// Start an embedded kernel and wrap its handle in the process facade.
    pub fn start(
        argv: &[String],
        env: &std::collections::HashMap<String, String>,
        interpreter: Box<dyn Interpreter>,
    ) -> Result<Self, AlcoveError> {
        Ok(Self::from_handle(KernelThreadRunner::start(
            argv,
            env,
            interpreter,
        )?))
    }

    pub fn from_handle(handle: KernelHandle) -> Self {
        Self {
            handle,
            cleanup_verdict: OnceLock::new(),
        }
    }

    pub fn handle(&self) -> &KernelHandle {
        &self.handle
    }

    fn deliver_interrupt(&self) {
        if !self.handle.gate().is_open() {
            // Not an error: outside an interruptable window the request is
            // dropped, not queued.
            debug!(kernel = %self.handle.id(), "interrupt dropped; gate closed");
            return;
        }
        self.handle
            .state_cell()
            .advance(KernelState::Running, KernelState::Interrupting);
        self.handle.token().raise();
        info!(kernel = %self.handle.id(), "interrupt delivered");
    }

    fn deliver_shutdown(&self, mode: ShutdownMode) {
        if !self.handle.state().is_terminal() {
            self.handle.state_cell().store(KernelState::Stopping);
        }
        // Abort whatever is in flight at its next checkpoint; the loop stops
        // once it reads the shutdown message.
        self.handle.token().raise();
        if self
            .handle
            .transport()
            .send_kernel(KernelMessage::Shutdown(mode))
            .is_err()
        {
            debug!(kernel = %self.handle.id(), "shell inbox gone; kernel already stopping");
        }
    }

    fn run_cleanup(&self) -> bool {
        info!(kernel = %self.handle.id(), "cleanup started");
        if !self.handle.state().is_terminal() {
            self.handle.state_cell().store(KernelState::Stopping);
        }
        let ctx = self.handle.transport();

        let heartbeat_stopped = ctx.stop_heartbeat();

        // The join below is unconditional and has no timeout, so ask the
        // loop to stop before blocking on it.
        let _ = ctx.send_kernel(KernelMessage::Shutdown(ShutdownMode::Terminate));
        self.handle.token().raise();
        self.handle.join();
        let kernel_joined = !self.handle.is_alive();

        let publisher_stopped = ctx.stop_publisher();
        let writer_stopped = ctx.stop_writer();
        let context_destroyed = ctx.destroy();

        let report = ShutdownReport {
            heartbeat_stopped,
            kernel_joined,
            publisher_stopped,
            writer_stopped,
            context_destroyed,
        };
        info!(kernel = %self.handle.id(), report = ?report, "cleanup finished");
        report.all_quiet()
    }
}

impl ProcessControl for EmbeddedKernel {
    fn poll(&self) -> Option<ExitStatus> {
        self.handle.poll()
    }

    fn send_signal(&self, signal: KernelSignal) {
        match signal {
            KernelSignal::Interrupt => self.deliver_interrupt(),
            KernelSignal::Terminate => self.deliver_shutdown(ShutdownMode::Terminate),
            KernelSignal::Kill => self.deliver_shutdown(ShutdownMode::Kill),
        }
    }

    fn cleanup(&self) -> bool {
        *self.cleanup_verdict.get_or_init(|| self.run_cleanup())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alcove_kernel::{CancelToken, EchoInterpreter};
    use alcove_types::{Event, EventPayload, ExecuteRequest, ExecutionOutcome};
    use std::collections::HashMap;

    /// Engine that spins until cancelled; used to hold a window open.
    struct SpinEngine;

    impl Interpreter for SpinEngine {
        fn name(&self) -> &str {
            "spin"
        }

        fn execute(&mut self, _r: &ExecuteRequest, token: &CancelToken) -> ExecutionOutcome {
            let started = Instant::now();
            while started.elapsed() < Duration::from_secs(10) {
                if token.is_cancelled() {
                    return ExecutionOutcome::Cancelled;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            ExecutionOutcome::Completed("spun out".to_string())
        }
    }

    fn start_echo() -> EmbeddedKernel {
        EmbeddedKernel::start(&[], &HashMap::new(), Box::new(EchoInterpreter)).expect("start")
    }

    fn next_result(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> ExecutionOutcome {
        loop {
            let event = rx.blocking_recv().expect("event stream");
            if let EventPayload::ExecuteResult { outcome, .. } = event.payload {
                return outcome;
            }
        }
    }

    fn wait_for_open_gate(kernel: &EmbeddedKernel) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !kernel.handle().gate().is_open() {
            assert!(Instant::now() < deadline, "gate never opened");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn poll_is_none_until_terminate_then_clean_within_two_seconds() {
        let kernel = start_echo();
        assert_eq!(kernel.poll(), None);

        kernel.terminate();
        kernel.wait(Duration::from_secs(2));
        assert_eq!(kernel.poll(), Some(ExitStatus::CLEAN));
        assert!(kernel.cleanup());
    }

    #[test]
    fn kill_reports_a_killed_status() {
        let kernel = start_echo();
        kernel.kill();
        kernel.wait(Duration::from_secs(2));
        assert_eq!(kernel.poll(), Some(ExitStatus::KILLED));
        assert!(kernel.cleanup());
    }

    #[test]
    fn wait_returns_quietly_on_timeout() {
        let kernel = start_echo();
        let started = Instant::now();
        kernel.wait(Duration::from_millis(150));
        assert!(started.elapsed() >= Duration::from_millis(150));
        // Still alive; the caller is free to re-check.
        assert_eq!(kernel.poll(), None);
        assert!(kernel.cleanup());
    }

    #[test]
    fn interrupt_inside_window_cancels_the_unit() {
        let kernel =
            EmbeddedKernel::start(&[], &HashMap::new(), Box::new(SpinEngine)).expect("start");
        kernel.handle().mark_running();
        let mut events = kernel.handle().transport().subscribe();

        kernel
            .handle()
            .transport()
            .submit(ExecuteRequest::new("spin forever"))
            .expect("submit");
        wait_for_open_gate(&kernel);

        kernel.send_signal(KernelSignal::Interrupt);
        assert_eq!(kernel.handle().state(), KernelState::Interrupting);
        assert_eq!(next_result(&mut events), ExecutionOutcome::Cancelled);

        // Boundary restores the running state.
        let deadline = Instant::now() + Duration::from_secs(2);
        while kernel.handle().state() != KernelState::Running {
            assert!(Instant::now() < deadline, "state never restored");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(kernel.cleanup());
    }

    #[test]
    fn interrupt_outside_window_has_no_effect() {
        let kernel = start_echo();
        kernel.handle().mark_running();
        let mut events = kernel.handle().transport().subscribe();

        // Gate is closed: the interrupt must be dropped, not queued.
        kernel.send_signal(KernelSignal::Interrupt);
        assert!(!kernel.handle().token().is_cancelled());
        assert_eq!(kernel.handle().state(), KernelState::Running);

        // The next unit is unaffected by the dropped request.
        kernel
            .handle()
            .transport()
            .submit(ExecuteRequest::new("still here"))
            .expect("submit");
        assert_eq!(
            next_result(&mut events),
            ExecutionOutcome::Completed("still here".to_string())
        );
        assert!(kernel.cleanup());
    }

    #[test]
    fn cleanup_reports_all_quiet_and_is_idempotent() {
        let kernel = start_echo();
        assert!(kernel.cleanup());

        let started = Instant::now();
        assert!(kernel.cleanup());
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "second cleanup must return promptly"
        );
        assert_eq!(kernel.handle().state(), KernelState::Stopped);
    }

    #[test]
    fn cleanup_aborts_an_in_flight_unit() {
        let kernel =
            EmbeddedKernel::start(&[], &HashMap::new(), Box::new(SpinEngine)).expect("start");
        kernel
            .handle()
            .transport()
            .submit(ExecuteRequest::new("spin"))
            .expect("submit");
        wait_for_open_gate(&kernel);

        // The raise-then-join inside cleanup must not deadlock on the busy unit.
        assert!(kernel.cleanup());
        assert!(kernel.poll().is_some());
    }

    #[test]
    fn sequential_kernels_both_reach_all_quiet() {
        let first = start_echo();
        assert!(first.cleanup());

        let second = start_echo();
        assert!(second.cleanup());
    }

    #[test]
    fn shutdown_report_verdict_requires_every_step() {
        let mut report = ShutdownReport {
            heartbeat_stopped: true,
            kernel_joined: true,
            publisher_stopped: true,
            writer_stopped: true,
            context_destroyed: true,
        };
        assert!(report.all_quiet());
        report.context_destroyed = false;
        assert!(!report.all_quiet());
    }
}
