//! [`KernelCore`] – the blocking run loop executed on the kernel thread.
//!
//! On entry the loop publishes a one-time `starting` status, then takes one
//! message at a time from the shell inbox:
//!
//! * [`KernelMessage::Execute`] – publish `busy`, clear the cancellation
//!   token, open the [`InterruptGate`], hand the request to the
//!   [`Interpreter`], close the gate, publish the outcome and `idle`.
//! * [`KernelMessage::Shutdown`] – leave the loop with the mode's
//!   process-style exit status.
//!
//! A closed inbox (the transport context was destroyed under the loop) is
//! treated as natural completion. The loop marks the shared state `Stopping`
//! on its way out; the controller records `Stopped` once the thread has been
//! joined.

use std::sync::Arc;

use alcove_transport::TransportContext;
use alcove_types::{
    Event, EventPayload, ExecuteRequest, ExecutionOutcome, ExecutionState, ExitStatus,
    KernelMessage, KernelState, StateCell,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::interpreter::Interpreter;
use crate::interrupt_gate::InterruptGate;

const SOURCE: &str = "alcove-kernel::core";

/// The embedded kernel's event loop. Constructed during thread init, consumed
/// by [`KernelCore::run`].
pub struct KernelCore {
    interpreter: Box<dyn Interpreter>,
    inbox: mpsc::UnboundedReceiver<KernelMessage>,
    ctx: Arc<TransportContext>,
    gate: Arc<InterruptGate>,
    token: CancelToken,
    state: Arc<StateCell>,
}

impl KernelCore {
    pub fn new(
        interpreter: Box<dyn Interpreter>,
        inbox: mpsc::UnboundedReceiver<KernelMessage>,
        ctx: Arc<TransportContext>,
        gate: Arc<InterruptGate>,
        token: CancelToken,
        state: Arc<StateCell>,
    ) -> Self {
        Self {
            interpreter,
            inbox,
            ctx,
            gate,
            token,
            state,
        }
    }

    /// Run the kernel loop to completion and return the exit status the
    /// process facade will report.
    pub fn run(mut self) -> ExitStatus {
        info!(interpreter = self.interpreter.name(), "kernel loop entered");
        // Announced exactly once, before the first unit of work.
        self.publish_status(ExecutionState::Starting);
        let status = loop {
            match self.inbox.blocking_recv() {
                Some(KernelMessage::Execute(request)) => self.run_unit(request),
                Some(KernelMessage::Shutdown(mode)) => {
                    info!(mode = ?mode, "kernel loop stopping on request");
                    break mode.exit_status();
                }
                None => {
                    debug!("shell inbox closed; kernel loop stopping");
                    break ExitStatus::CLEAN;
                }
            }
        };
        self.state.store(KernelState::Stopping);
        status
    }

    /// Execute one unit of work inside an interruptable window.
    fn run_unit(&mut self, request: ExecuteRequest) {
        self.publish_status(ExecutionState::Busy);

        // Boundary: a token raised against a previous unit must not leak in.
        self.token.clear();
        self.gate.open();
        let outcome = self.interpreter.execute(&request, &self.token);
        self.gate.close();

        // A delivered interrupt parked the handle in `Interrupting`; the
        // boundary returns it to `Running`.
        self.state
            .advance(KernelState::Interrupting, KernelState::Running);

        match &outcome {
            ExecutionOutcome::Completed(_) => debug!(request = %request.id, "unit completed"),
            ExecutionOutcome::Cancelled => info!(request = %request.id, "unit cancelled"),
            ExecutionOutcome::Failed(reason) => {
                warn!(request = %request.id, %reason, "unit failed")
            }
        }

        let result = Event::new(
            SOURCE,
            EventPayload::ExecuteResult {
                request_id: request.id,
                outcome,
            },
        );
        if self.ctx.publish(result).is_err() {
            debug!("outbound queue gone; result dropped");
        }
        self.publish_status(ExecutionState::Idle);
    }

    fn publish_status(&self, state: ExecutionState) {
        let event = Event::new(SOURCE, EventPayload::Status { state });
        if self.ctx.publish(event).is_err() {
            debug!("outbound queue gone; status dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::EchoInterpreter;
    use alcove_types::ShutdownMode;
    use std::time::{Duration, Instant};
    use tokio::sync::broadcast;

    /// Interpreter that spins until cancelled or a generous deadline passes.
    struct SlowInterpreter {
        budget: Duration,
    }

    impl Interpreter for SlowInterpreter {
        fn name(&self) -> &str {
            "slow"
        }

        fn execute(&mut self, _req: &ExecuteRequest, token: &CancelToken) -> ExecutionOutcome {
            let started = Instant::now();
            while started.elapsed() < self.budget {
                if token.is_cancelled() {
                    return ExecutionOutcome::Cancelled;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            ExecutionOutcome::Completed("slow done".to_string())
        }
    }

    struct Rig {
        ctx: Arc<TransportContext>,
        gate: Arc<InterruptGate>,
        token: CancelToken,
        state: Arc<StateCell>,
        events: broadcast::Receiver<Event>,
        thread: std::thread::JoinHandle<ExitStatus>,
    }

    fn spawn_core(interpreter: Box<dyn Interpreter>) -> Rig {
        let ctx = Arc::new(TransportContext::bind("tcp", "127.0.0.1").expect("bind"));
        let inbox = ctx.take_kernel_inbox().expect("inbox");
        let gate = Arc::new(InterruptGate::new());
        let token = CancelToken::new();
        let state = Arc::new(StateCell::new(KernelState::Running));
        let events = ctx.subscribe();

        let core = KernelCore::new(
            interpreter,
            inbox,
            Arc::clone(&ctx),
            Arc::clone(&gate),
            token.clone(),
            Arc::clone(&state),
        );
        let thread = std::thread::spawn(move || core.run());

        Rig {
            ctx,
            gate,
            token,
            state,
            events,
            thread,
        }
    }

    /// Receive events until the next `ExecuteResult`, returning its outcome.
    fn next_result(rx: &mut broadcast::Receiver<Event>) -> ExecutionOutcome {
        loop {
            let event = rx.blocking_recv().expect("event stream");
            if let EventPayload::ExecuteResult { outcome, .. } = event.payload {
                return outcome;
            }
        }
    }

    #[test]
    fn loop_entry_announces_starting_once() {
        let mut rig = spawn_core(Box::new(EchoInterpreter));

        let first = rig.events.blocking_recv().expect("starting");
        assert!(matches!(
            first.payload,
            EventPayload::Status {
                state: ExecutionState::Starting
            }
        ));

        // Nothing else is announced until work arrives.
        rig.ctx.submit(ExecuteRequest::new("ping")).expect("submit");
        let second = rig.events.blocking_recv().expect("busy");
        assert!(matches!(
            second.payload,
            EventPayload::Status {
                state: ExecutionState::Busy
            }
        ));

        rig.ctx
            .send_kernel(KernelMessage::Shutdown(ShutdownMode::Terminate))
            .expect("shutdown");
        rig.thread.join().expect("join");
    }

    #[test]
    fn unit_of_work_publishes_busy_result_idle() {
        let mut rig = spawn_core(Box::new(EchoInterpreter));
        rig.ctx.submit(ExecuteRequest::new("ping")).expect("submit");

        let first = rig.events.blocking_recv().expect("starting");
        assert!(matches!(
            first.payload,
            EventPayload::Status {
                state: ExecutionState::Starting
            }
        ));
        let busy = rig.events.blocking_recv().expect("busy");
        assert!(matches!(
            busy.payload,
            EventPayload::Status {
                state: ExecutionState::Busy
            }
        ));
        assert_eq!(
            next_result(&mut rig.events),
            ExecutionOutcome::Completed("ping".to_string())
        );
        let last = rig.events.blocking_recv().expect("idle");
        assert!(matches!(
            last.payload,
            EventPayload::Status {
                state: ExecutionState::Idle
            }
        ));

        rig.ctx
            .send_kernel(KernelMessage::Shutdown(ShutdownMode::Terminate))
            .expect("shutdown");
        assert_eq!(rig.thread.join().expect("join"), ExitStatus::CLEAN);
    }

    #[test]
    fn terminate_reports_clean_exit() {
        let rig = spawn_core(Box::new(EchoInterpreter));
        rig.ctx
            .send_kernel(KernelMessage::Shutdown(ShutdownMode::Terminate))
            .expect("shutdown");
        assert_eq!(rig.thread.join().expect("join"), ExitStatus::CLEAN);
        assert_eq!(rig.state.load(), KernelState::Stopping);
    }

    #[test]
    fn kill_reports_killed_exit() {
        let rig = spawn_core(Box::new(EchoInterpreter));
        rig.ctx
            .send_kernel(KernelMessage::Shutdown(ShutdownMode::Kill))
            .expect("shutdown");
        assert_eq!(rig.thread.join().expect("join"), ExitStatus::KILLED);
    }

    #[test]
    fn closed_inbox_counts_as_natural_completion() {
        let rig = spawn_core(Box::new(EchoInterpreter));
        rig.ctx.destroy();
        assert_eq!(rig.thread.join().expect("join"), ExitStatus::CLEAN);
    }

    #[test]
    fn interrupt_inside_window_cancels_the_unit() {
        let mut rig = spawn_core(Box::new(SlowInterpreter {
            budget: Duration::from_secs(10),
        }));
        rig.ctx.submit(ExecuteRequest::new("spin")).expect("submit");

        // Wait for the kernel to open the interruptable window.
        let deadline = Instant::now() + Duration::from_secs(2);
        while !rig.gate.is_open() {
            assert!(Instant::now() < deadline, "gate never opened");
            std::thread::sleep(Duration::from_millis(5));
        }
        rig.token.raise();

        assert_eq!(next_result(&mut rig.events), ExecutionOutcome::Cancelled);
        assert!(!rig.gate.is_open());

        rig.ctx
            .send_kernel(KernelMessage::Shutdown(ShutdownMode::Terminate))
            .expect("shutdown");
        rig.thread.join().expect("join");
    }

    #[test]
    fn boundary_returns_interrupting_state_to_running() {
        let mut rig = spawn_core(Box::new(EchoInterpreter));
        rig.state.store(KernelState::Interrupting);

        rig.ctx.submit(ExecuteRequest::new("ping")).expect("submit");
        next_result(&mut rig.events);

        let deadline = Instant::now() + Duration::from_secs(2);
        while rig.state.load() != KernelState::Running {
            assert!(Instant::now() < deadline, "state never restored");
            std::thread::sleep(Duration::from_millis(5));
        }

        rig.ctx
            .send_kernel(KernelMessage::Shutdown(ShutdownMode::Terminate))
            .expect("shutdown");
        rig.thread.join().expect("join");
    }

    #[test]
    fn stale_token_does_not_cancel_the_next_unit() {
        let mut rig = spawn_core(Box::new(EchoInterpreter));
        // Raised between units, outside any window: the boundary clear must
        // erase it before the next unit runs.
        rig.token.raise();
        rig.ctx.submit(ExecuteRequest::new("fresh")).expect("submit");

        assert_eq!(
            next_result(&mut rig.events),
            ExecutionOutcome::Completed("fresh".to_string())
        );

        rig.ctx
            .send_kernel(KernelMessage::Shutdown(ShutdownMode::Terminate))
            .expect("shutdown");
        rig.thread.join().expect("join");
    }
}
