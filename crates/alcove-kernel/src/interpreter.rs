//! [`Interpreter`] – the seam between the hosting machinery and the engine.
//!
//! The runner, the control surface, and the manager do not care what the
//! kernel computes; they care that units of work start, can be cancelled at
//! checkpoints, and report an outcome. Anything that can evaluate a request
//! under a [`CancelToken`] plugs in here.

use std::collections::HashMap;

use alcove_types::{AlcoveError, ExecuteRequest, ExecutionOutcome};

use crate::cancel::CancelToken;

/// An execution engine hosted on the kernel thread.
///
/// # Contract
///
/// * `prepare` runs once during kernel-thread init, after the inherited
///   environment has been scrubbed; its error is reported synchronously to
///   the caller of `start()`, so a failing engine never becomes a silent
///   thread death.
/// * `execute` runs one unit of work to an [`ExecutionOutcome`]. Long-running
///   engines must poll `token` at safe checkpoints and return
///   [`ExecutionOutcome::Cancelled`] once it is raised — a cancelled unit
///   must never report `Completed`.
/// * Implementations run on the dedicated kernel thread, so blocking is
///   expected and permitted.
pub trait Interpreter: Send {
    /// Engine name, used for the kernel-type key and log fields.
    fn name(&self) -> &str;

    /// Initialise the engine with the sanitised environment it will run
    /// under. Default: nothing to set up.
    fn prepare(&mut self, env: &HashMap<String, String>) -> Result<(), AlcoveError> {
        let _ = env;
        Ok(())
    }

    /// Evaluate one unit of work.
    fn execute(&mut self, request: &ExecuteRequest, token: &CancelToken) -> ExecutionOutcome;
}

/// The built-in reference engine: answers every request with its own input.
///
/// Trivial on purpose — it exists so the hosting layer can be exercised,
/// demonstrated, and tested without a real language runtime behind it.
#[derive(Debug, Default)]
pub struct EchoInterpreter;

impl Interpreter for EchoInterpreter {
    fn name(&self) -> &str {
        "echo"
    }

    fn execute(&mut self, request: &ExecuteRequest, token: &CancelToken) -> ExecutionOutcome {
        if token.is_cancelled() {
            return ExecutionOutcome::Cancelled;
        }
        ExecutionOutcome::Completed(request.code.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_returns_its_input() {
        let mut echo = EchoInterpreter;
        let request = ExecuteRequest::new("hello");
        let outcome = echo.execute(&request, &CancelToken::new());
        assert_eq!(outcome, ExecutionOutcome::Completed("hello".to_string()));
    }

    #[test]
    fn echo_honours_a_raised_token() {
        let mut echo = EchoInterpreter;
        let token = CancelToken::new();
        token.raise();
        let outcome = echo.execute(&ExecuteRequest::new("hello"), &token);
        assert_eq!(outcome, ExecutionOutcome::Cancelled);
    }

    #[test]
    fn echo_reports_its_name() {
        assert_eq!(EchoInterpreter.name(), "echo");
    }
}
