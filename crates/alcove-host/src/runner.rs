//! [`KernelThreadRunner`] – spawns and initialises the kernel thread.
//!
//! `start()` returns only once the spawned thread has finished initialising:
//! the thread sends its init result (the bound transport context, or the
//! error that stopped it) through a one-shot channel before entering the run
//! loop. A bind failure or a broken engine therefore surfaces as an `Err`
//! from `start()` and never as a silent thread death.
//!
//! # Environment scrubbing
//!
//! The kernel thread inherits the host process environment, minus the
//! entries that would corrupt an embedded execution context — above all any
//! variable pinning the host's own executable path, which would make the
//! embedded engine resolve resources against the wrong binary. Launch-recipe
//! overrides are applied after the scrub, so a recipe may deliberately set
//! one of the scrubbed keys.

use std::collections::HashMap;
use std::sync::Arc;

use alcove_kernel::{CancelToken, Interpreter, InterruptGate, KernelCore};
use alcove_transport::TransportContext;
use alcove_types::{AlcoveError, ExitStatus, KernelState, StateCell};
use tracing::{debug, info};

use crate::handle::KernelHandle;

/// Inherited entries removed before the embedded kernel starts.
const SCRUBBED_ENV: &[&str] = &["ALCOVE_HOST_EXECUTABLE", "ALCOVE_CONNECTION_FILE"];

/// Snapshot the process environment, drop the poisonous entries, then apply
/// the launch recipe's overrides.
pub fn scrubbed_environment(overrides: &HashMap<String, String>) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    for key in SCRUBBED_ENV {
        if env.remove(*key).is_some() {
            debug!(key, "scrubbed inherited environment entry");
        }
    }
    for (key, value) in overrides {
        env.insert(key.clone(), value.clone());
    }
    env
}

/// Kernel launch arguments, parsed from an `argv`-style vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchArgs {
    pub transport: String,
    pub ip: String,
}

impl LaunchArgs {
    /// Parse `--transport=` / `--ip=` arguments; anything else is a
    /// malformed launch and fails before a thread is spawned.
    pub fn parse(argv: &[String]) -> Result<Self, AlcoveError> {
        let mut transport = "tcp".to_string();
        let mut ip = "127.0.0.1".to_string();
        for arg in argv {
            if let Some(value) = arg.strip_prefix("--transport=") {
                transport = value.to_string();
            } else if let Some(value) = arg.strip_prefix("--ip=") {
                ip = value.to_string();
            } else {
                return Err(AlcoveError::Startup(format!(
                    "unrecognised kernel argument '{arg}'"
                )));
            }
        }
        Ok(Self { transport, ip })
    }
}

impl Default for LaunchArgs {
    fn default() -> Self {
        Self {
            transport: "tcp".to_string(),
            ip: "127.0.0.1".to_string(),
        }
    }
}

/// Spawner for the dedicated kernel thread.
pub struct KernelThreadRunner;

impl KernelThreadRunner {
    /// Spawn the kernel thread and block until it reports init success or
    /// failure.
    ///
    /// On success the kernel loop is already consuming its shell inbox and
    /// the handle is in `Starting`; the caller decides when it becomes
    /// `Running` (after the connection metadata exists).
    ///
    /// # Errors
    ///
    /// [`AlcoveError::Startup`] for malformed `argv`, a failed port bind, a
    /// failing engine [`prepare`][Interpreter::prepare], or a thread that
    /// died before reporting either.
    pub fn start(
        argv: &[String],
        env: &HashMap<String, String>,
        mut interpreter: Box<dyn Interpreter>,
    ) -> Result<KernelHandle, AlcoveError> {
        let args = LaunchArgs::parse(argv)?;

        let state = Arc::new(StateCell::new(KernelState::Starting));
        let gate = Arc::new(InterruptGate::new());
        let token = CancelToken::new();

        let (init_tx, init_rx) =
            std::sync::mpsc::sync_channel::<Result<Arc<TransportContext>, AlcoveError>>(1);

        let overrides = env.clone();
        let thread_state = Arc::clone(&state);
        let thread_gate = Arc::clone(&gate);
        let thread_token = token.clone();

        let thread = std::thread::Builder::new()
            .name("alcove-kernel".to_string())
            .spawn(move || {
                let scrubbed = scrubbed_environment(&overrides);

                let ctx = match TransportContext::bind(&args.transport, &args.ip) {
                    Ok(ctx) => Arc::new(ctx),
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return ExitStatus::FAULT;
                    }
                };
                if let Err(e) = interpreter.prepare(&scrubbed) {
                    let _ = init_tx.send(Err(e));
                    return ExitStatus::FAULT;
                }
                let Some(inbox) = ctx.take_kernel_inbox() else {
                    let _ = init_tx.send(Err(AlcoveError::Channel(
                        "shell inbox already taken".to_string(),
                    )));
                    return ExitStatus::FAULT;
                };

                let _ = init_tx.send(Ok(Arc::clone(&ctx)));

                KernelCore::new(
                    interpreter,
                    inbox,
                    ctx,
                    thread_gate,
                    thread_token,
                    thread_state,
                )
                .run()
            })
            .map_err(|e| AlcoveError::Startup(format!("could not spawn kernel thread: {e}")))?;

        match init_rx.recv() {
            Ok(Ok(ctx)) => {
                let handle = KernelHandle::new(thread, ctx, state, gate, token);
                info!(kernel = %handle.id(), "kernel thread initialised");
                Ok(handle)
            }
            Ok(Err(e)) => {
                // The thread exits right after reporting; reap it here so an
                // init failure leaks nothing.
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AlcoveError::Startup(
                    "kernel thread exited before reporting init".to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alcove_kernel::EchoInterpreter;
    use alcove_types::{ExecuteRequest, ExecutionOutcome};

    struct BrokenEngine;

    impl Interpreter for BrokenEngine {
        fn name(&self) -> &str {
            "broken"
        }

        fn prepare(&mut self, _env: &HashMap<String, String>) -> Result<(), AlcoveError> {
            Err(AlcoveError::Startup("engine refused to initialise".into()))
        }

        fn execute(&mut self, _r: &ExecuteRequest, _t: &CancelToken) -> ExecutionOutcome {
            ExecutionOutcome::Failed("unreachable".into())
        }
    }

    #[test]
    fn launch_args_defaults() {
        let args = LaunchArgs::parse(&[]).expect("parse");
        assert_eq!(args, LaunchArgs::default());
    }

    #[test]
    fn launch_args_parse_transport_and_ip() {
        let argv = vec!["--transport=tcp".to_string(), "--ip=127.0.0.1".to_string()];
        let args = LaunchArgs::parse(&argv).expect("parse");
        assert_eq!(args.transport, "tcp");
        assert_eq!(args.ip, "127.0.0.1");
    }

    #[test]
    fn launch_args_reject_unknown_flags() {
        let argv = vec!["--shell-port=1234".to_string()];
        assert!(matches!(
            LaunchArgs::parse(&argv),
            Err(AlcoveError::Startup(_))
        ));
    }

    #[test]
    fn start_reports_running_loop_with_live_handle() {
        let handle =
            KernelThreadRunner::start(&[], &HashMap::new(), Box::new(EchoInterpreter))
                .expect("start");
        assert!(handle.is_alive());
        assert_eq!(handle.state(), KernelState::Starting);
        assert_eq!(handle.poll(), None);

        handle.transport().destroy();
        assert_eq!(handle.join(), ExitStatus::CLEAN);
    }

    #[test]
    fn malformed_argv_fails_before_spawning() {
        let argv = vec!["definitely-not-a-flag".to_string()];
        let result = KernelThreadRunner::start(&argv, &HashMap::new(), Box::new(EchoInterpreter));
        assert!(matches!(result, Err(AlcoveError::Startup(_))));
    }

    #[test]
    fn unsupported_transport_is_reported_synchronously() {
        let argv = vec!["--transport=ipc".to_string()];
        let result = KernelThreadRunner::start(&argv, &HashMap::new(), Box::new(EchoInterpreter));
        match result {
            Err(AlcoveError::Startup(reason)) => assert!(reason.contains("unsupported transport")),
            other => panic!("expected startup error, got {other:?}"),
        }
    }

    #[test]
    fn failing_engine_prepare_is_reported_synchronously() {
        let result = KernelThreadRunner::start(&[], &HashMap::new(), Box::new(BrokenEngine));
        match result {
            Err(AlcoveError::Startup(reason)) => {
                assert!(reason.contains("engine refused to initialise"))
            }
            other => panic!("expected startup error, got {other:?}"),
        }
    }

    #[test]
    fn scrub_removes_host_executable_pin() {
        // SAFETY: single-threaded test; no other thread reads this env-var.
        unsafe { std::env::set_var("ALCOVE_HOST_EXECUTABLE", "/usr/bin/alcove") };
        let env = scrubbed_environment(&HashMap::new());
        assert!(!env.contains_key("ALCOVE_HOST_EXECUTABLE"));
        unsafe { std::env::remove_var("ALCOVE_HOST_EXECUTABLE") };
    }

    #[test]
    fn scrub_applies_overrides_after_removal() {
        // SAFETY: single-threaded test; no other thread reads this env-var.
        unsafe { std::env::set_var("ALCOVE_CONNECTION_FILE", "/stale/path.json") };
        let mut overrides = HashMap::new();
        overrides.insert(
            "ALCOVE_CONNECTION_FILE".to_string(),
            "/fresh/path.json".to_string(),
        );
        let env = scrubbed_environment(&overrides);
        assert_eq!(
            env.get("ALCOVE_CONNECTION_FILE").map(String::as_str),
            Some("/fresh/path.json")
        );
        unsafe { std::env::remove_var("ALCOVE_CONNECTION_FILE") };
    }

    #[test]
    fn scrub_keeps_unrelated_entries() {
        // SAFETY: single-threaded test; no other thread reads this env-var.
        unsafe { std::env::set_var("ALCOVE_TEST_UNRELATED", "keep-me") };
        let env = scrubbed_environment(&HashMap::new());
        assert_eq!(
            env.get("ALCOVE_TEST_UNRELATED").map(String::as_str),
            Some("keep-me")
        );
        unsafe { std::env::remove_var("ALCOVE_TEST_UNRELATED") };
    }
}
