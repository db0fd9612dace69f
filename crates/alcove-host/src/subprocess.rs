//! [`SubprocessKernel`] – the real-child-process peer of
//! [`EmbeddedKernel`][crate::control::EmbeddedKernel].
//!
//! Kernel types the host cannot embed are launched as ordinary child
//! processes behind the same [`ProcessControl`] contract, so the manager
//! never branches on the backing mechanism. The child gets the same scrubbed
//! environment an embedded kernel would see.
//!
//! Signal delivery uses real signals on unix (`SIGINT` / `SIGTERM`); on
//! other platforms only `Kill` has a portable equivalent and the rest are
//! logged and dropped.

use std::collections::HashMap;
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use alcove_types::{AlcoveError, ExitStatus, KernelSignal};
use tracing::{debug, info, warn};

use crate::control::ProcessControl;
use crate::runner::scrubbed_environment;

/// Child-process implementation of the process facade.
pub struct SubprocessKernel {
    child: Mutex<Child>,
    exit_status: Mutex<Option<ExitStatus>>,
    cleanup_verdict: OnceLock<bool>,
    pid: u32,
}

impl SubprocessKernel {
    /// Launch `argv[0]` with the remaining arguments and the scrubbed
    /// environment.
    pub fn spawn(argv: &[String], env: &HashMap<String, String>) -> Result<Self, AlcoveError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| AlcoveError::Startup("empty kernel command".to_string()))?;

        let child = Command::new(program)
            .args(args)
            .env_clear()
            .envs(scrubbed_environment(env))
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| AlcoveError::Startup(format!("could not launch '{program}': {e}")))?;

        let pid = child.id();
        info!(%program, pid, "external kernel launched");

        Ok(Self {
            child: Mutex::new(child),
            exit_status: Mutex::new(None),
            cleanup_verdict: OnceLock::new(),
            pid,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    fn record(&self, status: std::process::ExitStatus) -> ExitStatus {
        let converted = convert_status(status);
        *lock(&self.exit_status) = Some(converted);
        converted
    }

    #[cfg(unix)]
    fn signal_child(&self, signal: nix::sys::signal::Signal) {
        use nix::unistd::Pid;
        if let Err(e) = nix::sys::signal::kill(Pid::from_raw(self.pid as i32), signal) {
            debug!(pid = self.pid, error = %e, "signal delivery failed");
        }
    }
}

impl ProcessControl for SubprocessKernel {
    fn poll(&self) -> Option<ExitStatus> {
        if let Some(status) = *lock(&self.exit_status) {
            return Some(status);
        }
        match lock(&self.child).try_wait() {
            Ok(Some(status)) => Some(self.record(status)),
            Ok(None) => None,
            Err(e) => {
                warn!(pid = self.pid, error = %e, "exit probe failed");
                None
            }
        }
    }

    fn send_signal(&self, signal: KernelSignal) {
        if lock(&self.exit_status).is_some() {
            debug!(pid = self.pid, "signal skipped; child already reaped");
            return;
        }
        match signal {
            #[cfg(unix)]
            KernelSignal::Interrupt => self.signal_child(nix::sys::signal::Signal::SIGINT),
            #[cfg(unix)]
            KernelSignal::Terminate => self.signal_child(nix::sys::signal::Signal::SIGTERM),
            KernelSignal::Kill => {
                if let Err(e) = lock(&self.child).kill() {
                    debug!(pid = self.pid, error = %e, "kill failed");
                }
            }
            #[cfg(not(unix))]
            other => debug!(pid = self.pid, signal = %other, "no portable delivery; dropped"),
        }
    }

    fn cleanup(&self) -> bool {
        *self.cleanup_verdict.get_or_init(|| {
            info!(pid = self.pid, "external kernel cleanup started");
            if lock(&self.exit_status).is_none() {
                let mut child = lock(&self.child);
                let _ = child.kill();
                match child.wait() {
                    Ok(status) => {
                        drop(child);
                        self.record(status);
                    }
                    Err(e) => warn!(pid = self.pid, error = %e, "reaping child failed"),
                }
            }
            // No in-process transport to tear down: the verdict only covers
            // the child itself.
            lock(&self.exit_status).is_some()
        })
    }
}

fn convert_status(status: std::process::ExitStatus) -> ExitStatus {
    if let Some(code) = status.code() {
        return ExitStatus(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitStatus(-signal);
        }
    }
    ExitStatus::FAULT
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
