//! [`KernelManager`] – embedded-vs-external strategy selection and kernel
//! lifecycle bookkeeping.
//!
//! The manager recognises a kernel-type key when an engine factory is
//! registered for it; those kernels run on an embedded thread behind
//! [`EmbeddedKernel`]. Every other key is launched as a real child process
//! behind [`SubprocessKernel`]. Both sit behind [`ProcessControl`], so
//! nothing downstream of `start()` branches on the mechanism.
//!
//! # Readiness ordering
//!
//! For embedded kernels the connection file is written **before** the handle
//! is marked `Running`: a frontend that observes a running kernel can always
//! read its metadata.
//!
//! # One kernel per manager
//!
//! Running several embedded kernels concurrently in one process is
//! unsupported; the manager is the caller-side guard and refuses `start()`
//! while a kernel is active. A kernel that exited on its own is reaped (and
//! its connection file removed) by the next `poll_kernel()` or `start()`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use alcove_host::{EmbeddedKernel, LaunchArgs, ProcessControl, SubprocessKernel};
use alcove_kernel::{EchoInterpreter, Interpreter};
use alcove_transport::TransportContext;
use alcove_types::{
    AlcoveError, ConnectionInfo, Event, ExecuteRequest, ExitStatus, KernelSignal, KernelSpec,
    KernelState, SigningKey, StateCell,
};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::connection_file;

type EngineFactory = Box<dyn Fn() -> Box<dyn Interpreter> + Send>;

struct ActiveKernel {
    control: Box<dyn ProcessControl>,
    kernel_id: Uuid,
    connection_file: Option<PathBuf>,
    transport: Option<Arc<TransportContext>>,
    state: Option<Arc<StateCell>>,
}

/// Adapter between the kernel-management protocol and the hosting layer.
pub struct KernelManager {
    runtime_dir: PathBuf,
    engines: HashMap<String, EngineFactory>,
    active: Option<ActiveKernel>,
    captured: Option<KernelSpec>,
}

impl KernelManager {
    /// Create a manager writing connection files under `runtime_dir`.
    /// The built-in `"echo"` engine is pre-registered.
    pub fn new(runtime_dir: impl Into<PathBuf>) -> Self {
        let mut manager = Self {
            runtime_dir: runtime_dir.into(),
            engines: HashMap::new(),
            active: None,
            captured: None,
        };
        manager.register_engine("echo", || Box::new(EchoInterpreter));
        manager
    }

    /// Register an embedded engine for `kernel_type`. Kernel types without a
    /// registered engine fall back to the child-process strategy.
    pub fn register_engine<F>(&mut self, kernel_type: &str, factory: F)
    where
        F: Fn() -> Box<dyn Interpreter> + Send + 'static,
    {
        self.engines
            .insert(kernel_type.to_string(), Box::new(factory));
    }

    /// `true` when `kernel_type` would be hosted on an embedded thread.
    pub fn is_embedded_type(&self, kernel_type: &str) -> bool {
        self.engines.contains_key(kernel_type)
    }

    /// Start a kernel for `spec`, capturing the spec for [`restart`].
    ///
    /// # Errors
    ///
    /// [`AlcoveError::AlreadyRunning`] while a kernel is active; startup
    /// errors from the chosen strategy otherwise.
    pub fn start(&mut self, spec: &KernelSpec) -> Result<(), AlcoveError> {
        self.reap_exited();
        if let Some(active) = &self.active {
            return Err(AlcoveError::AlreadyRunning(active.kernel_id.to_string()));
        }

        let active = if self.is_embedded_type(&spec.kernel_type) {
            self.start_embedded(spec)?
        } else {
            self.start_external(spec)?
        };
        info!(
            kernel = %active.kernel_id,
            kernel_type = %spec.kernel_type,
            embedded = active.transport.is_some(),
            "kernel started"
        );
        self.captured = Some(spec.clone());
        self.active = Some(active);
        Ok(())
    }

    /// Stop the active kernel (if any) and start again with the captured
    /// launch arguments.
    pub fn restart(&mut self) -> Result<(), AlcoveError> {
        let spec = self.captured.clone().ok_or(AlcoveError::NotRunning)?;
        if !self.shutdown_kernel() {
            warn!("previous kernel left residue behind; restarting anyway");
        }
        self.start(&spec)
    }

    /// Forward a signal to the active kernel.
    pub fn signal_kernel(&self, signal: KernelSignal) -> Result<(), AlcoveError> {
        let active = self.active.as_ref().ok_or(AlcoveError::NotRunning)?;
        active.control.send_signal(signal);
        Ok(())
    }

    /// Non-blocking exit probe. Returns `Some` exactly once per kernel: when
    /// an exit is observed the kernel is cleaned up and its connection file
    /// removed.
    pub fn poll_kernel(&mut self) -> Option<ExitStatus> {
        self.reap_exited()
    }

    /// Sleep-poll the active kernel for up to `timeout`.
    pub fn wait(&self, timeout: Duration) -> Result<(), AlcoveError> {
        let active = self.active.as_ref().ok_or(AlcoveError::NotRunning)?;
        active.control.wait(timeout);
        Ok(())
    }

    /// Ordered teardown of the active kernel. Returns the liveness verdict;
    /// with no active kernel there is nothing left over, which counts as
    /// success.
    pub fn shutdown_kernel(&mut self) -> bool {
        match self.active.take() {
            Some(active) => {
                let verdict = active.control.cleanup();
                if let Some(path) = &active.connection_file {
                    connection_file::remove(path);
                }
                info!(kernel = %active.kernel_id, verdict, "kernel shut down");
                verdict
            }
            None => true,
        }
    }

    /// Submit one unit of work to the active embedded kernel and return the
    /// request id its result will carry.
    pub fn submit(&self, code: &str) -> Result<Uuid, AlcoveError> {
        let request = ExecuteRequest::new(code);
        let id = request.id;
        self.embedded_transport()?.submit(request)?;
        Ok(id)
    }

    /// Subscribe to the active embedded kernel's outbound events.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<Event>, AlcoveError> {
        Ok(self.embedded_transport()?.subscribe())
    }

    /// Transport context of the active embedded kernel, for wiring a
    /// frontend host.
    pub fn transport(&self) -> Option<Arc<TransportContext>> {
        self.active
            .as_ref()
            .and_then(|a| a.transport.as_ref())
            .map(Arc::clone)
    }

    pub fn kernel_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|a| a.kernel_id)
    }

    /// Lifecycle state of the active embedded kernel; `None` for external
    /// kernels and when nothing is active.
    pub fn kernel_state(&self) -> Option<KernelState> {
        self.active
            .as_ref()
            .and_then(|a| a.state.as_ref())
            .map(|s| s.load())
    }

    pub fn connection_file(&self) -> Option<&Path> {
        self.active
            .as_ref()
            .and_then(|a| a.connection_file.as_deref())
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn start_embedded(&self, spec: &KernelSpec) -> Result<ActiveKernel, AlcoveError> {
        let factory = self
            .engines
            .get(&spec.kernel_type)
            .ok_or_else(|| AlcoveError::UnsupportedKernel(spec.kernel_type.clone()))?;

        let kernel = EmbeddedKernel::start(&spec.argv, &spec.env, factory())?;
        let kernel_id = kernel.handle().id();
        let transport = Arc::clone(kernel.handle().transport());
        let state = Arc::clone(kernel.handle().state_cell());

        let args = LaunchArgs::parse(&spec.argv)?;
        let ports = transport.ports();
        let info = ConnectionInfo {
            transport: args.transport,
            ip: args.ip,
            shell_port: ports.shell,
            iopub_port: ports.iopub,
            hb_port: ports.hb,
            key: SigningKey::new(Uuid::new_v4().to_string()),
            kernel_name: spec.kernel_type.clone(),
        };
        let path = connection_file::write(&self.runtime_dir, kernel_id, &info)?;

        // Metadata is on disk; only now may the kernel report Running.
        kernel.handle().mark_running();

        Ok(ActiveKernel {
            control: Box::new(kernel),
            kernel_id,
            connection_file: Some(path),
            transport: Some(transport),
            state: Some(state),
        })
    }

    fn start_external(&self, spec: &KernelSpec) -> Result<ActiveKernel, AlcoveError> {
        let kernel = SubprocessKernel::spawn(&spec.argv, &spec.env)?;
        Ok(ActiveKernel {
            control: Box::new(kernel),
            kernel_id: Uuid::new_v4(),
            // External kernels own their connection metadata.
            connection_file: None,
            transport: None,
            state: None,
        })
    }

    fn embedded_transport(&self) -> Result<&Arc<TransportContext>, AlcoveError> {
        let active = self.active.as_ref().ok_or(AlcoveError::NotRunning)?;
        active.transport.as_ref().ok_or_else(|| {
            AlcoveError::Channel(
                "active kernel is external; it takes work over its own wire protocol".to_string(),
            )
        })
    }

    fn reap_exited(&mut self) -> Option<ExitStatus> {
        let status = self.active.as_ref().and_then(|a| a.control.poll())?;
        if let Some(active) = self.active.take() {
            active.control.cleanup();
            if let Some(path) = &active.connection_file {
                connection_file::remove(path);
            }
            info!(kernel = %active.kernel_id, %status, "exited kernel reaped");
        }
        Some(status)
    }
}
