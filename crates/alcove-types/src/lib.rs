use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Signals accepted by a kernel control surface.
///
/// The set is closed: any other value is outside the contract and may be
/// ignored by an implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelSignal {
    /// Cooperative cancellation of the in-flight unit of work. Delivered only
    /// while the kernel is inside an interruptable window; dropped otherwise.
    Interrupt,
    /// Best-effort stop of the kernel event loop with a clean exit status.
    Terminate,
    /// Best-effort stop of the kernel event loop, reported like a killed
    /// child process.
    Kill,
}

impl std::fmt::Display for KernelSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelSignal::Interrupt => write!(f, "interrupt"),
            KernelSignal::Terminate => write!(f, "terminate"),
            KernelSignal::Kill => write!(f, "kill"),
        }
    }
}

/// Exit status reported by a kernel once its backing thread or process has
/// stopped.
///
/// The conventions are those of a child process, because the control surface
/// emulates one: `0` for a clean stop, `-9` for a kill, `101` for a kernel
/// thread that died in a panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus(pub i32);

impl ExitStatus {
    /// Clean stop: natural completion or a delivered `Terminate`.
    pub const CLEAN: ExitStatus = ExitStatus(0);
    /// Stopped by `Kill`; mirrors the negative-signal convention of `Popen`.
    pub const KILLED: ExitStatus = ExitStatus(-9);
    /// The kernel thread panicked. No payload crosses the thread boundary.
    pub const FAULT: ExitStatus = ExitStatus(101);

    pub fn is_clean(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of one kernel handle.
///
/// `Created → Starting → Running → (Interrupting → Running)* → Stopping →
/// Stopped`. `Stopping` is reachable from `Starting` (init failure) as well
/// as `Running`; `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum KernelState {
    Created = 0,
    Starting = 1,
    Running = 2,
    Interrupting = 3,
    Stopping = 4,
    Stopped = 5,
}

impl KernelState {
    /// `true` once no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, KernelState::Stopped)
    }
}

impl From<u8> for KernelState {
    fn from(v: u8) -> Self {
        match v {
            0 => KernelState::Created,
            1 => KernelState::Starting,
            2 => KernelState::Running,
            3 => KernelState::Interrupting,
            4 => KernelState::Stopping,
            _ => KernelState::Stopped,
        }
    }
}

impl std::fmt::Display for KernelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            KernelState::Created => "created",
            KernelState::Starting => "starting",
            KernelState::Running => "running",
            KernelState::Interrupting => "interrupting",
            KernelState::Stopping => "stopping",
            KernelState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Atomic holder for a [`KernelState`], shared between the controller and the
/// kernel thread.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: KernelState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> KernelState {
        KernelState::from(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: KernelState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Transition `from → to`; returns `false` when another thread got there
    /// first and the cell no longer holds `from`.
    pub fn advance(&self, from: KernelState, to: KernelState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(KernelState::Created)
    }
}

/// One unit of work submitted to the kernel over the shell channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub id: Uuid,
    pub code: String,
}

impl ExecuteRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.into(),
        }
    }
}

/// Result of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value")]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOutcome {
    /// The interpreter ran to completion and produced a textual result.
    Completed(String),
    /// The unit of work observed a raised cancellation token and aborted.
    Cancelled,
    /// The interpreter reported an error.
    Failed(String),
}

/// Coarse execution state published on the outbound channel around every unit
/// of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Starting,
    Busy,
    Idle,
}

/// Message consumed by the kernel run loop.
#[derive(Debug, Clone)]
pub enum KernelMessage {
    Execute(ExecuteRequest),
    Shutdown(ShutdownMode),
}

/// How the kernel loop was asked to stop; determines the exit status it
/// reports through the process facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Terminate,
    Kill,
}

impl ShutdownMode {
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            ShutdownMode::Terminate => ExitStatus::CLEAN,
            ShutdownMode::Kill => ExitStatus::KILLED,
        }
    }
}

/// Unified event wrapper for the outbound (iopub) channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "alcove-kernel::core"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the outbound channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// Kernel entered `Busy`/`Idle` around a unit of work.
    Status { state: ExecutionState },
    /// Outcome of a completed, cancelled, or failed unit of work.
    ExecuteResult {
        request_id: Uuid,
        outcome: ExecutionOutcome,
    },
    /// Frontend host lifecycle notices (started, stopping).
    ServerNotice(String),
}

/// Signing key embedded in the connection file. Zeroed on drop and redacted
/// from `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SigningKey(String);

impl SigningKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            write!(f, "SigningKey(<not set>)")
        } else {
            write!(f, "SigningKey(<redacted>)")
        }
    }
}

/// Connection metadata written for the frontend collaborator before a kernel
/// reports `Running`. The file format is owned by that collaborator; this
/// struct documents it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConnectionInfo {
    /// Transport selector, e.g. "tcp".
    pub transport: String,
    /// Bind address, e.g. "127.0.0.1".
    pub ip: String,
    pub shell_port: u16,
    pub iopub_port: u16,
    pub hb_port: u16,
    pub key: SigningKey,
    pub kernel_name: String,
}

/// Launch recipe consumed by the kernel manager; captured verbatim so
/// `restart()` can replay it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct KernelSpec {
    /// Kernel-type key used for strategy selection, e.g. "echo".
    pub kernel_type: String,
    pub argv: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl KernelSpec {
    pub fn new(kernel_type: impl Into<String>, argv: Vec<String>) -> Self {
        Self {
            kernel_type: kernel_type.into(),
            argv,
            env: HashMap::new(),
        }
    }
}

/// Global error type spanning kernel startup, transport plumbing, and the
/// manager's bookkeeping.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum AlcoveError {
    #[error("Kernel Startup Failed: {0}")]
    Startup(String),

    #[error("Transport Channel Error: {0}")]
    Channel(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Connection File Error at {path}: {reason}")]
    ConnectionFile { path: String, reason: String },

    #[error("Unsupported Kernel Type: {0}")]
    UnsupportedKernel(String),

    #[error("A Kernel Is Already Active: {0}")]
    AlreadyRunning(String),

    #[error("No Active Kernel")]
    NotRunning,
}
