//! `alcove-host` – Thread Hosting & Process Facade
//!
//! Runs the embedded kernel on a dedicated OS thread and presents that
//! thread to kernel-management code as if it were a child process.
//!
//! # Modules
//!
//! - [`runner`] – [`KernelThreadRunner`][runner::KernelThreadRunner]:
//!   spawns the kernel thread, scrubs the inherited environment, binds the
//!   transport, and reports init success or failure synchronously to the
//!   caller through a one-shot channel.
//! - [`handle`] – [`KernelHandle`][handle::KernelHandle]: the owned thread
//!   handle plus the shared state cell, interrupt gate, cancellation token,
//!   and transport context. At most one live thread per handle.
//! - [`control`] – [`ProcessControl`][control::ProcessControl]: the
//!   process-facade contract (`poll` / `send_signal` / `wait` / `cleanup`),
//!   and [`EmbeddedKernel`][control::EmbeddedKernel], its thread-backed
//!   implementation. Manager logic depends only on the trait, never on the
//!   backing mechanism.
//! - [`subprocess`] – [`SubprocessKernel`][subprocess::SubprocessKernel]:
//!   the real-child-process implementation of the same contract, used for
//!   kernel types the host cannot embed.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with an optional OTLP span exporter.

pub mod control;
pub mod handle;
pub mod runner;
pub mod subprocess;
pub mod telemetry;

pub use control::{EmbeddedKernel, ProcessControl, ShutdownReport};
pub use handle::KernelHandle;
pub use runner::{KernelThreadRunner, LaunchArgs, scrubbed_environment};
pub use subprocess::SubprocessKernel;
pub use telemetry::{TracerProviderGuard, init_tracing};
