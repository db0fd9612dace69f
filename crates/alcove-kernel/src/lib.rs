//! `alcove-kernel` – The Embedded Execution Engine
//!
//! The code that actually runs on the dedicated kernel thread, plus the two
//! small primitives the controller uses to reason about it from outside.
//!
//! # Modules
//!
//! - [`interrupt_gate`] – [`InterruptGate`][interrupt_gate::InterruptGate]:
//!   the two-state cancellation-eligibility flag. Written only by the kernel
//!   thread at unit-of-work boundaries, read only by the controller deciding
//!   whether an interrupt may be delivered.
//! - [`cancel`] – [`CancelToken`][cancel::CancelToken]: the cooperative
//!   cancellation token the controller raises into the kernel thread's
//!   execution context; interpreters observe it at their safe checkpoints.
//! - [`interpreter`] – [`Interpreter`][interpreter::Interpreter]: the seam
//!   between the hosting machinery and the engine that evaluates units of
//!   work. [`EchoInterpreter`][interpreter::EchoInterpreter] is the built-in
//!   reference engine.
//! - [`core`] – [`KernelCore`][core::KernelCore]: the blocking run loop.
//!   Receives shell messages, brackets every unit of work with gate
//!   transitions and busy/idle status events, and leaves with a
//!   process-style exit status.

pub mod cancel;
pub mod core;
pub mod interpreter;
pub mod interrupt_gate;

pub use cancel::CancelToken;
pub use core::KernelCore;
pub use interpreter::{EchoInterpreter, Interpreter};
pub use interrupt_gate::InterruptGate;
