//! `alcove-transport` – The Messaging Layer
//!
//! Routes traffic between the embedded kernel, the frontend host, and any
//! session recorder, without caring about what the kernel computes.
//!
//! # Modules
//!
//! - [`context`] – [`TransportContext`][context::TransportContext]: the
//!   explicit, `Arc`-shared transport object. It binds the ports, owns the
//!   shell inbox and the outbound broadcast channel, and spawns the
//!   background services below. Exactly one `cleanup` may destroy it.
//! - [`heartbeat`] – [`HeartbeatService`][heartbeat::HeartbeatService]:
//!   a dedicated thread answering TCP echo probes on the heartbeat port so
//!   external monitors can tell the kernel is alive without touching the
//!   shell channel.
//! - [`publisher`] – [`IoPublisher`][publisher::IoPublisher]: a dedicated
//!   thread draining the kernel's outbound queue into the broadcast channel
//!   that frontends subscribe to.
//! - [`writer`] – [`SessionLogWriter`][writer::SessionLogWriter]: an
//!   *optional* background thread appending every published event to a
//!   JSON-lines session log. Stopping an absent writer is a no-op.

pub mod context;
pub mod heartbeat;
pub mod publisher;
pub mod writer;

pub use context::{ConnectionPorts, TransportContext};
pub use heartbeat::HeartbeatService;
pub use publisher::IoPublisher;
pub use writer::SessionLogWriter;
