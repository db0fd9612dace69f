//! `alcove-frontend` – The Console Host
//!
//! Owns the frontend event-loop thread: a small HTTP + WebSocket server that
//! serves the embedded console page and bridges the kernel's outbound events
//! to every connected browser. Its lifecycle is independent of the kernel
//! thread — the kernel can be restarted under a running console.
//!
//! One ordering constraint is the caller's job: do not call
//! [`FrontendHost::stop`][server::FrontendHost::stop] while a kernel
//! `cleanup()` is in flight; serialise the two through a shutdown barrier.

pub mod server;

pub use server::FrontendHost;
