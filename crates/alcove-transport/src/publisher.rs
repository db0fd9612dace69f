//! [`IoPublisher`] – the outbound-publishing thread.
//!
//! The kernel loop hands every [`Event`] it produces to an unbounded queue
//! and immediately returns to its work; this thread drains the queue into
//! the broadcast channel that frontends, session writers, and tests
//! subscribe to. Slow subscribers lag on the broadcast side and never
//! back-pressure the kernel.
//!
//! The thread exits once every queue sender has been dropped, after draining
//! whatever is still buffered, so no event published before a stop is lost.

use alcove_types::Event;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Fan-out thread between the kernel's outbound queue and the broadcast
/// channel.
pub struct IoPublisher {
    thread: Option<std::thread::JoinHandle<()>>,
}

impl IoPublisher {
    /// Start draining `outbound` into `iopub` on a dedicated thread.
    pub fn spawn(
        mut outbound: mpsc::UnboundedReceiver<Event>,
        iopub: broadcast::Sender<Event>,
    ) -> std::io::Result<Self> {
        let thread = std::thread::Builder::new()
            .name("alcove-iopub".to_string())
            .spawn(move || {
                while let Some(event) = outbound.blocking_recv() {
                    // Err means no live subscriber, which is a normal state.
                    let _ = iopub.send(event);
                }
                debug!("outbound queue closed; publisher exiting");
            })?;
        Ok(Self {
            thread: Some(thread),
        })
    }

    /// Join the publisher thread.
    ///
    /// The caller must have dropped every outbound sender first, otherwise
    /// this blocks until one is dropped. Idempotent.
    pub fn stop(&mut self) -> bool {
        match self.thread.take() {
            Some(handle) => {
                if handle.join().is_err() {
                    warn!("outbound publisher thread panicked during stop");
                }
                true
            }
            None => true,
        }
    }

    /// `true` while the drain thread has not been joined.
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }
}
