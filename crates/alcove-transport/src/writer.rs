//! [`SessionLogWriter`] – optional JSON-lines recorder for one session.
//!
//! Subscribes to the broadcast channel and appends every event to a log
//! file, one JSON object per line. The writer is strictly optional: nothing
//! in the kernel lifecycle depends on it, and teardown code treats a missing
//! or already-stopped writer as an already-satisfied postcondition.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use alcove_types::Event;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Poll interval while the channel is empty; bounds how long `stop()` waits.
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Background thread appending published events to a session log file.
pub struct SessionLogWriter {
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl SessionLogWriter {
    /// Open (append) `path` and start recording events from `rx`.
    pub fn spawn(path: &Path, rx: broadcast::Receiver<Event>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("alcove-session-log".to_string())
            .spawn(move || record_loop(file, rx, stop_flag))?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Stop recording and join the thread. Idempotent.
    pub fn stop(&mut self) -> bool {
        self.stop.store(true, Ordering::Release);
        match self.thread.take() {
            Some(handle) => {
                if handle.join().is_err() {
                    warn!("session log writer panicked during stop");
                }
                true
            }
            None => true,
        }
    }
}

fn record_loop(file: File, mut rx: broadcast::Receiver<Event>, stop: Arc<AtomicBool>) {
    let mut out = BufWriter::new(file);
    loop {
        match rx.try_recv() {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(line) => {
                    if writeln!(out, "{line}").is_err() {
                        warn!("session log write failed; recorder exiting");
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "session log serialization failed"),
            },
            Err(broadcast::error::TryRecvError::Empty) => {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                std::thread::sleep(DRAIN_POLL);
            }
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                warn!(lagged_by = n, "session log fell behind; events dropped");
            }
            Err(broadcast::error::TryRecvError::Closed) => break,
        }
    }
    if out.flush().is_err() {
        warn!("session log final flush failed");
    }
    debug!("session log recorder exited");
}
