//! [`HeartbeatService`] – TCP echo keepalive for one kernel.
//!
//! External monitors probe kernel liveness by connecting to the heartbeat
//! port and expecting their bytes echoed back. The service runs on its own
//! thread so a wedged kernel loop never makes the kernel look dead, and a
//! flood of probes never slows the kernel loop down.
//!
//! The accept loop polls a non-blocking listener so that [`HeartbeatService::stop`]
//! can take effect within one poll interval even when no probe ever arrives.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

/// Poll interval of the accept loop; bounds how long `stop()` can take.
const ACCEPT_POLL: Duration = Duration::from_millis(25);

/// Read timeout on an accepted probe connection, so a silent client cannot
/// pin the service past `stop()`.
const PROBE_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Echo server thread bound to the kernel's heartbeat port.
pub struct HeartbeatService {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    port: u16,
}

impl HeartbeatService {
    /// Take ownership of an already-bound listener and start answering
    /// probes on a dedicated thread.
    pub fn spawn(listener: TcpListener) -> std::io::Result<Self> {
        let port = listener.local_addr()?.port();
        listener.set_nonblocking(true)?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("alcove-heartbeat".to_string())
            .spawn(move || accept_loop(listener, stop_flag))?;

        Ok(Self {
            stop,
            thread: Some(thread),
            port,
        })
    }

    /// The bound heartbeat port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop the service and join its thread.
    ///
    /// Idempotent: a second call returns `true` immediately.
    pub fn stop(&mut self) -> bool {
        self.stop.store(true, Ordering::Release);
        match self.thread.take() {
            Some(handle) => {
                if handle.join().is_err() {
                    warn!("heartbeat thread panicked during stop");
                }
                true
            }
            None => true,
        }
    }

    /// `true` while the echo thread has not been joined.
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }
}

fn accept_loop(listener: TcpListener, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((mut stream, peer)) => {
                debug!(%peer, "heartbeat probe connected");
                // Accepted sockets inherit non-blocking mode on some platforms.
                if stream.set_nonblocking(false).is_err()
                    || stream.set_read_timeout(Some(PROBE_READ_TIMEOUT)).is_err()
                {
                    continue;
                }
                echo_until_closed(&mut stream, &stop);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                warn!(error = %e, "heartbeat accept failed; service exiting");
                break;
            }
        }
    }
}

/// Echo bytes back to one probe connection until it closes, errors, or the
/// service is asked to stop.
fn echo_until_closed(stream: &mut std::net::TcpStream, stop: &AtomicBool) {
    let mut buf = [0u8; 512];
    loop {
        if stop.load(Ordering::Acquire) {
            return;
        }
        match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                if stream.write_all(&buf[..n]).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                // Read timeout: re-check the stop flag, keep the probe open.
                continue;
            }
            Err(_) => return,
        }
    }
}
