//! [`TransportContext`] – the explicit, shared transport object for one
//! embedded kernel.
//!
//! Earlier designs of this kind of hosting layer keep the transport state in
//! a process-wide singleton torn down ambiently at exit. Here the context is
//! an explicit object: created while the kernel thread initialises, shared by
//! `Arc` with everything that produces or consumes kernel traffic, and torn
//! down in a deterministic order by the control surface. The context refuses
//! double destruction, so only one in-flight cleanup can take it apart.
//!
//! # Channels
//!
//! | Channel | Producer | Consumer |
//! |---|---|---|
//! | shell inbox | frontends, control surface | kernel run loop |
//! | outbound queue | kernel run loop | [`IoPublisher`] thread |
//! | iopub broadcast | [`IoPublisher`] | frontends, writer, tests |
//! | heartbeat TCP | external monitors | [`HeartbeatService`] thread |

use std::net::TcpListener;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use alcove_types::{AlcoveError, Event, ExecuteRequest, KernelMessage};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::heartbeat::HeartbeatService;
use crate::publisher::IoPublisher;
use crate::writer::SessionLogWriter;

/// Broadcast buffer per subscriber before old events are dropped.
const IOPUB_CAPACITY: usize = 256;

/// Ports advertised in the connection file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionPorts {
    pub shell: u16,
    pub iopub: u16,
    pub hb: u16,
}

/// Shared transport state for one embedded kernel. See the module docs.
pub struct TransportContext {
    shell_tx: Mutex<Option<mpsc::UnboundedSender<KernelMessage>>>,
    kernel_inbox: Mutex<Option<mpsc::UnboundedReceiver<KernelMessage>>>,
    outbound_tx: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    iopub: broadcast::Sender<Event>,
    heartbeat: Mutex<Option<HeartbeatService>>,
    publisher: Mutex<Option<IoPublisher>>,
    writer: Mutex<Option<SessionLogWriter>>,
    ports: ConnectionPorts,
    // Held so the shell/iopub ports advertised in the connection file stay
    // reserved for the wire-level collaborator; framing happens elsewhere.
    _shell_listener: TcpListener,
    _iopub_listener: TcpListener,
    destroyed: AtomicBool,
}

impl TransportContext {
    /// Bind the kernel's ports on `ip` and start the background services.
    ///
    /// Only the `"tcp"` transport is supported. All ports are ephemeral;
    /// the chosen values are reported by [`TransportContext::ports`].
    ///
    /// # Errors
    ///
    /// [`AlcoveError::Startup`] when the transport is unsupported or any
    /// socket cannot be bound — the canonical init failure reported back to
    /// the caller of `start()`.
    pub fn bind(transport: &str, ip: &str) -> Result<Self, AlcoveError> {
        if transport != "tcp" {
            return Err(AlcoveError::Startup(format!(
                "unsupported transport '{transport}' (only tcp)"
            )));
        }

        let bind_one = |name: &str| -> Result<TcpListener, AlcoveError> {
            TcpListener::bind((ip, 0)).map_err(|e| {
                AlcoveError::Startup(format!("could not bind {name} port on {ip}: {e}"))
            })
        };
        let shell_listener = bind_one("shell")?;
        let iopub_listener = bind_one("iopub")?;
        let hb_listener = bind_one("heartbeat")?;

        let port_of = |l: &TcpListener, name: &str| -> Result<u16, AlcoveError> {
            l.local_addr()
                .map(|a| a.port())
                .map_err(|e| AlcoveError::Startup(format!("no local addr for {name}: {e}")))
        };
        let ports = ConnectionPorts {
            shell: port_of(&shell_listener, "shell")?,
            iopub: port_of(&iopub_listener, "iopub")?,
            hb: port_of(&hb_listener, "heartbeat")?,
        };

        let (shell_tx, kernel_inbox) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (iopub, _) = broadcast::channel(IOPUB_CAPACITY);

        let heartbeat = HeartbeatService::spawn(hb_listener)
            .map_err(|e| AlcoveError::Startup(format!("heartbeat service: {e}")))?;
        let publisher = IoPublisher::spawn(outbound_rx, iopub.clone())
            .map_err(|e| AlcoveError::Startup(format!("outbound publisher: {e}")))?;

        info!(
            shell = ports.shell,
            iopub = ports.iopub,
            hb = ports.hb,
            "transport context bound"
        );

        Ok(Self {
            shell_tx: Mutex::new(Some(shell_tx)),
            kernel_inbox: Mutex::new(Some(kernel_inbox)),
            outbound_tx: Mutex::new(Some(outbound_tx)),
            iopub,
            heartbeat: Mutex::new(Some(heartbeat)),
            publisher: Mutex::new(Some(publisher)),
            writer: Mutex::new(None),
            ports,
            _shell_listener: shell_listener,
            _iopub_listener: iopub_listener,
            destroyed: AtomicBool::new(false),
        })
    }

    /// Ports to advertise in the connection file.
    pub fn ports(&self) -> ConnectionPorts {
        self.ports
    }

    /// Submit one unit of work to the kernel's shell inbox.
    pub fn submit(&self, request: ExecuteRequest) -> Result<(), AlcoveError> {
        self.send_kernel(KernelMessage::Execute(request))
    }

    /// Send a raw message to the kernel's shell inbox. Used by the control
    /// surface for shutdown messages.
    pub fn send_kernel(&self, message: KernelMessage) -> Result<(), AlcoveError> {
        match lock(&self.shell_tx).as_ref() {
            Some(tx) => tx
                .send(message)
                .map_err(|e| AlcoveError::Channel(format!("shell inbox closed: {e}"))),
            None => Err(AlcoveError::Channel(
                "transport context destroyed".to_string(),
            )),
        }
    }

    /// Hand the shell inbox receiver to the kernel thread. Yields `Some`
    /// exactly once.
    pub fn take_kernel_inbox(&self) -> Option<mpsc::UnboundedReceiver<KernelMessage>> {
        lock(&self.kernel_inbox).take()
    }

    /// Publish an event onto the outbound queue.
    pub fn publish(&self, event: Event) -> Result<(), AlcoveError> {
        match lock(&self.outbound_tx).as_ref() {
            Some(tx) => tx
                .send(event)
                .map_err(|e| AlcoveError::Channel(format!("outbound queue closed: {e}"))),
            None => Err(AlcoveError::Channel(
                "transport context destroyed".to_string(),
            )),
        }
    }

    /// Subscribe to the iopub broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.iopub.subscribe()
    }

    /// Attach the optional session log writer.
    ///
    /// # Errors
    ///
    /// [`AlcoveError::Channel`] when a writer is already attached,
    /// [`AlcoveError::Startup`] when the log file cannot be opened.
    pub fn attach_writer(&self, path: &Path) -> Result<(), AlcoveError> {
        let mut slot = lock(&self.writer);
        if slot.is_some() {
            return Err(AlcoveError::Channel(
                "session log writer already attached".to_string(),
            ));
        }
        let writer = SessionLogWriter::spawn(path, self.iopub.subscribe())
            .map_err(|e| AlcoveError::Startup(format!("session log writer: {e}")))?;
        *slot = Some(writer);
        Ok(())
    }

    /// Stop the heartbeat echo thread. Idempotent.
    pub fn stop_heartbeat(&self) -> bool {
        match lock(&self.heartbeat).as_mut() {
            Some(hb) => hb.stop(),
            None => true,
        }
    }

    /// Stop the outbound-publishing thread, draining buffered events first.
    /// Idempotent.
    pub fn stop_publisher(&self) -> bool {
        // The drain loop exits when the last outbound sender drops.
        lock(&self.outbound_tx).take();
        match lock(&self.publisher).as_mut() {
            Some(p) => p.stop(),
            None => true,
        }
    }

    /// Best-effort stop of the optional session log writer. An absent or
    /// already-stopped writer counts as success.
    pub fn stop_writer(&self) -> bool {
        match lock(&self.writer).take() {
            Some(mut w) => w.stop(),
            None => true,
        }
    }

    /// Destroy the context: close the remaining channels so every producer
    /// and consumer sees shutdown.
    ///
    /// Returns `true` for the caller that actually performed the
    /// destruction; `false` for everyone who arrives later.
    pub fn destroy(&self) -> bool {
        if self
            .destroyed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("transport context already destroyed");
            return false;
        }
        lock(&self.shell_tx).take();
        lock(&self.outbound_tx).take();
        lock(&self.kernel_inbox).take();
        info!("transport context destroyed");
        true
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alcove_types::{EventPayload, ExecutionState};

    fn bound() -> TransportContext {
        TransportContext::bind("tcp", "127.0.0.1").expect("bind")
    }

    #[test]
    fn bind_rejects_unknown_transport() {
        let result = TransportContext::bind("ipc", "127.0.0.1");
        assert!(matches!(result, Err(AlcoveError::Startup(_))));
    }

    #[test]
    fn bind_allocates_three_distinct_ports() {
        let ctx = bound();
        let p = ctx.ports();
        assert_ne!(p.shell, 0);
        assert_ne!(p.shell, p.iopub);
        assert_ne!(p.iopub, p.hb);
        assert_ne!(p.shell, p.hb);
    }

    #[test]
    fn submitted_requests_reach_the_kernel_inbox() {
        let ctx = bound();
        let mut inbox = ctx.take_kernel_inbox().expect("inbox");

        let request = ExecuteRequest::new("1 + 1");
        ctx.submit(request.clone()).expect("submit");

        match inbox.blocking_recv() {
            Some(KernelMessage::Execute(got)) => assert_eq!(got.id, request.id),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn kernel_inbox_can_only_be_taken_once() {
        let ctx = bound();
        assert!(ctx.take_kernel_inbox().is_some());
        assert!(ctx.take_kernel_inbox().is_none());
    }

    #[test]
    fn published_events_reach_subscribers() {
        let ctx = bound();
        let mut sub = ctx.subscribe();

        let event = Event::new(
            "alcove-transport::test",
            EventPayload::Status {
                state: ExecutionState::Busy,
            },
        );
        ctx.publish(event.clone()).expect("publish");

        let received = sub.blocking_recv().expect("recv");
        assert_eq!(received.id, event.id);
    }

    #[test]
    fn destroy_is_claimed_by_exactly_one_caller() {
        let ctx = bound();
        assert!(ctx.destroy());
        assert!(!ctx.destroy());
        assert!(ctx.is_destroyed());
    }

    #[test]
    fn submit_after_destroy_is_an_error() {
        let ctx = bound();
        ctx.destroy();
        let result = ctx.submit(ExecuteRequest::new("too late"));
        assert!(matches!(result, Err(AlcoveError::Channel(_))));
    }

    #[test]
    fn publish_after_destroy_is_an_error() {
        let ctx = bound();
        ctx.destroy();
        let event = Event::new(
            "alcove-transport::test",
            EventPayload::ServerNotice("late".to_string()),
        );
        assert!(matches!(
            ctx.publish(event),
            Err(AlcoveError::Channel(_))
        ));
    }

    #[test]
    fn stop_writer_without_writer_is_satisfied() {
        let ctx = bound();
        assert!(ctx.stop_writer());
    }

    #[test]
    fn attach_writer_twice_is_rejected() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("session.jsonl");

        let ctx = bound();
        ctx.attach_writer(&path).expect("first attach");
        assert!(matches!(
            ctx.attach_writer(&path),
            Err(AlcoveError::Channel(_))
        ));
        assert!(ctx.stop_writer());
    }

    #[test]
    fn ordered_teardown_stops_every_service() {
        let ctx = bound();
        assert!(ctx.stop_heartbeat());
        assert!(ctx.stop_publisher());
        assert!(ctx.stop_writer());
        assert!(ctx.destroy());
    }

    #[test]
    fn stop_publisher_is_idempotent() {
        let ctx = bound();
        assert!(ctx.stop_publisher());
        assert!(ctx.stop_publisher());
    }
}
