//! REPL – interactive shell for the embedded kernel.
//!
//! Supported slash-commands:
//!   /help       – show this list
//!   /status     – kernel and console status
//!   /interrupt  – cancel the in-flight unit of work
//!   /restart    – restart the kernel with its captured launch arguments
//!   /stop       – shut the kernel down
//!   /save       – persist the active configuration to disk
//!   /quit | /exit – leave the CLI
//!
//! Any other non-empty line is submitted to the kernel as a unit of work and
//! the REPL prints its outcome.

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use alcove_frontend::FrontendHost;
use alcove_manager::KernelManager;
use alcove_types::{EventPayload, ExecutionOutcome, KernelSignal};
use tokio::sync::broadcast::error::TryRecvError;

use crate::config;

/// How long the prompt waits for a result before handing it to the console.
const RESULT_WAIT: Duration = Duration::from_secs(10);

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(
    shutdown: Arc<AtomicBool>,
    manager: &mut KernelManager,
    console: Option<&FrontendHost>,
    cfg: &config::Config,
) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "alcove>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let cmd = line.trim();
        if cmd.is_empty() {
            continue;
        }

        match cmd {
            "/help" => cmd_help(),
            "/status" => cmd_status(manager, console),
            "/interrupt" => cmd_interrupt(manager),
            "/restart" => cmd_restart(manager),
            "/stop" => cmd_stop(manager),
            "/save" => cmd_save(cfg),
            "/quit" | "/exit" => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            other if other.starts_with('/') => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
            }
            code => run_code(manager, code),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Alcove Commands".bold().underline());
    println!("  {}     – kernel and console status", "/status".bold().cyan());
    println!("  {}  – cancel the in-flight unit of work", "/interrupt".bold().cyan());
    println!("  {}    – restart the kernel", "/restart".bold().cyan());
    println!("  {}       – shut the kernel down", "/stop".bold().cyan());
    println!("  {}       – persist the active configuration", "/save".bold().cyan());
    println!("  {}  – leave the CLI", "/quit  /exit".bold().cyan());
    println!("  anything else runs in the embedded kernel");
    println!();
}

fn cmd_status(manager: &mut KernelManager, console: Option<&FrontendHost>) {
    // Reap a kernel that exited on its own so the status is honest.
    if let Some(status) = manager.poll_kernel() {
        println!("  Kernel exited with status {}", status.to_string().yellow());
    }

    println!("{}", "Status".bold().underline());
    match (manager.kernel_id(), manager.kernel_state()) {
        (Some(id), Some(state)) => {
            println!("  Kernel   : {} ({})", id.to_string().bold(), state.to_string().green());
            if let Some(path) = manager.connection_file() {
                println!("  Metadata : {}", path.display().to_string().dimmed());
            }
        }
        (Some(id), None) => {
            println!("  Kernel   : {} ({})", id.to_string().bold(), "external".yellow());
        }
        _ => println!("  Kernel   : {}", "none".red()),
    }
    match console.and_then(|c| c.url_with_token()) {
        Some(url) => println!("  Console  : {}", url.bold()),
        None => println!("  Console  : {}", "not running".dimmed()),
    }
}

fn cmd_interrupt(manager: &KernelManager) {
    match manager.signal_kernel(KernelSignal::Interrupt) {
        // Delivery is best-effort: outside an interruptable window the
        // request is dropped.
        Ok(()) => println!("{}", "Interrupt requested.".yellow()),
        Err(e) => println!("{}: {}", "Interrupt failed".red(), e),
    }
}

fn cmd_restart(manager: &mut KernelManager) {
    print!("  Restarting kernel … ");
    io::stdout().flush().ok();
    match manager.restart() {
        Ok(()) => println!("{}", "OK".green()),
        Err(e) => println!("{}: {}", "failed".red(), e),
    }
}

fn cmd_stop(manager: &mut KernelManager) {
    if !manager.is_active() {
        println!("  No kernel to stop.");
        return;
    }
    let quiet = manager.shutdown_kernel();
    if quiet {
        println!("{}", "  ✓ Kernel stopped; nothing left running.".green());
    } else {
        println!("{}", "  ⚠ Kernel stopped with residue; see the log.".yellow());
    }
}

fn cmd_save(cfg: &config::Config) {
    match config::save(cfg) {
        Ok(()) => println!(
            "  {} Config saved to {}",
            "✓".green().bold(),
            config::config_path().display().to_string().dimmed()
        ),
        Err(e) => println!("{}: {}", "Save failed".red(), e),
    }
}

fn run_code(manager: &mut KernelManager, code: &str) {
    // Subscribe before submitting so the result cannot slip past.
    let mut events = match manager.subscribe() {
        Ok(rx) => rx,
        Err(e) => {
            println!("{}: {}", "Cannot run code".red(), e);
            return;
        }
    };
    let request_id = match manager.submit(code) {
        Ok(id) => id,
        Err(e) => {
            println!("{}: {}", "Cannot run code".red(), e);
            return;
        }
    };

    let deadline = Instant::now() + RESULT_WAIT;
    loop {
        match events.try_recv() {
            Ok(event) => {
                if let EventPayload::ExecuteResult {
                    request_id: got,
                    outcome,
                } = event.payload
                    && got == request_id
                {
                    match outcome {
                        ExecutionOutcome::Completed(value) => println!("{} {}", "⇒".green(), value),
                        ExecutionOutcome::Cancelled => {
                            println!("{} {}", "⇒".yellow(), "cancelled".yellow())
                        }
                        ExecutionOutcome::Failed(reason) => {
                            println!("{} {}: {}", "⇒".red(), "failed".red(), reason)
                        }
                    }
                    return;
                }
            }
            Err(TryRecvError::Empty) => {
                if Instant::now() >= deadline {
                    println!(
                        "{}",
                        "… still running; the result will show up in the console.".dimmed()
                    );
                    return;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => {
                println!("{}", "Kernel stopped before answering.".red());
                return;
            }
        }
    }
}
