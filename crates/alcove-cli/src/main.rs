//! `alcove-cli` – Alcove Command Line Interface
//!
//! This binary is the primary entry point for the Alcove stack. It:
//!
//! 1. Initialises structured logging (see [`alcove_host::telemetry`]).
//! 2. Loads `~/.alcove/config.toml`, falling back to defaults with a notice.
//! 3. Starts the embedded kernel through the [`KernelManager`] and the
//!    console host on its own event-loop thread.
//! 4. Intercepts **Ctrl-C** to leave the REPL and run the ordered shutdown:
//!    kernel `cleanup()` first, console `stop()` after — never concurrently.

mod config;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use alcove_frontend::FrontendHost;
use alcove_manager::KernelManager;
use alcove_types::KernelSpec;

fn main() {
    // Hold the guard for the entire process lifetime; dropping it flushes
    // pending OTel spans.
    let _telemetry = alcove_host::telemetry::init_tracing("alcove");

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            println!(
                "  No config at {}; using defaults ({} persists them).",
                config::config_path().display().to_string().dimmed(),
                "/save".bold()
            );
            config::Config::default()
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!(
            "{}",
            "⚠  Ctrl-C received – leaving the REPL, shutting down …"
                .yellow()
                .bold()
        );
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Kernel ────────────────────────────────────────────────────────────
    let runtime_dir = config::runtime_dir();
    let mut manager = KernelManager::new(&runtime_dir);

    let kernel_type = if manager.is_embedded_type(&cfg.kernel_type) {
        cfg.kernel_type.clone()
    } else {
        println!(
            "  {} '{}' has no embedded engine; starting {} instead.",
            "Kernel type".yellow(),
            cfg.kernel_type.yellow(),
            "echo".bold()
        );
        "echo".to_string()
    };
    let spec = KernelSpec::new(
        kernel_type,
        vec![
            format!("--transport={}", cfg.transport),
            format!("--ip={}", cfg.ip),
        ],
    );

    match manager.start(&spec) {
        Ok(()) => {
            if let Some(id) = manager.kernel_id() {
                println!("  {} Kernel {} running.", "✓".green().bold(), id.to_string().bold());
            }
        }
        Err(e) => {
            println!("{}: {}", "Kernel start failed".red(), e);
        }
    }

    if cfg.record_sessions
        && let Some(transport) = manager.transport()
    {
        let log_path = runtime_dir.join("session.jsonl");
        match transport.attach_writer(&log_path) {
            Ok(()) => println!(
                "  {} Recording session to {}",
                "✓".green().bold(),
                log_path.display().to_string().dimmed()
            ),
            Err(e) => println!("{}: {}", "Session recording failed".red(), e),
        }
    }

    // ── Console host ──────────────────────────────────────────────────────
    let mut console = manager.transport().map(|transport| {
        FrontendHost::new(transport)
            .with_port(cfg.console_port)
            .with_info_file(runtime_dir.join("console-server.json"))
    });
    if let Some(host) = console.as_mut() {
        match host.start() {
            Ok(()) => {
                if let Some(url) = host.url_with_token() {
                    println!("  {} Console at {}", "✓".green().bold(), url.bold().cyan());
                }
            }
            Err(e) => println!("{}: {}", "Console start failed".red(), e),
        }
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(shutdown, &mut manager, console.as_ref(), &cfg);

    // ── Ordered shutdown ──────────────────────────────────────────────────
    // Shutdown barrier: the kernel cleanup must finish before the console
    // host stops; the two must never run concurrently.
    let quiet = manager.shutdown_kernel();
    if let Some(host) = console.as_mut() {
        host.stop();
    }
    if quiet {
        println!("{}", "  ✓ Everything stopped cleanly.".green());
    } else {
        println!("{}", "  ⚠ Shutdown left residue behind; see the log.".yellow());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ___   __                  "#.bold().cyan());
    println!("{}", r#"  / _ | / /______ _  _____   "#.bold().cyan());
    println!("{}", r#" / __ |/ / __/ _ \ |/ / -_)  "#.bold().cyan());
    println!("{}", r#"/_/ |_/_/\__/\___/___/\__/   "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Alcove".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Embedded Execution Kernel Host");
    println!();
}
