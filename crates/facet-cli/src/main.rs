//! `facetctl` – interactive personality lifecycle shell
//!
//! 1. Initialises tracing (optionally exporting spans over OTLP).
//! 2. Loads the card description from `~/.facet/card.toml`, writing the
//!    built-in default card there on first run.
//! 3. Registers every device and drops the user into a REPL.
//! 4. On `/quit`, EOF or Ctrl-C, unregisters every device before exiting.

mod card;
mod config;
mod repl;
mod telemetry;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use crate::card::Card;

fn main() {
    let _telemetry = telemetry::init_tracing("facetctl");

    print_banner();

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!(
            "{}",
            "⚠  Ctrl-C received – press Enter to unregister devices and exit …"
                .yellow()
                .bold()
        );
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Card loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => first_run(),
        Err(e) => {
            println!("{}: {}", "Card error".red(), e);
            println!("  Using the built-in default card.");
            config::Config::default()
        }
    };

    let mut card = Card::build(&cfg);
    print!("  Registering {} device(s) … ", card.devices.len());
    let failures = card.register_all();
    if failures.is_empty() {
        println!("{}", "OK".green());
    } else {
        println!("{}", "PARTIAL".yellow());
        for (dev, e) in &failures {
            println!("    {} {}: {}", "✗".red(), dev.bold(), e);
        }
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    repl::run(&mut card, shutdown);

    card.shutdown();
    println!("{}", "  ✓ All devices unregistered.".green());
}

/// Write the default card so the user has a file to edit next time.
fn first_run() -> config::Config {
    let mut cfg = config::Config::default();
    config::apply_env_overrides(&mut cfg);
    match config::save(&cfg) {
        Ok(()) => println!(
            "  {} Default card written to {}",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving card".red(), e),
    }
    cfg
}

fn print_banner() {
    println!();
    println!(
        "  {} {}",
        "facetctl".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Device personality lifecycle manager");
    println!();
}
