//! REPL – interactive shell over a simulated [`Card`].
//!
//! Supported slash-commands:
//!   /help                              – show this list
//!   /devices                           – list devices and their personalities
//!   /status [dev]                      – flags and slots of one or all devices
//!   /attach <dev>                      – create and resume personalities
//!   /detach <dev> [suspend]            – tear down, optionally suspending
//!   /rescan <dev>                      – reconcile with caps and params
//!   /register <dev> | /unregister <dev>
//!   /lightweight <dev>                 – enter lightweight mode
//!   /set <dev> <param> <on|off>        – change a driver-init parameter
//!   /ib <dev> <on|off>                 – allow or suppress RDMA personalities
//!   /mode <dev> <legacy|switchdev>     – change the eswitch mode
//!   /offline <dev> <on|off>            – make capability reads fail
//!   /unbind <dev> <label>              – unbind a child's driver by hand
//!   /events                            – print lifecycle events since last call
//!   /quit | /exit                      – unregister everything and exit

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use facet_types::{EswitchMode, FacetError, FeatureId, LifecycleEventKind, ParamId};

use crate::card::Card;

/// A parsed REPL command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Devices,
    Status(Option<String>),
    Attach(String),
    Detach { dev: String, suspend: bool },
    Rescan(String),
    Register(String),
    Unregister(String),
    Lightweight(String),
    Set { dev: String, param: ParamId, value: bool },
    Ib { dev: String, disabled: bool },
    Mode { dev: String, mode: EswitchMode },
    Offline { dev: String, offline: bool },
    Unbind { dev: String, feature: FeatureId },
    Events,
    Quit,
}

fn parse_switch(word: &str) -> Result<bool, String> {
    match word {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => Err(format!("expected on|off, got '{other}'")),
    }
}

impl Command {
    /// Parse one input line.
    pub fn parse(line: &str) -> Result<Self, String> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&head, args)) = words.split_first() else {
            return Err("empty command".to_string());
        };

        let dev = |i: usize| -> Result<String, String> {
            args.get(i)
                .map(|s| s.to_string())
                .ok_or_else(|| format!("{head} needs a device name"))
        };
        let arg = |i: usize, what: &str| -> Result<&str, String> {
            args.get(i)
                .copied()
                .ok_or_else(|| format!("{head} needs {what}"))
        };

        let cmd = match head {
            "/help" => Command::Help,
            "/devices" => Command::Devices,
            "/status" => Command::Status(args.first().map(|s| s.to_string())),
            "/attach" => Command::Attach(dev(0)?),
            "/detach" => {
                let suspend = match args.get(1) {
                    None => false,
                    Some(&"suspend") => true,
                    Some(other) => return Err(format!("unexpected argument '{other}'")),
                };
                Command::Detach { dev: dev(0)?, suspend }
            }
            "/rescan" => Command::Rescan(dev(0)?),
            "/register" => Command::Register(dev(0)?),
            "/unregister" => Command::Unregister(dev(0)?),
            "/lightweight" => Command::Lightweight(dev(0)?),
            "/set" => {
                let name = arg(1, "a parameter name")?;
                let param = ParamId::from_name(name)
                    .ok_or_else(|| format!("unknown parameter '{name}'"))?;
                Command::Set {
                    dev: dev(0)?,
                    param,
                    value: parse_switch(arg(2, "on|off")?)?,
                }
            }
            "/ib" => Command::Ib {
                dev: dev(0)?,
                disabled: !parse_switch(arg(1, "on|off")?)?,
            },
            "/mode" => {
                let mode = match arg(1, "legacy|switchdev")? {
                    "legacy" => EswitchMode::Legacy,
                    "switchdev" => EswitchMode::Switchdev,
                    other => return Err(format!("unknown eswitch mode '{other}'")),
                };
                Command::Mode { dev: dev(0)?, mode }
            }
            "/offline" => Command::Offline {
                dev: dev(0)?,
                offline: parse_switch(arg(1, "on|off")?)?,
            },
            "/unbind" => {
                let label = arg(1, "a personality label")?;
                let feature = FeatureId::from_label(label)
                    .ok_or_else(|| format!("unknown personality '{label}'"))?;
                Command::Unbind { dev: dev(0)?, feature }
            }
            "/events" => Command::Events,
            "/quit" | "/exit" => Command::Quit,
            other => return Err(format!("unknown command '{other}'")),
        };
        Ok(cmd)
    }
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits.
pub fn run(card: &mut Card, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "facetctl>".bold().cyan());
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

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match Command::parse(input) {
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Ok(cmd) => {
                if let Err(e) = execute(card, &cmd) {
                    println!("{} {}", "Error:".red().bold(), e);
                }
            }
            Err(e) => {
                println!(
                    "{} {}. Type {} for available commands.",
                    "Invalid input:".red(),
                    e.yellow(),
                    "/help".bold()
                );
            }
        }
    }
}

/// Run one command against `card`.
pub fn execute(card: &mut Card, cmd: &Command) -> Result<(), FacetError> {
    match cmd {
        Command::Help => cmd_help(),
        Command::Devices => cmd_devices(card),
        Command::Status(dev) => cmd_status(card, dev.as_deref())?,
        Command::Attach(dev) => {
            let d = card.device(dev)?;
            let _registry = card.registry.lock();
            d.dev.attach()?;
            ok(format!("{dev} attached"));
        }
        Command::Detach { dev, suspend } => {
            let d = card.device(dev)?;
            let _registry = card.registry.lock();
            d.dev.detach(*suspend);
            ok(format!("{dev} detached"));
        }
        Command::Rescan(dev) => {
            let d = card.device(dev)?;
            let _registry = card.registry.lock();
            d.dev.rescan()?;
            ok(format!("{dev} rescanned"));
        }
        Command::Register(dev) => {
            let d = card.device(dev)?;
            let _registry = card.registry.lock();
            d.dev.register_device()?;
            ok(format!("{dev} registered"));
        }
        Command::Unregister(dev) => {
            let d = card.device(dev)?;
            let _registry = card.registry.lock();
            d.dev.unregister_device();
            ok(format!("{dev} unregistered"));
        }
        Command::Lightweight(dev) => {
            card.device(dev)?.dev.set_lightweight();
            ok(format!("{dev} is lightweight; /rescan to apply"));
        }
        Command::Set { dev, param, value } => {
            card.device(dev)?.params.set(*param, *value);
            ok(format!("{dev}: {param} = {value}; /rescan to apply"));
        }
        Command::Ib { dev, disabled } => {
            card.device(dev)?.dev.set_ib_disabled(*disabled);
            let state = if *disabled { "suppressed" } else { "allowed" };
            ok(format!("{dev}: RDMA {state}; /rescan to apply"));
        }
        Command::Mode { dev, mode } => {
            card.device(dev)?.caps.update(|c| c.eswitch_mode = *mode);
            ok(format!("{dev}: eswitch mode {mode:?}; /rescan to apply"));
        }
        Command::Offline { dev, offline } => {
            card.device(dev)?.caps.set_offline(*offline);
            ok(format!("{dev}: capability reads offline = {offline}"));
        }
        Command::Unbind { dev, feature } => {
            let Some(child) = card.device(dev)?.dev.child(*feature) else {
                println!("  {} has no {} child", dev.yellow(), feature);
                return Ok(());
            };
            if card.bus.unbind(child.name()) {
                ok(format!("driver unbound from {}", child.name()));
            } else {
                println!("  {} has no bound driver", child.name().yellow());
            }
        }
        Command::Events => cmd_events(card),
        Command::Quit => {}
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn ok(msg: String) {
    println!("  {} {}", "✓".green().bold(), msg);
}

fn cmd_help() {
    println!();
    println!("{}", "facetctl Commands".bold().underline());
    let rows = [
        ("/devices", "list devices and their personalities"),
        ("/status [dev]", "flags and slots"),
        ("/attach <dev>", "create and resume personalities"),
        ("/detach <dev> [suspend]", "tear down, optionally suspending"),
        ("/rescan <dev>", "reconcile with caps and params"),
        ("/register <dev>", "leave lightweight mode and rescan"),
        ("/unregister <dev>", "remove every personality"),
        ("/lightweight <dev>", "enter lightweight mode"),
        ("/set <dev> <param> <on|off>", "enable_eth / enable_rdma / enable_vnet"),
        ("/ib <dev> <on|off>", "allow or suppress RDMA personalities"),
        ("/mode <dev> <legacy|switchdev>", "change the eswitch mode"),
        ("/offline <dev> <on|off>", "make capability reads fail"),
        ("/unbind <dev> <label>", "unbind a child's driver by hand"),
        ("/events", "lifecycle events since last call"),
        ("/quit  /exit", "unregister everything and exit"),
    ];
    for (cmd, what) in rows {
        println!("  {:<32} – {}", cmd.bold().cyan(), what);
    }
    println!();
}

fn cmd_devices(card: &Card) {
    println!("{}", "Devices".bold().underline());
    for d in &card.devices {
        let features: Vec<&str> = d.dev.present_features().iter().map(|f| f.label()).collect();
        println!(
            "  {} guid {:#x}  [{}]",
            d.dev.name().bold(),
            d.dev.peers().guid(),
            features.join(", ").green()
        );
    }
    println!(
        "  {} children on bus, {} indices in use, {} peer group(s)",
        card.bus.len(),
        card.ida.in_use(),
        card.peers.len()
    );
}

fn cmd_status(card: &Card, dev: Option<&str>) -> Result<(), FacetError> {
    let devices: Vec<_> = match dev {
        Some(name) => vec![card.device(name)?],
        None => card.devices.iter().collect(),
    };
    for d in devices {
        let snap = d.dev.snapshot();
        let mut flags = Vec::new();
        if snap.detaching {
            flags.push("detaching");
        }
        if snap.lightweight {
            flags.push("lightweight");
        }
        if snap.ib_disabled {
            flags.push("ib-disabled");
        }
        let flags = if flags.is_empty() {
            "none".dimmed().to_string()
        } else {
            flags.join(" | ").yellow().to_string()
        };
        println!("{}  flags: {}", snap.device.bold(), flags);
        if snap.slots.is_empty() {
            println!("  {}", "(no personalities)".dimmed());
        }
        for slot in &snap.slots {
            let driver = match &slot.driver {
                Some(name) => name.green().to_string(),
                None => "unbound".dimmed().to_string(),
            };
            println!(
                "  [{}] {:<10} {:<24} {}",
                slot.feature.index(),
                slot.feature.label(),
                slot.child,
                driver
            );
        }
    }
    Ok(())
}

fn cmd_events(card: &mut Card) {
    let events = card.take_events();
    if events.is_empty() {
        println!("  {}", "(no new events)".dimmed());
        return;
    }
    for e in events {
        let kind = match e.kind {
            LifecycleEventKind::Created => "created".green(),
            LifecycleEventKind::Resumed => "resumed".green(),
            LifecycleEventKind::Suspended => "suspended".yellow(),
            LifecycleEventKind::DeleteRequested => "delete-requested".red(),
            LifecycleEventKind::Released => "released".dimmed(),
        };
        println!(
            "  {} {:<16} {} ({})",
            e.timestamp
                .with_timezone(&chrono::Local)
                .format("%H:%M:%S%.3f")
                .to_string()
                .dimmed(),
            kind,
            e.child,
            e.device
        );
    }
}
