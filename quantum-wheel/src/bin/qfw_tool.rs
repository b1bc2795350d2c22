//! Command-line tool for Quantum filter wheels.
//!
//! Subcommands:
//! - `info`: Identity, firmware version, filter count and settings
//! - `select`: Move to a filter and report switch statistics
//! - `settings`: List discovered settings
//! - `set`: Change one or more settings
//! - `name` / `offset`: Read or write per-filter data
//! - `repl`: Send raw protocol lines

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use quantum_wheel::{
    open_transport, ConnectionConfig, Link, LogHost, QuantumWheel, Transport, WheelConfig,
    DEFAULT_BAUD_RATE, DEFAULT_SERIAL_PORT,
};
use tracing::info;

type Wheel = QuantumWheel<Box<dyn Transport>, LogHost>;

/// Quantum Filter Wheel Control Tool
#[derive(Parser, Debug)]
#[command(name = "qfw_tool")]
#[command(about = "Control tool for Quantum motorized filter wheels")]
#[command(version)]
struct Args {
    /// Serial port of the wheel
    #[arg(long, global = true)]
    port: Option<String>,

    /// Serial baud rate
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Reach the wheel through a serial-over-TCP bridge (host:port)
    #[arg(long, global = true, conflicts_with = "port")]
    tcp: Option<String>,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run without hardware
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show identity, version, filter count and settings
    Info,

    /// Move to a filter position (1-based)
    Select { position: i32 },

    /// List discovered settings
    Settings,

    /// Change settings, e.g. `set a=40 b=12.5`
    Set {
        #[arg(required = true, value_parser = parse_assignment)]
        updates: Vec<(char, f64)>,
    },

    /// Read or write the name of a filter
    Name {
        position: i32,
        /// New name to store
        name: Option<String>,
    },

    /// Read or write the focus offset of a filter
    Offset {
        position: i32,
        /// New offset to store
        #[arg(allow_hyphen_values = true)]
        offset: Option<i32>,
    },

    /// Interactive raw protocol session
    Repl,
}

fn parse_assignment(s: &str) -> Result<(char, f64), String> {
    let (id, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected <id>=<value>, got '{s}'"))?;
    let mut chars = id.chars();
    let id = match (chars.next(), chars.next()) {
        (Some(c), None) => c,
        _ => return Err(format!("setting id must be one character, got '{id}'")),
    };
    let value = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid value '{value}'"))?;
    Ok((id, value))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = resolve_config(&args)?;

    match args.command {
        Command::Info => cmd_info(config),
        Command::Select { position } => cmd_select(config, position),
        Command::Settings => cmd_settings(config),
        Command::Set { ref updates } => cmd_set(config, updates),
        Command::Name { position, ref name } => cmd_name(config, position, name.as_deref()),
        Command::Offset { position, offset } => cmd_offset(config, position, offset),
        Command::Repl => cmd_repl(config),
    }
}

fn resolve_config(args: &Args) -> Result<WheelConfig> {
    let mut config = match &args.config {
        Some(path) => WheelConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => WheelConfig::default(),
    };

    if let Some(address) = &args.tcp {
        config.connection = ConnectionConfig::Tcp {
            address: address.clone(),
        };
    } else if args.port.is_some() || args.baud.is_some() {
        let (port, baud_rate) = match &config.connection {
            ConnectionConfig::Serial { port, baud_rate } => (port.clone(), *baud_rate),
            ConnectionConfig::Tcp { .. } => (DEFAULT_SERIAL_PORT.to_string(), DEFAULT_BAUD_RATE),
        };
        config.connection = ConnectionConfig::Serial {
            port: args.port.clone().unwrap_or(port),
            baud_rate: args.baud.unwrap_or(baud_rate),
        };
    }
    if args.simulate {
        config.simulation = true;
    }

    config.validate()?;
    Ok(config)
}

fn connect(config: WheelConfig) -> Result<Wheel> {
    if config.simulation {
        info!("Starting simulated wheel");
        return Ok(QuantumWheel::simulated(LogHost, config)?);
    }

    info!("Connecting to wheel at {}...", config.connection);
    let transport = open_transport(&config.connection)?;
    let wheel = QuantumWheel::connect(transport, LogHost, config)?;
    Ok(wheel)
}

// ==================== Info Command ====================

fn cmd_info(config: WheelConfig) -> Result<()> {
    let mut wheel = connect(config)?;

    let identity = wheel.identity().clone();
    println!("Serial:   {}", identity.details);
    println!("Extended: {}", identity.extended);
    println!("Firmware: {}", wheel.version()?);
    println!("Filters:  {}", wheel.query_filter_count()?);

    let stats = wheel.statistics();
    println!(
        "Last switch: {} ms, precision {:.2}",
        stats.duration_ms, stats.precision
    );

    print_settings(&wheel);
    wheel.disconnect()?;
    Ok(())
}

// ==================== Select Command ====================

fn cmd_select(config: WheelConfig, position: i32) -> Result<()> {
    let mut wheel = connect(config)?;

    wheel.select_filter(position)?;
    let stats = wheel.statistics();
    println!(
        "Filter {} in place after {} ms (precision {:.2})",
        wheel.query_filter(),
        stats.duration_ms,
        stats.precision
    );

    wheel.disconnect()?;
    Ok(())
}

// ==================== Settings Commands ====================

fn cmd_settings(config: WheelConfig) -> Result<()> {
    let wheel = connect(config)?;
    print_settings(&wheel);
    wheel.disconnect()?;
    Ok(())
}

fn cmd_set(config: WheelConfig, updates: &[(char, f64)]) -> Result<()> {
    let mut wheel = connect(config)?;
    if wheel.settings().is_empty() {
        bail!("This wheel exposes no settings");
    }

    let summary = wheel.apply_setting_updates(updates)?;
    println!("{summary}");
    for (id, err) in &summary.failed {
        println!("  {id}: {err}");
    }
    print_settings(&wheel);

    let partial = summary.is_partial_failure();
    wheel.disconnect()?;
    if partial {
        bail!("Some settings were not applied");
    }
    Ok(())
}

fn print_settings(wheel: &Wheel) {
    if wheel.settings().is_empty() {
        println!("No settings");
        return;
    }
    println!("Settings:");
    for setting in wheel.settings().iter() {
        println!(
            "  {}  {:>8.2}  {}",
            setting.id, setting.value, setting.description
        );
    }
}

// ==================== Per-Filter Commands ====================

fn cmd_name(config: WheelConfig, position: i32, name: Option<&str>) -> Result<()> {
    let mut wheel = connect(config)?;
    if let Some(name) = name {
        wheel.set_filter_name(position, name)?;
    }
    println!("Filter {}: {}", position, wheel.filter_name(position)?);
    wheel.disconnect()?;
    Ok(())
}

fn cmd_offset(config: WheelConfig, position: i32, offset: Option<i32>) -> Result<()> {
    let mut wheel = connect(config)?;
    if let Some(offset) = offset {
        wheel.set_filter_offset(position, offset)?;
    }
    println!("Filter {}: offset {}", position, wheel.filter_offset(position)?);
    wheel.disconnect()?;
    Ok(())
}

// ==================== REPL Command ====================

fn cmd_repl(config: WheelConfig) -> Result<()> {
    if config.simulation {
        bail!("The REPL needs a real wheel");
    }

    println!("Connecting to wheel at {}...", config.connection);
    let transport = open_transport(&config.connection)?;
    let mut link = Link::new(transport, config.read_timeout());

    println!();
    println!("Quantum REPL - Enter raw commands, 'quit' to exit");
    println!("Examples: SN, VR, EN, G0, s?, sa");
    println!();

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }

        let cmd = input.trim();
        if cmd.is_empty() {
            continue;
        }

        if cmd.eq_ignore_ascii_case("quit") || cmd.eq_ignore_ascii_case("exit") {
            println!("Bye!");
            break;
        }

        match link.exchange_raw(cmd) {
            Ok(reply) => println!("{reply}"),
            Err(e) => println!("Error: {e}"),
        }
    }

    Ok(())
}
