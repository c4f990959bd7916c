//! CLI entry point for the CHROLIS driver.
//!
//! Wires a hub, shutter and LED state device against a simulated instrument and
//! exposes their properties.
//!
//! # Usage
//!
//! ```bash
//! chrolis info
//! chrolis state 5
//! chrolis power 2 750
//! chrolis watch --seconds 3 --interlock-after-ms 500
//! RUST_LOG=chrolis_driver=debug chrolis properties
//! ```

use anyhow::{bail, Context, Result};
use chrolis_core::{HubConfig, PropertySet};
use chrolis_driver::{ChrolisHub, LedStateDevice, Shutter, SimulatedChrolis, NUM_LEDS};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chrolis")]
#[command(about = "Thorlabs CHROLIS hub control (simulated instrument)", long_about = None)]
struct Cli {
    /// Hub configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show device identification and status
    Info,

    /// Print "Device Status" changes for a while
    Watch {
        /// How long to watch
        #[arg(long, default_value = "5")]
        seconds: u64,

        /// Open the simulated interlock after this many milliseconds
        #[arg(long)]
        interlock_after_ms: Option<u64>,
    },

    /// Read or write the aggregate LED enable mask
    State {
        /// New mask (0-63); omit to read
        mask: Option<i64>,
    },

    /// Read or write one LED's enable flag
    Enable {
        /// LED number (1-6)
        led: usize,
        /// 0 or 1; omit to read
        value: Option<i64>,
    },

    /// Read or write one LED's brightness
    Power {
        /// LED number (1-6)
        led: usize,
        /// New brightness; omit to read
        value: Option<i64>,
    },

    /// Read, open or close the shutter
    Shutter {
        action: Option<ShutterAction>,
    },

    /// List every property with its value and metadata as JSON lines
    Properties,
}

#[derive(Clone, Copy, ValueEnum)]
enum ShutterAction {
    Open,
    Close,
}

struct Devices {
    hub: Arc<ChrolisHub>,
    shutter: Shutter,
    leds: LedStateDevice,
    sim: Arc<SimulatedChrolis>,
}

impl Devices {
    fn start(config: HubConfig) -> Result<Self> {
        let sim = Arc::new(SimulatedChrolis::new());
        let hub = ChrolisHub::new(sim.clone(), config).context("invalid hub configuration")?;
        hub.initialize().context("hub initialization failed")?;

        let shutter = Shutter::new(&hub);
        shutter.initialize().context("shutter initialization failed")?;
        let leds = LedStateDevice::new(&hub);
        leds.initialize()
            .context("LED state device initialization failed")?;

        Ok(Self {
            hub,
            shutter,
            leds,
            sim,
        })
    }

    fn stop(self) -> Result<()> {
        self.leds.shutdown();
        self.shutter.shutdown();
        self.hub.shutdown()?;
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = HubConfig::load(cli.config.as_deref())?;
    debug!(?config, "Loaded hub configuration");

    let devices = Devices::start(config)?;
    let result = run(&cli.command, &devices);
    devices.stop()?;
    result
}

fn run(command: &Commands, devices: &Devices) -> Result<()> {
    match command {
        Commands::Info => print_info(devices),
        Commands::Watch {
            seconds,
            interlock_after_ms,
        } => watch(devices, Duration::from_secs(*seconds), *interlock_after_ms),
        Commands::State { mask } => {
            if let Some(mask) = mask {
                devices.leds.set_state(*mask)?;
            }
            println!("State = {:#08b}", devices.leds.get_state()?);
            Ok(())
        }
        Commands::Enable { led, value } => {
            let index = led_index(*led)?;
            if let Some(value) = value {
                devices.leds.set_enable(index, *value)?;
            }
            println!("LED Enable State {} = {}", led, devices.leds.get_enable(index)?);
            Ok(())
        }
        Commands::Power { led, value } => {
            let index = led_index(*led)?;
            if let Some(value) = value {
                devices.leds.set_power(index, *value)?;
            }
            println!("LED {} Power = {}", led, devices.leds.get_power(index)?);
            Ok(())
        }
        Commands::Shutter { action } => {
            match action {
                Some(ShutterAction::Open) => devices.shutter.open()?,
                Some(ShutterAction::Close) => devices.shutter.close()?,
                None => {}
            }
            let open = devices.shutter.get_open()?;
            println!("Shutter = {}", if open { "open" } else { "closed" });
            Ok(())
        }
        Commands::Properties => {
            print_properties("hub", &devices.hub.properties())?;
            print_properties("shutter", &devices.shutter.properties())?;
            print_properties("state", &devices.leds.properties())?;
            Ok(())
        }
    }
}

/// Convert a 1-based LED number to an index.
fn led_index(led: usize) -> Result<usize> {
    if (1..=NUM_LEDS).contains(&led) {
        Ok(led - 1)
    } else {
        bail!("LED number must be between 1 and {}, got {}", NUM_LEDS, led)
    }
}

fn print_info(devices: &Devices) -> Result<()> {
    let props = devices.hub.properties();
    for (name, property) in props.iter() {
        println!("{:<22} {}", name, property.get_json()?);
    }
    println!("{:<22} {}", "Positions", devices.leds.position_labels().join(" "));
    Ok(())
}

fn print_properties(device: &str, props: &PropertySet) -> Result<()> {
    for (_, property) in props.iter() {
        let line = serde_json::json!({
            "device": device,
            "value": property.get_json()?,
            "metadata": property.metadata(),
        });
        println!("{}", line);
    }
    Ok(())
}

fn watch(devices: &Devices, duration: Duration, interlock_after_ms: Option<u64>) -> Result<()> {
    let mut status = devices.hub.status().subscribe();
    let mut state = devices.leds.state().subscribe();
    let start = Instant::now();
    let mut interlock_at = interlock_after_ms.map(Duration::from_millis);
    let mut last_status = status.borrow_and_update().clone();

    info!(seconds = duration.as_secs(), "Watching device status");
    println!("Device Status: {}", last_status);

    while start.elapsed() < duration {
        if let Some(at) = interlock_at {
            if start.elapsed() >= at {
                info!("Opening simulated interlock");
                devices.sim.set_hardware_enables([false; NUM_LEDS]);
                devices.sim.set_status_code(0x04);
                interlock_at = None;
            }
        }

        if status.has_changed()? {
            let current = status.borrow_and_update().clone();
            if current != last_status {
                println!("Device Status: {}", current);
                last_status = current;
            }
        }
        if state.has_changed()? {
            println!("State: {:#08b}", *state.borrow_and_update());
        }
        thread::sleep(Duration::from_millis(50));
    }
    Ok(())
}
