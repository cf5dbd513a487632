//! bootinit - Main entry point
//!
//! Lists and checks builtins, and runs command sequences against a device
//! simulated from a JSON profile.

use anyhow::{Context, Result};
use log::{debug, error, info};
use std::path::Path;

use bootinit::cli::{self, Cli, Commands};
use bootinit::platform::memory::SimulatedDevice;
use bootinit::{BootSequencer, Builtins, DeviceProfile, Dispatcher};

/// Initialize the logger with appropriate settings
fn init_logger() {
    use env_logger::Builder;
    use std::io::Write;

    Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}:{}] {}",
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env() // Allows RUST_LOG env var to override
        .init();
}

fn main() -> Result<()> {
    init_logger();
    debug!("bootinit starting up");

    let cli = Cli::parse_args();
    let dispatcher = Dispatcher::with_builtins().context("Builtin table is invalid")?;

    match cli.command {
        Commands::List => {
            for spec in dispatcher.registry().iter() {
                println!("{:<24} {:<8} {}", spec.name, spec.bounds(), spec.restriction);
            }
        }
        Commands::Check { subcontext, words } => {
            let invocation = cli::single_command(&words, subcontext);
            match dispatcher.check(&invocation) {
                Ok(spec) => println!("✓ {} ({}, {})", invocation, spec.bounds(), spec.restriction),
                Err(e) => {
                    eprintln!("✗ {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Validate { profile } => {
            info!("Validating device profile: {:?}", profile);
            let loaded = DeviceProfile::load_from_file(&profile)?;
            if let Err(e) = loaded.validate() {
                error!("Profile validation failed: {}", e);
                eprintln!("✗ Profile validation failed: {}", e);
                std::process::exit(1);
            }
            println!("✓ Device profile is valid: {}", loaded.name);
        }
        Commands::Run {
            profile,
            subcontext,
            commands,
        } => {
            let failed = run_commands(dispatcher, profile.as_deref(), subcontext, &commands)?;
            if failed {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Run a command sequence on a simulated device. Returns true if any command failed.
fn run_commands(
    dispatcher: Dispatcher,
    profile: Option<&Path>,
    subcontext: bool,
    words: &[String],
) -> Result<bool> {
    let profile = match profile {
        Some(path) => DeviceProfile::load_from_file(path)?,
        None => DeviceProfile::default(),
    };
    profile
        .validate()
        .with_context(|| format!("Device profile '{}' is invalid", profile.name))?;
    info!("Simulating device '{}'", profile.name);

    let device = SimulatedDevice::new(&profile);
    let mut sequencer = BootSequencer::new(dispatcher, Builtins::new(device.platform()));
    let report = sequencer.run(cli::split_commands(words, subcontext));

    println!("Executed {} command(s), skipped {}", report.executed, report.skipped);
    for (command, err) in &report.failures {
        println!("✗ {}: {}", command, err);
    }
    println!("Properties:");
    for (name, value) in device.properties.snapshot() {
        println!("  {}={}", name, value);
    }
    println!("Triggers: {}", device.actions.triggers().join(", "));
    for options in device.bootloader.messages() {
        println!("Bootloader message: {}", options.join(" "));
    }
    for reason in device.power.requests() {
        println!("Shutdown: {}", reason);
    }

    Ok(!report.failures.is_empty())
}
