//! LED wall driver
//!
//! Runs animated patterns on a wall of WS281x panels and switches between
//! them with physical buttons wired to the Pi's GPIO pins.
//!
//! ## Architecture
//! - **Main thread**: owns the pattern controller, reacts to button actions
//! - **Poll thread**: samples the buttons and debounces presses
//! - **Pattern thread**: the single running pattern, sole writer to the strip
//!
//! ## Usage
//! ```sh
//! sudo ./target/release/led-wall-rs --config wall.toml --pattern rainbow
//! ```

use clap::Parser;
use led_wall_rs::config::Config;
use led_wall_rs::pattern::{Catalog, PatternId};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// LED wall driver
#[derive(Parser)]
#[command(name = "led-wall-rs")]
#[command(about = "Drive a WS281x LED wall with button-selected patterns")]
#[command(version)]
struct Args {
    /// TOML config file; built-in defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Wall width in pixels
    #[arg(long)]
    width: Option<usize>,

    /// Wall height in pixels
    #[arg(long)]
    height: Option<usize>,

    /// Global brightness, 0.0-1.0
    #[arg(long)]
    brightness: Option<f32>,

    /// Pattern to start with
    #[arg(long, value_enum)]
    pattern: Option<PatternId>,

    /// Print the available patterns and exit
    #[arg(long)]
    list_patterns: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_ansi(false) // Disable ANSI color codes for systemd/journald
        .compact()
        .init();

    let args = Args::parse();

    if args.list_patterns {
        for id in Catalog::builtin().ids() {
            println!("{id}");
        }
        return ExitCode::SUCCESS;
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("LED wall v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Wall: {}x{} in bands of {}, brightness {}",
        config.display.width,
        config.display.height,
        config.display.band_height,
        config.display.brightness
    );

    run(config)
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(width) = args.width {
        config.display.width = width;
    }
    if let Some(height) = args.height {
        config.display.height = height;
    }
    if let Some(brightness) = args.brightness {
        config.display.brightness = brightness;
    }
    if let Some(pattern) = args.pattern {
        config.controller.start_pattern = Some(pattern);
    }
    config.validate()?;
    Ok(config)
}

#[cfg(not(feature = "hardware"))]
fn run(_config: Config) -> ExitCode {
    eprintln!("This binary requires the 'hardware' feature (rs_ws281x + rppal).");
    eprintln!("Build with: cargo build --release --features hardware");
    eprintln!("Tests run without it: cargo test");
    ExitCode::FAILURE
}

#[cfg(feature = "hardware")]
fn run(config: Config) -> ExitCode {
    use led_wall_rs::gpio::RppalInput;
    use led_wall_rs::ws281x::Ws281xFactory;

    let running = match led_wall_rs::setup_signal_handler() {
        Ok(running) => running,
        Err(e) => {
            tracing::error!("Failed to install signal handler: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut factory = Ws281xFactory::new(config.strip.clone());
    match led_wall_rs::app::run(&config, &mut factory, Box::new(RppalInput::new()), &running) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
