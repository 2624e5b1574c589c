//! aerocast: fly a vehicle from the keyboard while streaming its video over HTTP

use std::path::PathBuf;
use std::sync::Arc;

use aerocast::input::{InputSource, NoInput};
use aerocast::supervisor::Supervisor;
use aerocast::vehicle::{Simulator, Tello, Vehicle};
use aerocast::{utils, Config, VehicleKind};
use clap::Parser;
use color_eyre::{eyre::WrapErr, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address the HTTP stream listens on [default: localhost]
    #[arg(short = 'i', long)]
    ip: Option<String>,

    /// HTTP port, 1024 to 65535 [default: 8080]
    #[arg(short = 'o', long, value_parser = clap::value_parser!(u16).range(1024..))]
    port: Option<u16>,

    /// Frames in the acquisition rate window [default: 32]
    #[arg(short = 'f', long, value_parser = clap::value_parser!(u64).range(2..=4096))]
    frame_count: Option<u64>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fly the built-in simulator instead of a real vehicle
    #[arg(long)]
    simulate: bool,

    /// V4L2 device carrying the decoded video, or `auto`
    #[arg(long)]
    camera: Option<String>,

    /// No pilot window; stop with Ctrl-C
    #[arg(long)]
    headless: bool,

    /// Don't show the video in the pilot window
    #[arg(long)]
    no_preview: bool,
}

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("aerocast=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let args = Args::parse();

    info!("aerocast launching...");

    let mut config = Config::load(args.config.as_deref()).wrap_err("Invalid configuration")?;
    apply_args(&mut config, &args);

    if config.capture.device == "auto" && config.vehicle.kind == VehicleKind::Tello {
        let device = utils::auto_detect_device()?;
        config.capture.device = device.path;
        config.capture.format = device.format;
    }

    let vehicle: Arc<dyn Vehicle> = match config.vehicle.kind {
        VehicleKind::Tello => Arc::new(Tello::new(
            config.vehicle.clone(),
            config.capture.clone(),
        )),
        VehicleKind::Simulator => Arc::new(Simulator::new(
            config.capture.width,
            config.capture.height,
            config.capture.fps,
        )),
    };

    let supervisor = Supervisor::new(config.clone(), vehicle);
    let input = pilot_input(&config, &supervisor)?;

    let reason = supervisor.run(input).wrap_err("Vehicle setup failed")?;

    info!("aerocast shutting down ({})", reason);
    Ok(())
}

fn apply_args(config: &mut Config, args: &Args) {
    if let Some(ip) = &args.ip {
        config.stream.host = ip.clone();
    }
    if let Some(port) = args.port {
        config.stream.port = port;
    }
    if let Some(frames) = args.frame_count {
        config.acquisition.window = frames as usize;
    }
    if args.simulate {
        config.vehicle.kind = VehicleKind::Simulator;
    }
    if let Some(camera) = &args.camera {
        config.capture.device = camera.clone();
    }
    if args.headless {
        config.control.headless = true;
    }
    if args.no_preview {
        config.control.preview = false;
    }
}

#[cfg(feature = "sdl")]
fn pilot_input(config: &Config, supervisor: &Supervisor) -> Result<Box<dyn InputSource>> {
    use aerocast::input::SdlConsole;

    if config.control.headless {
        return Ok(Box::new(NoInput));
    }
    let preview = config.control.preview.then(|| supervisor.frames());
    let console = SdlConsole::new(
        config.control.window_width,
        config.control.window_height,
        preview,
    )?;
    Ok(Box::new(console))
}

#[cfg(not(feature = "sdl"))]
fn pilot_input(config: &Config, _supervisor: &Supervisor) -> Result<Box<dyn InputSource>> {
    if !config.control.headless {
        tracing::warn!("Built without the `sdl` feature, running headless");
    }
    Ok(Box::new(NoInput))
}
