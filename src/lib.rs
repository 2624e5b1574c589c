pub mod capture;
pub mod control;
pub mod input;
pub mod pipeline;
pub mod session;
pub mod stream;
pub mod supervisor;
pub mod utils;
pub mod vehicle;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{Frame, PixelFormat};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub vehicle: VehicleConfig,
    pub capture: CaptureConfig,
    pub control: ControlConfig,
    pub stream: StreamConfig,
    pub acquisition: AcquisitionConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleKind {
    Tello,
    Simulator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    pub kind: VehicleKind,
    pub address: String,    // Command endpoint of the vehicle
    pub local_bind: String, // Local UDP socket for command replies
    pub response_timeout_ms: u64,
    pub speed: u32, // cm/s
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// V4L2 device path, or `auto` to probe /dev/video*
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub tick_ms: u64,
    /// Magnitude applied to an axis while its key is held
    pub velocity: i32,
    pub headless: bool,
    pub preview: bool,
    pub window_width: u32,
    pub window_height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub host: String,
    pub port: u16,
    /// Per-viewer chunk rate
    pub fps: u32,
    pub jpeg_quality: u8,
    /// A viewer that accepts nothing for this long is disconnected
    pub stall_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Frames in the sliding rate window
    pub window: usize,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            kind: VehicleKind::Tello,
            address: "192.168.10.1:8889".into(),
            local_bind: "0.0.0.0:8889".into(),
            response_timeout_ms: 7000,
            speed: 10,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video10".into(),
            width: 960,
            height: 720,
            fps: 30,
            format: PixelFormat::Yuyv4,
            buffer_count: 4,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_ms: 50, // 20 Hz
            velocity: 60,
            headless: false,
            preview: true,
            window_width: 960,
            window_height: 720,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8080,
            fps: 30,
            jpeg_quality: 80,
            stall_timeout_ms: 2000,
            shutdown_grace_ms: 2000,
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self { window: 32 }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `AEROCAST__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder
            .add_source(config::Environment::with_prefix("AEROCAST").separator("__"))
            .build()?
            .try_deserialize()
    }
}

impl ControlConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

impl StreamConfig {
    /// Interval between chunks on one connection
    pub fn period(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
