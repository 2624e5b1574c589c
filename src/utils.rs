use crate::capture::frame::PixelFormat;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use v4l::{capability::Flags, video::Capture, Device, FourCC};

// Detected capture device info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

/// Auto-detect best capture device
pub fn auto_detect_device() -> Result<FoundDevice> {
    use std::path::Path;

    info!("Auto-detecting capture devices...");

    for i in 0..64 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }

        // Prefer MJPEG: it streams without re-encoding
        let Ok(formats) = dev.enum_formats() else {
            continue;
        };
        let fourccs: Vec<FourCC> = formats.iter().map(|fmt| fmt.fourcc).collect();
        let format = if fourccs.contains(&FourCC::new(b"MJPG")) {
            PixelFormat::Mjpeg
        } else if fourccs.contains(&FourCC::new(b"YUYV")) {
            PixelFormat::Yuyv4
        } else {
            continue;
        };

        info!("Found {:?} device: {} - {}", format, path, caps.card);
        return Ok(FoundDevice { path, format });
    }

    Err(eyre!("No suitable capture device found"))
}
