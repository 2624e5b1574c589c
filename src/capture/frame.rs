use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Frame data with zero-copy semantics
#[derive(Clone)]
pub struct Frame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row; zero for compressed formats
    pub stride: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Yuyv4,
    Mjpeg,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats, `None` for compressed ones
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Mjpeg => None,
        }
    }
}

impl Frame {
    /// Wrap an already-captured buffer. The stride is derived from the format.
    pub fn new(sequence: u64, width: u32, height: u32, format: PixelFormat, data: Bytes) -> Self {
        let stride = format.bytes_per_pixel().map_or(0, |bpp| width * bpp);
        Self {
            data,
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                stride,
                format,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    /// Expected payload size for packed formats
    pub fn expected_len(&self) -> Option<usize> {
        self.meta
            .format
            .bytes_per_pixel()
            .map(|_| self.meta.stride as usize * self.meta.height as usize)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.meta.sequence)
            .field("format", &self.meta.format)
            .field("size", &(self.meta.width, self.meta.height))
            .field("bytes", &self.data.len())
            .finish()
    }
}
