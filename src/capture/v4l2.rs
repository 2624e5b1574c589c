//! V4L2 memory-mapped capture used as a vehicle video feed

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::{
    capture::feed::{FeedError, FrameFeed},
    capture::frame::{Frame, FrameMetadata, PixelFormat},
    CaptureConfig,
};

/// Frame feed backed by a V4L2 capture device
pub struct V4l2Feed {
    _device: Device,
    stream: MmapStream<'static>,
    config: CaptureConfig,
    stride: u32,
    sequence: u64,
    stopped: bool,
}

impl V4l2Feed {
    /// Open the device, negotiate the format and start streaming
    pub fn open(config: CaptureConfig) -> std::io::Result<Self> {
        info!("Initializing V4L2 capture: {}", config.device);

        let device = Device::with_path(&config.device)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "device doesn't support video capture",
            ));
        }

        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = match config.format {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
            PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
            PixelFormat::Bgr24 => FourCC::new(b"BGR3"),
        };

        let actual = device.set_format(&fmt)?;
        if actual.width != config.width || actual.height != config.height {
            warn!(
                "Device negotiated {}x{} instead of {}x{}",
                actual.width, actual.height, config.width, config.height
            );
        }

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)?;
        info!("Capture stream started with {} buffers", config.buffer_count);

        let config = CaptureConfig {
            width: actual.width,
            height: actual.height,
            ..config
        };

        Ok(Self {
            _device: device,
            stream,
            stride: actual.stride,
            config,
            sequence: 0,
            stopped: false,
        })
    }
}

impl FrameFeed for V4l2Feed {
    #[instrument(skip(self), level = "trace")]
    fn next_frame(&mut self) -> Result<Frame, FeedError> {
        if self.stopped {
            return Err(FeedError::Stopped);
        }

        let timestamp = Instant::now();

        let (buf, meta) = match self.stream.next() {
            Ok(next) => next,
            Err(e) => {
                self.stopped = true;
                return Err(FeedError::Device(e));
            }
        };

        // The mmap'd buffer is handed back to the driver on the next dequeue
        let data = match self.config.format {
            PixelFormat::Mjpeg => {
                let used = (meta.bytesused as usize).min(buf.len());
                Bytes::copy_from_slice(&buf[..used])
            }
            _ => Bytes::copy_from_slice(buf),
        };

        self.sequence += 1;

        let frame_meta = Arc::new(FrameMetadata {
            sequence: self.sequence,
            width: self.config.width,
            height: self.config.height,
            stride: match self.config.format {
                PixelFormat::Mjpeg => 0,
                _ => self.stride,
            },
            format: self.config.format,
            device_timestamp: Some(
                Duration::from_secs(meta.timestamp.sec as u64)
                    + Duration::from_micros(meta.timestamp.usec as u64),
            ),
        });

        Ok(Frame {
            data,
            meta: frame_meta,
            timestamp,
        })
    }

    fn is_stopped(&self) -> bool {
        self.stopped
    }
}
