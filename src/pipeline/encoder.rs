//! Frame to JPEG encoding for the HTTP stream

use std::time::Instant;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use thiserror::Error;

use crate::capture::decoder::{self, DecodeError};
use crate::{Frame, PixelFormat};

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("malformed frame {sequence}: {source}")]
    Malformed {
        sequence: u64,
        #[source]
        source: DecodeError,
    },

    #[error("frame {sequence} is not a complete jpeg image")]
    InvalidJpeg { sequence: u64 },

    #[error("jpeg encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Stateless JPEG encoder. Cheap to copy into every stream consumer.
#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    quality: u8,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(80)
    }
}

impl Encoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode one frame. MJPEG frames are validated and passed through.
    pub fn encode(&self, frame: &Frame) -> Result<Bytes, EncodeError> {
        let sequence = frame.meta.sequence;

        if frame.meta.format == PixelFormat::Mjpeg {
            return if is_complete_jpeg(&frame.data) {
                Ok(frame.data.clone())
            } else {
                Err(EncodeError::InvalidJpeg { sequence })
            };
        }

        let start = Instant::now();
        let rgb = decoder::decode_frame(frame)
            .map_err(|source| EncodeError::Malformed { sequence, source })?;

        // The jpeg encoder panics on a short buffer
        let expected = frame.meta.width as usize * frame.meta.height as usize * 3;
        if rgb.len() != expected {
            return Err(EncodeError::Malformed {
                sequence,
                source: DecodeError::Size {
                    expected,
                    actual: rgb.len(),
                },
            });
        }

        let mut jpeg = Vec::with_capacity(rgb.len() / 8);
        JpegEncoder::new_with_quality(&mut jpeg, self.quality).encode(
            &rgb,
            frame.meta.width,
            frame.meta.height,
            ExtendedColorType::Rgb8,
        )?;

        metrics::histogram!("encode_time_us").record(start.elapsed().as_micros() as f64);
        Ok(Bytes::from(jpeg))
    }
}

fn is_complete_jpeg(data: &[u8]) -> bool {
    data.len() >= 4 && data.starts_with(&[0xFF, 0xD8]) && data.ends_with(&[0xFF, 0xD9])
}
