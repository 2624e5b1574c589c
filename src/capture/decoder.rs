use jpeg_decoder::Decoder;

use super::frame::{Frame, PixelFormat};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("jpeg decode failed: {0}")]
    Jpeg(#[from] jpeg_decoder::Error),

    #[error("buffer holds {actual} bytes, expected {expected}")]
    Size { expected: usize, actual: usize },

    #[error("unsupported jpeg pixel format {0:?}")]
    JpegFormat(jpeg_decoder::PixelFormat),

    #[error("yuyv frame width {0} is not even")]
    OddWidth(u32),
}

/// Decode a frame to tightly packed RGB24
pub fn decode_frame(frame: &Frame) -> Result<Vec<u8>, DecodeError> {
    let meta = &frame.meta;
    match meta.format {
        PixelFormat::Mjpeg => {
            let mut decoder = Decoder::new(frame.data.as_ref());
            let pixels = decoder.decode()?;
            match decoder.info().map(|info| info.pixel_format) {
                Some(jpeg_decoder::PixelFormat::RGB24) | None => Ok(pixels),
                Some(jpeg_decoder::PixelFormat::L8) => {
                    Ok(pixels.iter().flat_map(|&l| [l, l, l]).collect())
                }
                Some(other) => Err(DecodeError::JpegFormat(other)),
            }
        }
        PixelFormat::Rgb24 => {
            check_len(frame)?;
            Ok(pack_rows(frame, 3))
        }
        PixelFormat::Bgr24 => {
            check_len(frame)?;
            let mut pixels = pack_rows(frame, 3);
            for px in pixels.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            Ok(pixels)
        }
        PixelFormat::Yuyv4 => {
            check_len(frame)?;
            Ok(yuyv_to_rgb(&pack_rows(frame, 2)))
        }
    }
}

fn check_len(frame: &Frame) -> Result<(), DecodeError> {
    let expected = frame.expected_len().unwrap_or(0);
    let row = frame
        .meta
        .format
        .bytes_per_pixel()
        .map_or(0, |bpp| (frame.meta.width * bpp) as usize);
    if frame.meta.width == 0
        || frame.meta.height == 0
        || frame.data.len() != expected
        || (frame.meta.stride as usize) < row
    {
        return Err(DecodeError::Size {
            expected,
            actual: frame.data.len(),
        });
    }
    // YUYV carries pixels in pairs
    if frame.meta.format == PixelFormat::Yuyv4 && frame.meta.width % 2 != 0 {
        return Err(DecodeError::OddWidth(frame.meta.width));
    }
    Ok(())
}

/// Drop per-row padding so rows are exactly `width * bpp` bytes
fn pack_rows(frame: &Frame, bpp: usize) -> Vec<u8> {
    let row = frame.meta.width as usize * bpp;
    let stride = frame.meta.stride as usize;
    if stride == row {
        return frame.data.to_vec();
    }
    frame
        .data
        .chunks_exact(stride)
        .flat_map(|line| &line[..row])
        .copied()
        .collect()
}

/// BT.601 YUYV 4:2:2 to RGB24
pub fn yuyv_to_rgb(yuyv: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(yuyv.len() / 2 * 3);
    for quad in yuyv.chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        rgb.extend_from_slice(&yuv_pixel(y0, u, v));
        rgb.extend_from_slice(&yuv_pixel(y1, u, v));
    }
    rgb
}

fn yuv_pixel(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}
