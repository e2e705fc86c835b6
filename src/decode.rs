//! Raw Frame Decoding
//!
//! Converts the bytes a frame source hands over into the RGB image the worker
//! rotates and recognizes. NV21 uses the 10-bit fixed-point BT.601 transform
//! common on camera preview paths, parallelized per row with rayon.

use crate::error::DecodeError;
use crate::frame::{PixelFormat, RgbFrame};
use rayon::prelude::*;

// Channels are computed in 18-bit fixed point, then shifted down to 8 bits.
const CHANNEL_MAX: i32 = 262_143;

/// Decodes `raw` into `target`, whose dimensions define the expected frame size.
pub fn decode_into(format: PixelFormat, raw: &[u8], target: &mut RgbFrame) -> Result<(), DecodeError> {
    let (width, height) = target.dimensions();
    if width == 0 || height == 0 {
        return Err(DecodeError::Dimensions { width, height });
    }
    let expected = format.frame_size(width, height);
    if raw.len() < expected {
        return Err(DecodeError::BufferTooSmall {
            width,
            height,
            expected,
            actual: raw.len(),
        });
    }

    match format {
        PixelFormat::Rgb24 => {
            target.copy_from_slice(&raw[..expected]);
            Ok(())
        }
        PixelFormat::Nv21 => decode_nv21(raw, width, height, target),
    }
}

fn decode_nv21(raw: &[u8], width: u32, height: u32, target: &mut RgbFrame) -> Result<(), DecodeError> {
    if width % 2 != 0 || height % 2 != 0 {
        return Err(DecodeError::Dimensions { width, height });
    }
    let width = width as usize;
    let frame_len = width * height as usize;
    let (luma, chroma) = raw.split_at(frame_len);

    target
        .par_chunks_mut(width * 3)
        .enumerate()
        .for_each(|(y, row)| {
            let luma_row = &luma[y * width..(y + 1) * width];
            let chroma_row = &chroma[(y >> 1) * width..];
            let mut u = 0;
            let mut v = 0;
            for (x, pixel) in row.chunks_exact_mut(3).enumerate() {
                if x % 2 == 0 {
                    v = i32::from(chroma_row[x]) - 128;
                    u = i32::from(chroma_row[x + 1]) - 128;
                }
                pixel.copy_from_slice(&yuv_to_rgb(i32::from(luma_row[x]), u, v));
            }
        });
    Ok(())
}

fn yuv_to_rgb(y: i32, u: i32, v: i32) -> [u8; 3] {
    let y1192 = 1192 * (y - 16).max(0);
    let r = y1192 + 1634 * v;
    let g = y1192 - 833 * v - 400 * u;
    let b = y1192 + 2066 * u;
    [to_channel(r), to_channel(g), to_channel(b)]
}

fn to_channel(value: i32) -> u8 {
    (value.clamp(0, CHANNEL_MAX) >> 10) as u8
}
