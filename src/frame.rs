//! Frame data structures shared by the capture and recognition sides.

use crate::geometry::Rotation;
use image::{ImageBuffer, Rgb, imageops};
use serde::Serialize;
use std::time::Instant;

/// Decoded RGB image type used throughout the crate.
pub type RgbFrame = ImageBuffer<Rgb<u8>, Vec<u8>>;

/// Raw pixel layout delivered by a frame source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// YUV 4:2:0 semi-planar: Y plane, then interleaved V/U rows at half height.
    Nv21,
    /// Packed 8-bit RGB.
    Rgb24,
}

impl PixelFormat {
    pub fn bits_per_pixel(self) -> usize {
        match self {
            PixelFormat::Nv21 => 12,
            PixelFormat::Rgb24 => 24,
        }
    }

    /// Size in bytes of one raw frame at the given resolution.
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bits_per_pixel() / 8
    }
}

/// A decoded frame. Moves between the producer and the worker by value, so a
/// buffer is never written and read at the same time.
#[derive(Debug)]
pub struct Frame {
    pub sequence: u64,
    pub image: RgbFrame,
    pub captured_at: Instant,
}

impl Frame {
    /// Allocate a blank frame at the given size.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            sequence: 0,
            image: ImageBuffer::new(width, height),
            captured_at: Instant::now(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Copy of the image turned upright for recognition.
    pub fn working_copy(&self, rotation: Rotation) -> RgbFrame {
        match rotation {
            Rotation::None => self.image.clone(),
            Rotation::Clockwise90 => imageops::rotate90(&self.image),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_sizes_follow_bits_per_pixel() {
        assert_eq!(PixelFormat::Nv21.frame_size(640, 480), 640 * 480 * 3 / 2);
        assert_eq!(PixelFormat::Rgb24.frame_size(4, 2), 24);
    }

    #[test]
    fn rotation_swaps_dimensions_and_moves_pixels_clockwise() {
        let mut frame = Frame::blank(3, 2);
        // Top-left pixel ends up in the top-right corner after a clockwise turn.
        frame.image.put_pixel(0, 0, Rgb([255, 0, 0]));
        let rotated = frame.working_copy(Rotation::Clockwise90);
        assert_eq!(rotated.dimensions(), (2, 3));
        assert_eq!(rotated.get_pixel(1, 0), &Rgb([255, 0, 0]));
        assert_eq!(rotated.get_pixel(0, 0), &Rgb([0, 0, 0]));

        assert_eq!(frame.working_copy(Rotation::None), frame.image);
    }
}
