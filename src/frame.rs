//! Single-channel frame buffers
//!
//! Frames are row-major intensity rasters, one byte per pixel. The source
//! (perspective) frame and the destination (bird's-eye) frame use the same
//! type with independent sizes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::IpmError;

/// Width and height of an image in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: usize,
    pub height: usize,
}

impl ImageSize {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Number of pixels
    #[inline]
    pub fn area(&self) -> usize {
        self.width * self.height
    }

    /// Flat row-major index of `(row, col)`
    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.width + col
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An owned single-channel (grayscale) frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayFrame {
    size: ImageSize,
    data: Vec<u8>,
}

impl GrayFrame {
    /// Wrap existing pixel data, checking that the length matches the size
    pub fn new(size: ImageSize, data: Vec<u8>) -> Result<Self, IpmError> {
        if data.len() != size.area() {
            return Err(IpmError::InvalidBufferLength {
                size,
                expected: size.area(),
                actual: data.len(),
            });
        }
        Ok(Self { size, data })
    }

    /// Create a frame filled with a single value
    pub fn filled(size: ImageSize, value: u8) -> Self {
        Self {
            size,
            data: vec![value; size.area()],
        }
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    pub fn width(&self) -> usize {
        self.size.width
    }

    pub fn height(&self) -> usize {
        self.size.height
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Pixel at `(row, col)`, or `None` outside the frame
    pub fn get(&self, row: usize, col: usize) -> Option<u8> {
        if row < self.size.height && col < self.size.width {
            Some(self.data[self.size.index(row, col)])
        } else {
            None
        }
    }

    /// Copy one channel out of an interleaved buffer into this frame,
    /// resampling with nearest neighbour when the sizes differ.
    ///
    /// `stride` is the distance in bytes between consecutive pixels of the
    /// channel (2 for YUYV luma, 1 for GREY).
    pub fn resample_from(&mut self, src: &[u8], src_size: ImageSize, stride: usize) {
        let dst_w = self.size.width;
        let dst_h = self.size.height;
        if src_size.is_empty() || stride == 0 {
            self.data.fill(0);
            return;
        }

        if src_size == self.size {
            for (dst, px) in self.data.iter_mut().zip(src.iter().step_by(stride)) {
                *dst = *px;
            }
            return;
        }

        for row in 0..dst_h {
            let sy = row * src_size.height / dst_h;
            let dst_row = &mut self.data[row * dst_w..(row + 1) * dst_w];
            for (col, px) in dst_row.iter_mut().enumerate() {
                let sx = col * src_size.width / dst_w;
                *px = src
                    .get((sy * src_size.width + sx) * stride)
                    .copied()
                    .unwrap_or(0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_checks_length() {
        let size = ImageSize::new(4, 3);
        assert!(GrayFrame::new(size, vec![0; 12]).is_ok());

        let err = GrayFrame::new(size, vec![0; 11]).unwrap_err();
        assert_eq!(
            err,
            IpmError::InvalidBufferLength {
                size,
                expected: 12,
                actual: 11
            }
        );
    }

    #[test]
    fn test_index_is_row_major() {
        let size = ImageSize::new(5, 2);
        assert_eq!(size.index(0, 0), 0);
        assert_eq!(size.index(0, 4), 4);
        assert_eq!(size.index(1, 0), 5);
        assert_eq!(size.area(), 10);
        assert_eq!(size.to_string(), "5x2");
    }

    #[test]
    fn test_resample_same_size_with_stride() {
        // YUYV-like: luma at every other byte
        let src = vec![10, 128, 20, 128, 30, 128, 40, 128];
        let mut frame = GrayFrame::filled(ImageSize::new(2, 2), 0);
        frame.resample_from(&src, ImageSize::new(2, 2), 2);
        assert_eq!(frame.as_slice(), &[10, 20, 30, 40]);
    }

    #[test]
    fn test_resample_downscale() {
        let src: Vec<u8> = (0..16).collect();
        let mut frame = GrayFrame::filled(ImageSize::new(2, 2), 0);
        frame.resample_from(&src, ImageSize::new(4, 4), 1);
        assert_eq!(frame.as_slice(), &[0, 2, 8, 10]);
    }

    #[test]
    fn test_get_out_of_bounds() {
        let frame = GrayFrame::filled(ImageSize::new(2, 2), 7);
        assert_eq!(frame.get(1, 1), Some(7));
        assert_eq!(frame.get(2, 0), None);
        assert_eq!(frame.get(0, 2), None);
    }
}
