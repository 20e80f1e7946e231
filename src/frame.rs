//! Frame model shared by the transport, the ring buffer and the tracer.
//!
//! - `Frame`: owned pixel data plus its template and capture timestamp.
//! - `FrameTemplate`: shape and pixel format. Everything downstream of a
//!   producer sizes its storage from the template of the first frame it sees.
//! - `PixelFormat`: the sample layouts we accept from camera producers.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit grayscale, one byte per pixel.
    Gray8,
    /// 16-bit grayscale, little-endian.
    Gray16,
    /// Interleaved 8-bit RGB (a 3D `(height, width, 3)` array).
    Rgb24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Gray16 => 2,
            PixelFormat::Rgb24 => 3,
        }
    }

    /// Shape suffix appended after `(height, width)`.
    pub fn channels(self) -> Option<usize> {
        match self {
            PixelFormat::Gray8 | PixelFormat::Gray16 => None,
            PixelFormat::Rgb24 => Some(3),
        }
    }
}

/// Shape and sample format of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameTemplate {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl FrameTemplate {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    pub fn gray8(width: u32, height: u32) -> Self {
        Self::new(width, height, PixelFormat::Gray8)
    }

    /// Number of bytes one frame of this template occupies.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    /// Array shape, `(height, width)` or `(height, width, channels)`.
    pub fn shape(&self) -> Vec<usize> {
        let mut shape = vec![self.height as usize, self.width as usize];
        if let Some(channels) = self.format.channels() {
            shape.push(channels);
        }
        shape
    }
}

/// One camera frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    template: FrameTemplate,
    /// Capture time in seconds, on the producer's clock.
    pub timestamp: f64,
    data: Vec<u8>,
}

impl Frame {
    /// Build a frame, checking that `data` matches the template size.
    pub fn new(template: FrameTemplate, timestamp: f64, data: Vec<u8>) -> Result<Self> {
        let expected = template.byte_len();
        if data.len() != expected {
            return Err(anyhow!(
                "frame length mismatch for {}x{} {:?}: expected {}, got {}",
                template.width,
                template.height,
                template.format,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            template,
            timestamp,
            data,
        })
    }

    /// Frame with every byte set to `value`.
    pub fn filled(template: FrameTemplate, timestamp: f64, value: u8) -> Self {
        Self {
            template,
            timestamp,
            data: vec![value; template.byte_len()],
        }
    }

    /// 8-bit grayscale frame whose pixels are produced by `f(x, y)`.
    pub fn gray8_from_fn(
        width: u32,
        height: u32,
        timestamp: f64,
        mut f: impl FnMut(u32, u32) -> u8,
    ) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            template: FrameTemplate::gray8(width, height),
            timestamp,
            data,
        }
    }

    pub(crate) fn from_parts(template: FrameTemplate, timestamp: f64, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), template.byte_len());
        Self {
            template,
            timestamp,
            data,
        }
    }

    pub fn template(&self) -> FrameTemplate {
        self.template
    }

    pub fn width(&self) -> u32 {
        self.template.width
    }

    pub fn height(&self) -> u32 {
        self.template.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Normalised luminance in `[0, 1]` at pixel `(x, y)`, or `None` when the
    /// coordinate lies outside the frame.
    pub fn intensity(&self, x: i64, y: i64) -> Option<f32> {
        if x < 0 || y < 0 || x >= self.template.width as i64 || y >= self.template.height as i64 {
            return None;
        }
        let index = y as usize * self.template.width as usize + x as usize;
        let value = match self.template.format {
            PixelFormat::Gray8 => self.data[index] as f32 / 255.0,
            PixelFormat::Gray16 => {
                let offset = index * 2;
                u16::from_le_bytes([self.data[offset], self.data[offset + 1]]) as f32 / 65535.0
            }
            PixelFormat::Rgb24 => {
                let offset = index * 3;
                let r = self.data[offset] as f32;
                let g = self.data[offset + 1] as f32;
                let b = self.data[offset + 2] as f32;
                (0.299 * r + 0.587 * g + 0.114 * b) / 255.0
            }
        };
        Some(value)
    }

    /// Mean intensity over the in-bounds part of a `size x size` box centred
    /// on `(x, y)`. Sizes of 0 or 1 read the single pixel.
    pub fn box_intensity(&self, x: i64, y: i64, size: usize) -> Option<f32> {
        let center = self.intensity(x, y)?;
        if size <= 1 {
            return Some(center);
        }
        let radius = (size / 2) as i64;
        let mut sum = 0.0f32;
        let mut count = 0u32;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if let Some(v) = self.intensity(x + dx, y + dy) {
                    sum += v;
                    count += 1;
                }
            }
        }
        Some(sum / count as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_length() {
        let template = FrameTemplate::gray8(4, 4);
        assert!(Frame::new(template, 0.0, vec![0u8; 15]).is_err());
        assert!(Frame::new(template, 0.0, vec![0u8; 16]).is_ok());
    }

    #[test]
    fn shape_includes_channels_for_rgb() {
        assert_eq!(FrameTemplate::gray8(5, 3).shape(), vec![3, 5]);
        assert_eq!(
            FrameTemplate::new(5, 3, PixelFormat::Rgb24).shape(),
            vec![3, 5, 3]
        );
    }

    #[test]
    fn intensity_normalises_formats() -> Result<()> {
        let gray16 = Frame::new(
            FrameTemplate::new(1, 1, PixelFormat::Gray16),
            0.0,
            65535u16.to_le_bytes().to_vec(),
        )?;
        assert_eq!(gray16.intensity(0, 0), Some(1.0));

        let rgb = Frame::new(
            FrameTemplate::new(1, 1, PixelFormat::Rgb24),
            0.0,
            vec![0, 0, 0],
        )?;
        assert_eq!(rgb.intensity(0, 0), Some(0.0));
        assert_eq!(rgb.intensity(1, 0), None);
        assert_eq!(rgb.intensity(0, -1), None);
        Ok(())
    }

    #[test]
    fn box_intensity_ignores_out_of_bounds_pixels() {
        let frame = Frame::gray8_from_fn(3, 3, 0.0, |x, _| if x == 0 { 255 } else { 0 });
        // Corner box covers (0,0),(1,0),(0,1),(1,1): two bright, two dark.
        let v = frame.box_intensity(0, 0, 3).unwrap();
        assert!((v - 0.5).abs() < 1e-6);
    }
}
