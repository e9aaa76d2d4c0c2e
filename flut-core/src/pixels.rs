//! Decoded image data shared read-only by every worker.
//!
//! A [`PixelBuffer`] is built once after decode/resize and then wrapped
//! in an `Arc`; chunks borrow row bands out of it by index range.

use std::fmt;
use std::str::FromStr;

use crate::error::FlutError;

/// Bytes per pixel: R, G, B, A.
pub const CHANNELS: usize = 4;

// ── Color ────────────────────────────────────────────────────────

/// One RGBA8 pixel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Build from a 4-byte RGBA slice.
    ///
    /// # Panics
    ///
    /// Panics if `px` is shorter than [`CHANNELS`].
    pub fn from_rgba(px: &[u8]) -> Self {
        Self::new(px[0], px[1], px[2], px[3])
    }
}

// ── PixelBuffer ──────────────────────────────────────────────────

/// Immutable row-major RGBA8 image.
///
/// Invariant: `data.len() == width * height * 4`, both dimensions > 0.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Box<[u8]>,
}

impl PixelBuffer {
    /// Wrap decoded RGBA8 bytes, validating the size invariant.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FlutError> {
        if width == 0 || height == 0 {
            return Err(FlutError::InvalidDimensions(format!("{width}:{height}")));
        }
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(FlutError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data: data.into_boxed_slice(),
        })
    }

    /// A `width x height` buffer filled with one color.
    pub fn filled(width: u32, height: u32, color: Color) -> Result<Self, FlutError> {
        let px = [color.r, color.g, color.b, color.a];
        let data = px.repeat(width as usize * height as usize);
        Self::from_rgba(width, height, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of pixels in the image.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Raw RGBA bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Bytes of the half-open row band `[row_start, row_end)`.
    ///
    /// # Panics
    ///
    /// Panics if the band reaches past the last row.
    pub fn rows(&self, row_start: u32, row_end: u32) -> &[u8] {
        let stride = self.width as usize * CHANNELS;
        &self.data[row_start as usize * stride..row_end as usize * stride]
    }

    /// Color at `(x, y)`, or `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        Some(Color::from_rgba(&self.data[offset..offset + CHANNELS]))
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

// ── Dimensions / Offset ──────────────────────────────────────────

/// Target image size parsed from `<width>:<height>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl FromStr for Dimensions {
    type Err = FlutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (width, height) =
            parse_pair(s).ok_or_else(|| FlutError::InvalidDimensions(s.to_string()))?;
        if width == 0 || height == 0 {
            return Err(FlutError::InvalidDimensions(s.to_string()));
        }
        Ok(Self { width, height })
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

/// Where the image's top-left pixel lands on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Offset {
    pub x: u32,
    pub y: u32,
}

impl FromStr for Offset {
    type Err = FlutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = parse_pair(s)
            .ok_or_else(|| FlutError::Config(format!("invalid offset {s:?}: expected <x>:<y>")))?;
        Ok(Self { x, y })
    }
}

fn parse_pair(s: &str) -> Option<(u32, u32)> {
    let (a, b) = s.trim().split_once(':')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> PixelBuffer {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[x as u8, y as u8, 0x80, 0xff]);
            }
        }
        PixelBuffer::from_rgba(width, height, data).unwrap()
    }

    #[test]
    fn rejects_wrong_length() {
        let err = PixelBuffer::from_rgba(2, 2, vec![0; 15]).unwrap_err();
        assert!(matches!(
            err,
            FlutError::BufferSizeMismatch {
                expected: 16,
                actual: 15
            }
        ));
    }

    #[test]
    fn rejects_zero_dimension() {
        assert!(PixelBuffer::from_rgba(0, 4, Vec::new()).is_err());
        assert!(PixelBuffer::from_rgba(4, 0, Vec::new()).is_err());
    }

    #[test]
    fn pixel_lookup_is_row_major() {
        let buf = gradient(3, 2);
        assert_eq!(buf.pixel(2, 1), Some(Color::new(2, 1, 0x80, 0xff)));
        assert_eq!(buf.pixel(3, 0), None);
        assert_eq!(buf.pixel(0, 2), None);
    }

    #[test]
    fn row_band_slices() {
        let buf = gradient(3, 4);
        assert_eq!(buf.rows(1, 3).len(), 2 * 3 * CHANNELS);
        assert_eq!(buf.rows(1, 3)[1], 1); // green channel of (0, 1)
        assert!(buf.rows(2, 2).is_empty());
    }

    #[test]
    fn filled_buffer() {
        let buf = PixelBuffer::filled(4, 4, Color::new(1, 2, 3, 4)).unwrap();
        assert_eq!(buf.pixel_count(), 16);
        assert_eq!(buf.pixel(3, 3), Some(Color::new(1, 2, 3, 4)));
    }

    #[test]
    fn parse_dimensions() {
        let d: Dimensions = "640:480".parse().unwrap();
        assert_eq!(
            d,
            Dimensions {
                width: 640,
                height: 480
            }
        );
        assert_eq!(d.to_string(), "640:480");
        assert!("640x480".parse::<Dimensions>().is_err());
        assert!("0:480".parse::<Dimensions>().is_err());
        assert!("640:".parse::<Dimensions>().is_err());
        assert!("-1:5".parse::<Dimensions>().is_err());
    }

    #[test]
    fn parse_offset() {
        let o: Offset = "10:20".parse().unwrap();
        assert_eq!(o, Offset { x: 10, y: 20 });
        assert_eq!("0:0".parse::<Offset>().unwrap(), Offset::default());
        assert!("10".parse::<Offset>().is_err());
    }
}
