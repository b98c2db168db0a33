//! Capture primitive abstraction.
//!
//! The host environment provides a way to grab the visible viewport; the
//! backup engine only sees it through [`ViewportCapture`]:
//! - `SimulatedDevice` renders frames of a fixture-described configurator
//! - `MockFramebuffer` returns one programmatically drawn frame

use async_trait::async_trait;
use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::{ImageBuffer, RgbImage};
use std::io::Cursor;
use std::sync::Arc;

use super::types::{SnapshotError, SnapshotResult};
use super::utils::to_data_url;

/// Still image of the visible viewport
///
/// Implementations return a `data:image/png;base64,...` URL, the shape
/// browser capture primitives hand back.
#[async_trait]
pub trait ViewportCapture: Send + Sync {
    async fn capture_viewport(&self) -> SnapshotResult<String>;
}

#[async_trait]
impl<T: ViewportCapture + ?Sized> ViewportCapture for Arc<T> {
    async fn capture_viewport(&self) -> SnapshotResult<String> {
        (**self).capture_viewport().await
    }
}

/// A virtual framebuffer for testing and programmatic drawing
///
/// Provides a small drawing API for synthetic captures:
/// - `fill()` - Fill entire buffer with a color
/// - `draw_rect()` - Draw a filled rectangle
/// - `draw_text()` - Draw text using font8x8 glyphs
/// - `get_pixel()` / `set_pixel()` - Direct pixel access
#[derive(Debug, Clone)]
pub struct MockFramebuffer {
    width: u32,
    height: u32,
    /// RGB pixel buffer (row-major, 3 bytes per pixel)
    buffer: Vec<u8>,
}

impl MockFramebuffer {
    /// Create a new framebuffer with the given dimensions, initialized to black
    pub fn new(width: u32, height: u32) -> Self {
        let buffer = vec![0u8; (width * height * 3) as usize];
        Self {
            width,
            height,
            buffer,
        }
    }

    /// Create a framebuffer initialized to a specific color
    pub fn with_color(width: u32, height: u32, color: [u8; 3]) -> Self {
        let mut fb = Self::new(width, height);
        fb.fill(color);
        fb
    }

    /// Load a framebuffer from PNG image bytes
    pub fn from_png_bytes(data: &[u8]) -> SnapshotResult<Self> {
        let rgb = image::load_from_memory(data)?.to_rgb8();
        Ok(Self {
            width: rgb.width(),
            height: rgb.height(),
            buffer: rgb.into_raw(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Fill the entire framebuffer with a color
    pub fn fill(&mut self, color: [u8; 3]) {
        for chunk in self.buffer.chunks_exact_mut(3) {
            chunk.copy_from_slice(&color);
        }
    }

    /// Draw a filled rectangle
    pub fn draw_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: [u8; 3]) {
        for py in y..(y + h).min(self.height) {
            for px in x..(x + w).min(self.width) {
                self.set_pixel(px, py, color);
            }
        }
    }

    /// Fill row `y` across the whole width
    pub fn draw_row(&mut self, y: u32, color: [u8; 3]) {
        self.draw_rect(0, y, self.width, 1, color);
    }

    /// Draw text using font8x8 glyphs
    ///
    /// Each character is 8x8 pixels. Text does not wrap.
    pub fn draw_text(&mut self, x: u32, y: u32, text: &str, fg: [u8; 3], bg: [u8; 3]) {
        let mut cursor_x = x;
        for ch in text.chars() {
            if cursor_x >= self.width {
                break;
            }
            self.draw_char(cursor_x, y, ch, fg, bg);
            cursor_x += 8;
        }
    }

    fn draw_char(&mut self, x: u32, y: u32, ch: char, fg: [u8; 3], bg: [u8; 3]) {
        let glyph = BASIC_FONTS.get(ch).unwrap_or([0u8; 8]);
        for (row_idx, row) in glyph.iter().enumerate() {
            let py = y + row_idx as u32;
            if py >= self.height {
                break;
            }
            for bit in 0..8 {
                let px = x + bit;
                if px >= self.width {
                    break;
                }
                // font8x8 stores LSB as leftmost pixel
                let is_fg = (row >> bit) & 1 == 1;
                self.set_pixel(px, py, if is_fg { fg } else { bg });
            }
        }
    }

    /// Get the color of a pixel
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        if x >= self.width || y >= self.height {
            return [0, 0, 0];
        }
        let idx = ((y * self.width + x) * 3) as usize;
        [self.buffer[idx], self.buffer[idx + 1], self.buffer[idx + 2]]
    }

    /// Set the color of a pixel
    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        self.buffer[idx..idx + 3].copy_from_slice(&color);
    }

    /// Convert to an image buffer
    pub fn to_image(&self) -> SnapshotResult<RgbImage> {
        ImageBuffer::from_raw(self.width, self.height, self.buffer.clone())
            .ok_or_else(|| SnapshotError::Capture("framebuffer size does not match dimensions".to_string()))
    }

    /// Encode the framebuffer as PNG bytes
    pub fn to_png(&self) -> SnapshotResult<Vec<u8>> {
        let img = self.to_image()?;
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
        Ok(bytes)
    }

    /// Encode the framebuffer as a PNG data URL
    pub fn to_data_url(&self) -> SnapshotResult<String> {
        Ok(to_data_url(&self.to_png()?))
    }
}

#[async_trait]
impl ViewportCapture for MockFramebuffer {
    async fn capture_viewport(&self) -> SnapshotResult<String> {
        self.to_data_url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::utils::decode_data_url;

    #[test]
    fn test_mock_framebuffer_fill() {
        let mut fb = MockFramebuffer::new(10, 10);
        assert_eq!(fb.get_pixel(0, 0), [0, 0, 0]);
        fb.fill([255, 128, 64]);
        assert_eq!(fb.get_pixel(0, 0), [255, 128, 64]);
        assert_eq!(fb.get_pixel(9, 9), [255, 128, 64]);
    }

    #[test]
    fn test_mock_framebuffer_draw_rect() {
        let mut fb = MockFramebuffer::new(20, 20);
        fb.draw_rect(5, 5, 10, 10, [255, 0, 0]);

        assert_eq!(fb.get_pixel(4, 4), [0, 0, 0]);
        assert_eq!(fb.get_pixel(5, 5), [255, 0, 0]);
        assert_eq!(fb.get_pixel(14, 14), [255, 0, 0]);
        assert_eq!(fb.get_pixel(15, 15), [0, 0, 0]);
    }

    #[test]
    fn test_mock_framebuffer_draw_text() {
        let mut fb = MockFramebuffer::new(80, 16);
        fb.draw_text(0, 0, "Hi", [255, 255, 255], [0, 0, 0]);

        let has_white = (0..8).any(|y| (0..8).any(|x| fb.get_pixel(x, y) == [255, 255, 255]));
        assert!(has_white, "Character 'H' should have some foreground pixels");
    }

    #[tokio::test]
    async fn test_capture_viewport_returns_png_data_url() {
        let mut fb = MockFramebuffer::new(32, 32);
        fb.fill([100, 150, 200]);
        fb.draw_row(10, [255, 0, 0]);

        let url = fb.capture_viewport().await.unwrap();
        let png = decode_data_url(&url).unwrap();
        assert_eq!(&png[0..4], &[0x89, 0x50, 0x4E, 0x47]);

        let fb2 = MockFramebuffer::from_png_bytes(&png).unwrap();
        assert_eq!(fb2.width(), 32);
        assert_eq!(fb2.get_pixel(0, 0), [100, 150, 200]);
        assert_eq!(fb2.get_pixel(31, 10), [255, 0, 0]);
    }
}
