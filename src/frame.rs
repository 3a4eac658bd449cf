//! Frame types shared by sources, engines, sinks and displays.
//!
//! - `Frame`: one decoded image unit tagged with its sequence index. Immutable.
//! - `AnnotatedFrame`: the engine's rendering of a frame. This is what the encoder
//!   and the display receive; the source frame itself never reaches them.
//! - `Detection`: one region of interest plus a confidence score.
//!
//! Pixel storage is reference counted. Handing a frame to a display thread or an
//! inference worker clones a pointer, never the pixel buffer.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::Arc;

/// Channel count of interleaved RGB frames produced by every bundled source.
pub const RGB_CHANNELS: u8 = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Decoded frame. Sequence indices start at 1 and increase by one per frame pulled
/// from the source, faulted frames included.
///
/// There is no mutable access to the pixels. Annotation produces a new
/// `AnnotatedFrame` instead.
#[derive(Clone, Debug)]
pub struct Frame {
    index: u64,
    width: u32,
    height: u32,
    channels: u8,
    pixels: Arc<[u8]>,
}

impl Frame {
    pub fn new(index: u64, width: u32, height: u32, channels: u8, pixels: Vec<u8>) -> Result<Self> {
        if index == 0 {
            return Err(anyhow!("frame sequence index starts at 1"));
        }
        let expected = buffer_len(width, height, channels)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame {} expected {} bytes for {}x{}x{}, received {}",
                index,
                expected,
                width,
                height,
                channels,
                pixels.len()
            ));
        }
        Ok(Self {
            index,
            width,
            height,
            channels,
            pixels: pixels.into(),
        })
    }

    /// Interleaved 8-bit RGB frame.
    pub fn rgb(index: u64, width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        Self::new(index, width, height, RGB_CHANNELS, pixels)
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

/// Checked `width * height * channels`.
pub(crate) fn buffer_len(width: u32, height: u32, channels: u8) -> Result<usize> {
    if width == 0 || height == 0 || channels == 0 {
        return Err(anyhow!(
            "frame dimensions must be non-zero (got {}x{}x{})",
            width,
            height,
            channels
        ));
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(channels as usize))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// AnnotatedFrame
// ----------------------------------------------------------------------------

/// Engine rendering of a source frame. Keeps the source frame's sequence index so
/// the encoder and the run log stay aligned.
#[derive(Clone, Debug)]
pub struct AnnotatedFrame {
    inner: Frame,
}

impl AnnotatedFrame {
    pub fn new(index: u64, width: u32, height: u32, channels: u8, pixels: Vec<u8>) -> Result<Self> {
        Ok(Self {
            inner: Frame::new(index, width, height, channels, pixels)?,
        })
    }

    /// Annotation that leaves the source pixels untouched.
    pub fn passthrough(frame: &Frame) -> Self {
        Self {
            inner: frame.clone(),
        }
    }

    pub fn index(&self) -> u64 {
        self.inner.index
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    pub fn channels(&self) -> u8 {
        self.inner.channels
    }

    pub fn pixels(&self) -> &[u8] {
        self.inner.pixels()
    }

    pub fn as_frame(&self) -> &Frame {
        &self.inner
    }
}

// ----------------------------------------------------------------------------
// Detection
// ----------------------------------------------------------------------------

/// One detected region. Coordinates are normalized to 0..1 of the frame size.
///
/// Detections carry no identity; nothing links a region to one in another frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub confidence: f32,
}

impl Detection {
    /// Builds a detection, clamping the region into the unit square.
    pub fn new(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> Self {
        let x = clamp_unit(x);
        let y = clamp_unit(y);
        Self {
            x,
            y,
            w: clamp_unit(w).min(1.0 - x),
            h: clamp_unit(h).min(1.0 - y),
            confidence,
        }
    }

    /// A detection is well formed when its confidence is a finite score in 0..=1
    /// and its region lies inside the unit square.
    pub fn is_well_formed(&self) -> bool {
        let unit = |v: f32| v.is_finite() && (0.0..=1.0).contains(&v);
        unit(self.confidence)
            && unit(self.x)
            && unit(self.y)
            && unit(self.w)
            && unit(self.h)
            && self.x + self.w <= 1.0 + f32::EPSILON
            && self.y + self.h <= 1.0 + f32::EPSILON
    }

    /// Inclusive pixel rectangle `(x0, y0, x1, y1)` for a frame of the given size.
    pub fn pixel_rect(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let max_x = width.saturating_sub(1);
        let max_y = height.saturating_sub(1);
        let x0 = ((self.x * width as f32).floor() as u32).min(max_x);
        let y0 = ((self.y * height as f32).floor() as u32).min(max_y);
        let x1 = (((self.x + self.w) * width as f32).ceil() as u32)
            .saturating_sub(1)
            .clamp(x0, max_x);
        let y1 = (((self.y + self.h) * height as f32).ceil() as u32)
            .saturating_sub(1)
            .clamp(y0, max_y);
        (x0, y0, x1, y1)
    }
}

fn clamp_unit(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
