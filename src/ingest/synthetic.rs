//! Synthetic `stub://` source.
//!
//! Produces a deterministic clip: a dark gradient with a bright square sweeping
//! across it. Query parameters shape the clip and inject failures:
//!
//! `stub://name?frames=10&width=64&height=48&fps=30&fault=3,7&unreadable=9&fail=open`
//!
//! - `fault`: frame indices reported as decode faults
//! - `unreadable`: frame index at which the whole stream fails
//! - `fail=open`: the source refuses to open

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeSet;

use super::{FrameSource, NextFrame, StreamInfo};
use crate::frame::Frame;

#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticClip {
    pub name: String,
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub faults: BTreeSet<u64>,
    pub unreadable_at: Option<u64>,
    pub fail_open: bool,
}

impl Default for SyntheticClip {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            frames: 100,
            width: 64,
            height: 48,
            frame_rate: 30.0,
            faults: BTreeSet::new(),
            unreadable_at: None,
            fail_open: false,
        }
    }
}

impl SyntheticClip {
    pub fn new(frames: u64) -> Self {
        Self {
            frames,
            ..Self::default()
        }
    }

    pub fn with_fault(mut self, frame_index: u64) -> Self {
        self.faults.insert(frame_index);
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Parse a `stub://name?key=value&...` URI.
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic source uri must start with stub://"))?;
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));
        let mut clip = Self {
            name: if name.is_empty() {
                "synthetic".to_string()
            } else {
                name.to_string()
            },
            ..Self::default()
        };

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed query parameter '{}' in {}", pair, uri))?;
            match key {
                "frames" => clip.frames = parse_num(key, value)?,
                "width" => clip.width = parse_num(key, value)?,
                "height" => clip.height = parse_num(key, value)?,
                "fps" => clip.frame_rate = parse_num(key, value)?,
                "fault" => {
                    for index in value.split(',').filter(|v| !v.is_empty()) {
                        clip.faults.insert(parse_num(key, index)?);
                    }
                }
                "unreadable" => clip.unreadable_at = Some(parse_num(key, value)?),
                "fail" if value == "open" => clip.fail_open = true,
                _ => return Err(anyhow!("unknown synthetic source parameter '{}'", key)),
            }
        }

        if clip.width == 0 || clip.height == 0 {
            return Err(anyhow!("synthetic clip dimensions must be non-zero"));
        }
        if !(clip.frame_rate.is_finite() && clip.frame_rate > 0.0) {
            return Err(anyhow!("synthetic clip fps must be positive"));
        }
        Ok(clip)
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid value '{}' for '{}'", value, key))
}

/// Source serving a `SyntheticClip`.
pub struct SyntheticSource {
    clip: SyntheticClip,
    opened: bool,
    cursor: u64,
}

impl SyntheticSource {
    pub fn new(clip: SyntheticClip) -> Self {
        Self {
            clip,
            opened: false,
            cursor: 0,
        }
    }

    pub fn from_uri(uri: &str) -> Result<Self> {
        Ok(Self::new(SyntheticClip::parse(uri)?))
    }

    pub fn clip(&self) -> &SyntheticClip {
        &self.clip
    }

    fn render(&self, index: u64) -> Vec<u8> {
        let width = self.clip.width as u64;
        let height = self.clip.height as u64;
        let side = (width.min(height) / 4).max(1);
        let left = (index * 3) % width;
        let top = (height - side) / 2;

        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                let inside = x >= left && x < left + side && y >= top && y < top + side;
                if inside {
                    pixels.extend_from_slice(&[240, 220, 40]);
                } else {
                    let shade = ((x + y) * 64 / (width + height)) as u8;
                    pixels.extend_from_slice(&[shade, shade, shade.saturating_add(16)]);
                }
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("stub://{}", self.clip.name)
    }

    fn open(&mut self) -> Result<StreamInfo> {
        if self.clip.fail_open {
            return Err(anyhow!("synthetic clip '{}' refuses to open", self.clip.name));
        }
        self.opened = true;
        self.cursor = 0;
        log::info!(
            "SyntheticSource: opened {} ({} frames, {}x{} @ {} fps)",
            self.clip.name,
            self.clip.frames,
            self.clip.width,
            self.clip.height,
            self.clip.frame_rate
        );
        Ok(StreamInfo {
            frame_rate: self.clip.frame_rate,
            width: self.clip.width,
            height: self.clip.height,
            total_frames: Some(self.clip.frames),
        })
    }

    fn next_frame(&mut self) -> Result<NextFrame> {
        if !self.opened {
            return Err(anyhow!("synthetic source read before open"));
        }
        if self.cursor >= self.clip.frames {
            return Ok(NextFrame::EndOfStream);
        }
        self.cursor += 1;
        let index = self.cursor;

        if self.clip.unreadable_at == Some(index) {
            return Err(anyhow!("synthetic clip '{}' became unreadable", self.clip.name));
        }
        if self.clip.faults.contains(&index) {
            return Ok(NextFrame::DecodeFault {
                frame_index: index,
                reason: "injected decode fault".to_string(),
            });
        }

        let pixels = self.render(index);
        Ok(NextFrame::Frame(Frame::rgb(
            index,
            self.clip.width,
            self.clip.height,
            pixels,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_parameters() {
        let clip =
            SyntheticClip::parse("stub://lobby?frames=10&width=32&height=16&fps=12.5&fault=3,7")
                .unwrap();
        assert_eq!(clip.name, "lobby");
        assert_eq!(clip.frames, 10);
        assert_eq!((clip.width, clip.height), (32, 16));
        assert_eq!(clip.frame_rate, 12.5);
        assert_eq!(clip.faults.iter().copied().collect::<Vec<_>>(), vec![3, 7]);
        assert!(!clip.fail_open);
    }

    #[test]
    fn rejects_unknown_parameters() {
        assert!(SyntheticClip::parse("stub://x?colour=red").is_err());
        assert!(SyntheticClip::parse("stub://x?frames=ten").is_err());
        assert!(SyntheticClip::parse("stub://x?width=0").is_err());
        assert!(SyntheticClip::parse("file:///x").is_err());
    }

    #[test]
    fn sequence_indices_include_faulted_frames() {
        let mut source = SyntheticSource::new(SyntheticClip::new(4).with_fault(2));
        source.open().unwrap();

        let mut seen = Vec::new();
        loop {
            match source.next_frame().unwrap() {
                NextFrame::Frame(frame) => seen.push(("frame", frame.index())),
                NextFrame::DecodeFault { frame_index, .. } => seen.push(("fault", frame_index)),
                NextFrame::EndOfStream => break,
            }
        }
        assert_eq!(
            seen,
            vec![("frame", 1), ("fault", 2), ("frame", 3), ("frame", 4)]
        );
        assert!(matches!(source.next_frame().unwrap(), NextFrame::EndOfStream));
    }

    #[test]
    fn frames_differ_between_indices() {
        let mut source = SyntheticSource::new(SyntheticClip::new(2));
        source.open().unwrap();
        let NextFrame::Frame(a) = source.next_frame().unwrap() else {
            panic!("expected frame");
        };
        let NextFrame::Frame(b) = source.next_frame().unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(a.byte_len(), 64 * 48 * 3);
        assert_ne!(a.pixels(), b.pixels());
    }

    #[test]
    fn read_before_open_fails() {
        let mut source = SyntheticSource::new(SyntheticClip::new(1));
        assert!(source.next_frame().is_err());
    }

    #[test]
    fn fail_open_and_unreadable() {
        let mut source = SyntheticSource::from_uri("stub://x?fail=open").unwrap();
        assert!(source.open().is_err());

        let mut source = SyntheticSource::from_uri("stub://x?frames=5&unreadable=2").unwrap();
        source.open().unwrap();
        assert!(matches!(source.next_frame().unwrap(), NextFrame::Frame(_)));
        assert!(source.next_frame().is_err());
    }
}
