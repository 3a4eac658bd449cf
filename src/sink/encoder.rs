//! Motion-JPEG output container.
//!
//! Nothing touches disk until the run opens the encoder with the source's stream
//! metadata, so a run whose source never opens leaves earlier output in place.
//!
//! Each annotated frame is JPEG-encoded into memory, written with a single
//! `write_all`, then flushed. A stream cut short by a crash or a cancel is
//! therefore still a valid MJPEG stream up to the last fully written frame.
//!
//! MJPEG carries no timing, so `<video>.json` records the source frame rate and
//! geometry next to the stream. It is rewritten with the final frame count when
//! the encoder finishes.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::FrameEncoder;
use crate::frame::{AnnotatedFrame, RGB_CHANNELS};
use crate::ingest::StreamInfo;

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Sidecar describing an MJPEG stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub container: String,
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
    /// Frames in the stream. Absent while the stream is still being written.
    pub frames: Option<u64>,
}

/// `out.mjpeg` -> `out.mjpeg.json`.
pub fn metadata_path(video: &Path) -> PathBuf {
    let mut name = video.as_os_str().to_os_string();
    name.push(".json");
    PathBuf::from(name)
}

pub fn read_metadata<P: AsRef<Path>>(video: P) -> Result<StreamMetadata> {
    let path = metadata_path(video.as_ref());
    let raw = std::fs::read(&path)
        .with_context(|| format!("failed to read stream metadata {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse stream metadata {}", path.display()))
}

enum Output {
    /// Nothing created yet.
    Pending,
    Open(BufWriter<File>),
    Closed,
}

pub struct MjpegEncoder {
    path: PathBuf,
    output: Output,
    quality: u8,
    /// Stream geometry, locked by the first frame.
    geometry: Option<(u32, u32)>,
    metadata: Option<StreamMetadata>,
    frames: u64,
}

impl MjpegEncoder {
    /// Prepare an encoder for `path`. The file is created (or truncated) only
    /// when the encoder is opened or receives its first frame.
    pub fn create<P: AsRef<Path>>(path: P, quality: u8) -> Result<Self> {
        if !(1..=100).contains(&quality) {
            return Err(anyhow!("jpeg quality must be in 1..=100 (got {})", quality));
        }
        let path = path.as_ref().to_path_buf();
        check_parent_dir(&path)?;
        Ok(Self {
            path,
            output: Output::Pending,
            quality,
            geometry: None,
            metadata: None,
            frames: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        if let Output::Pending = self.output {
            let file = File::create(&self.path).with_context(|| {
                format!("failed to create output video {}", self.path.display())
            })?;
            log::info!(
                "MjpegEncoder: writing {} (quality {})",
                self.path.display(),
                self.quality
            );
            self.output = Output::Open(BufWriter::new(file));
        }
        match &mut self.output {
            Output::Open(writer) => Ok(writer),
            _ => Err(anyhow!("encoder for {} is closed", self.path.display())),
        }
    }

    fn write_metadata(&self) -> Result<()> {
        let Some(metadata) = &self.metadata else {
            return Ok(());
        };
        let path = metadata_path(&self.path);
        let json = serde_json::to_vec_pretty(metadata)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write stream metadata {}", path.display()))
    }
}

impl FrameEncoder for MjpegEncoder {
    fn open(&mut self, stream: &StreamInfo) -> Result<()> {
        self.writer()?;
        self.metadata = Some(StreamMetadata {
            container: "mjpeg".to_string(),
            frame_rate: stream.frame_rate,
            width: stream.width,
            height: stream.height,
            jpeg_quality: self.quality,
            frames: None,
        });
        self.write_metadata()
    }

    fn append(&mut self, frame: &AnnotatedFrame) -> Result<()> {
        if let Output::Closed = self.output {
            return Err(anyhow!("encoder for {} is closed", self.path.display()));
        }
        if frame.channels() != RGB_CHANNELS {
            return Err(anyhow!(
                "mjpeg stream takes RGB frames, frame {} has {} channels",
                frame.index(),
                frame.channels()
            ));
        }
        let size = (frame.width(), frame.height());
        match self.geometry {
            Some(expected) if expected != size => {
                return Err(anyhow!(
                    "frame {} is {}x{}, stream is {}x{}",
                    frame.index(),
                    size.0,
                    size.1,
                    expected.0,
                    expected.1
                ));
            }
            Some(_) => {}
            None => self.geometry = Some(size),
        }

        let jpeg = encode_jpeg(frame, self.quality)?;
        let path = self.path.clone();
        let writer = self.writer()?;
        writer
            .write_all(&jpeg)
            .and_then(|_| writer.flush())
            .with_context(|| format!("write frame {} to {}", frame.index(), path.display()))?;
        self.frames += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }

    fn finish(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.output, Output::Closed) {
            Output::Open(mut writer) => {
                writer
                    .flush()
                    .with_context(|| format!("flush {}", self.path.display()))?;
                if let Some(metadata) = self.metadata.as_mut() {
                    metadata.frames = Some(self.frames);
                }
                self.write_metadata()?;
                log::debug!(
                    "MjpegEncoder: closed {} after {} frames",
                    self.path.display(),
                    self.frames
                );
            }
            Output::Pending => {
                log::debug!("MjpegEncoder: {} was never opened", self.path.display());
            }
            Output::Closed => {}
        }
        Ok(())
    }
}

/// One frame as a standalone JPEG image.
pub fn encode_jpeg(frame: &AnnotatedFrame, quality: u8) -> Result<Vec<u8>> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode(
            frame.pixels(),
            frame.width(),
            frame.height(),
            ExtendedColorType::Rgb8,
        )
        .with_context(|| format!("jpeg encoding of frame {} failed", frame.index()))?;
    Ok(jpeg)
}

/// Output files go into an existing directory; nothing is created for them.
pub(crate) fn check_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.is_dir() => Err(anyhow!(
            "output directory {} does not exist",
            dir.display()
        )),
        _ => Ok(()),
    }
}

/// Split an MJPEG byte stream into its JPEG images (SOI ... EOI).
pub fn split_mjpeg(bytes: &[u8]) -> Vec<&[u8]> {
    let mut images = Vec::new();
    let mut start = None;
    let mut i = 0;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (0xFF, 0xD8) if start.is_none() => {
                start = Some(i);
                i += 2;
            }
            (0xFF, 0xD9) => {
                if let Some(s) = start.take() {
                    images.push(&bytes[s..i + 2]);
                }
                i += 2;
            }
            _ => i += 1,
        }
    }
    images
}
