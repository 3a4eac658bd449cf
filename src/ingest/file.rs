//! Local file frame source.
//!
//! This module provides `FileSource`, the source the CLI builds from a path:
//! - `stub://...` paths select the synthetic backend
//! - anything else is decoded from a local container (feature: source-ffmpeg)
//!
//! The file source MUST NOT fetch remote URLs.

use anyhow::{anyhow, Result};

#[cfg(feature = "source-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::synthetic::SyntheticSource;
use super::{FrameSource, NextFrame, StreamInfo};

/// Configuration for a local file source.
#[derive(Clone, Debug, Default)]
pub struct FileConfig {
    /// Local file path (e.g., "/data/clips/lobby.mp4") or a `stub://` clip.
    pub path: String,
}

/// Local file frame source.
pub struct FileSource {
    path: String,
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "source-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes): '{}'",
                config.path
            ));
        }
        let backend = if config.path.starts_with("stub://") {
            FileBackend::Synthetic(SyntheticSource::from_uri(&config.path)?)
        } else {
            #[cfg(feature = "source-ffmpeg")]
            {
                FileBackend::Ffmpeg(FfmpegFileSource::new(config.path.clone()))
            }
            #[cfg(not(feature = "source-ffmpeg"))]
            {
                return Err(anyhow!(
                    "decoding '{}' requires the source-ffmpeg feature",
                    config.path
                ));
            }
        };
        Ok(Self {
            path: config.path,
            backend,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl FrameSource for FileSource {
    fn describe(&self) -> String {
        self.path.clone()
    }

    fn open(&mut self) -> Result<StreamInfo> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.open(),
            #[cfg(feature = "source-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.open(),
        }
    }

    fn next_frame(&mut self) -> Result<NextFrame> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "source-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
