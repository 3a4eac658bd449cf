use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::driver::Pacing;
use crate::sink::{LogOpenMode, DEFAULT_JPEG_QUALITY};
use crate::stats::{OccupancyScale, DEFAULT_OCCUPANCY_DIVISOR};

const DEFAULT_INPUT: &str = "stub://demo";
const DEFAULT_OUTPUT_VIDEO: &str = "output.mjpeg";
const DEFAULT_OUTPUT_LOG: &str = "output_log.csv";
const DEFAULT_ENGINE: &str = "stub";
const DEFAULT_CONFIDENCE: f32 = 0.4;
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_MOTION_GRID: u32 = 8;
const DEFAULT_MOTION_THRESHOLD: f32 = 0.08;
const DEFAULT_PROGRESS_EVERY: u64 = 100;

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    input: Option<String>,
    output: Option<OutputConfigFile>,
    engine: Option<EngineConfigFile>,
    occupancy_divisor: Option<u64>,
    pacing: Option<Pacing>,
    progress_every: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    video: Option<PathBuf>,
    log: Option<PathBuf>,
    log_mode: Option<LogOpenMode>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    name: Option<String>,
    model_path: Option<PathBuf>,
    confidence: Option<f32>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    motion_grid: Option<u32>,
    motion_threshold: Option<f32>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input: String,
    pub output: OutputSettings,
    pub engine: EngineSettings,
    pub occupancy_divisor: u64,
    pub pacing: Pacing,
    pub progress_every: u64,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub video: PathBuf,
    pub log: PathBuf,
    pub log_mode: LogOpenMode,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub name: String,
    pub model_path: Option<PathBuf>,
    pub confidence: f32,
    pub input_width: u32,
    pub input_height: u32,
    pub motion_grid: u32,
    pub motion_threshold: f32,
    /// Per-frame inference deadline. `None` runs the engine inline.
    pub timeout: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_ENGINE.to_string(),
            model_path: None,
            confidence: DEFAULT_CONFIDENCE,
            input_width: DEFAULT_MODEL_INPUT,
            input_height: DEFAULT_MODEL_INPUT,
            motion_grid: DEFAULT_MOTION_GRID,
            motion_threshold: DEFAULT_MOTION_THRESHOLD,
            timeout: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults, then the file named by `SEGMENTER_CONFIG`, then `SEGMENTER_*`
    /// overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SEGMENTER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Re-check after the host changed fields (CLI flags).
    pub fn validated(mut self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    pub fn occupancy_scale(&self) -> Result<OccupancyScale> {
        OccupancyScale::new(self.occupancy_divisor)
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let output = file.output.unwrap_or_default();
        let engine = file.engine.unwrap_or_default();
        let defaults = EngineSettings::default();
        Self {
            input: file.input.unwrap_or_else(|| DEFAULT_INPUT.to_string()),
            output: OutputSettings {
                video: output
                    .video
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_VIDEO)),
                log: output
                    .log
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_LOG)),
                log_mode: output.log_mode.unwrap_or_default(),
                jpeg_quality: output.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            engine: EngineSettings {
                name: engine.name.unwrap_or(defaults.name),
                model_path: engine.model_path,
                confidence: engine.confidence.unwrap_or(defaults.confidence),
                input_width: engine.input_width.unwrap_or(defaults.input_width),
                input_height: engine.input_height.unwrap_or(defaults.input_height),
                motion_grid: engine.motion_grid.unwrap_or(defaults.motion_grid),
                motion_threshold: engine.motion_threshold.unwrap_or(defaults.motion_threshold),
                timeout: engine.timeout_ms.map(Duration::from_millis),
            },
            occupancy_divisor: file.occupancy_divisor.unwrap_or(DEFAULT_OCCUPANCY_DIVISOR),
            pacing: file.pacing.unwrap_or_default(),
            progress_every: file.progress_every.unwrap_or(DEFAULT_PROGRESS_EVERY),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(input) = std::env::var("SEGMENTER_INPUT") {
            if !input.trim().is_empty() {
                self.input = input;
            }
        }
        if let Ok(path) = std::env::var("SEGMENTER_OUTPUT") {
            if !path.trim().is_empty() {
                self.output.video = PathBuf::from(path);
            }
        }
        if let Ok(path) = std::env::var("SEGMENTER_LOG") {
            if !path.trim().is_empty() {
                self.output.log = PathBuf::from(path);
            }
        }
        if let Ok(engine) = std::env::var("SEGMENTER_ENGINE") {
            if !engine.trim().is_empty() {
                self.engine.name = engine.trim().to_lowercase();
            }
        }
        if let Ok(timeout) = std::env::var("SEGMENTER_INFERENCE_TIMEOUT_MS") {
            let millis: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("SEGMENTER_INFERENCE_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.engine.timeout = (millis > 0).then(|| Duration::from_millis(millis));
        }
        if let Ok(divisor) = std::env::var("SEGMENTER_OCCUPANCY_DIVISOR") {
            self.occupancy_divisor = divisor
                .trim()
                .parse()
                .map_err(|_| anyhow!("SEGMENTER_OCCUPANCY_DIVISOR must be a positive integer"))?;
        }
        if let Ok(pacing) = std::env::var("SEGMENTER_PACING") {
            if !pacing.trim().is_empty() {
                self.pacing = pacing.parse()?;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.input.trim().is_empty() {
            return Err(anyhow!("input must not be empty"));
        }
        if self.occupancy_divisor == 0 {
            return Err(anyhow!("occupancy divisor must be greater than zero"));
        }
        if !(1..=100).contains(&self.output.jpeg_quality) {
            return Err(anyhow!(
                "jpeg quality must be in 1..=100 (got {})",
                self.output.jpeg_quality
            ));
        }
        if self.output.video == self.output.log {
            return Err(anyhow!("output video and log must be different files"));
        }
        if !(0.0..=1.0).contains(&self.engine.confidence) {
            return Err(anyhow!(
                "engine confidence must be within [0, 1] (got {})",
                self.engine.confidence
            ));
        }
        if self.engine.input_width == 0 || self.engine.input_height == 0 {
            return Err(anyhow!("engine input size must be non-zero"));
        }
        if self.engine.timeout == Some(Duration::ZERO) {
            self.engine.timeout = None;
        }
        self.engine.name = self.engine.name.trim().to_lowercase();
        if !crate::detect::ENGINE_NAMES.contains(&self.engine.name.as_str()) {
            return Err(anyhow!(
                "unknown engine '{}' (expected one of {})",
                self.engine.name,
                crate::detect::ENGINE_NAMES.join(", ")
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = PipelineConfig::from_file(PipelineConfigFile::default());
        assert_eq!(cfg.input, DEFAULT_INPUT);
        assert_eq!(cfg.occupancy_divisor, 5);
        assert_eq!(cfg.output.log_mode, LogOpenMode::Append);
        assert_eq!(cfg.pacing, Pacing::Unthrottled);
        assert_eq!(cfg.engine, EngineSettings::default());
        assert!(cfg.validated().is_ok());
    }

    #[test]
    fn toml_sections_are_read() {
        let file: PipelineConfigFile = toml::from_str(
            r#"
            input = "stub://hall?frames=3"
            occupancy_divisor = 10
            pacing = "source-rate"

            [output]
            video = "hall.mjpeg"
            log = "hall.csv"
            log_mode = "create"

            [engine]
            name = "motion"
            timeout_ms = 250
            "#,
        )
        .unwrap();
        let cfg = PipelineConfig::from_file(file).validated().unwrap();
        assert_eq!(cfg.occupancy_divisor, 10);
        assert_eq!(cfg.pacing, Pacing::SourceRate);
        assert_eq!(cfg.output.log_mode, LogOpenMode::Create);
        assert_eq!(cfg.engine.name, "motion");
        assert_eq!(cfg.engine.timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn rejects_invalid_values() {
        let mut cfg = PipelineConfig::from_file(PipelineConfigFile::default());
        cfg.occupancy_divisor = 0;
        assert!(cfg.clone().validated().is_err());

        cfg.occupancy_divisor = 5;
        cfg.output.log = cfg.output.video.clone();
        assert!(cfg.clone().validated().is_err());

        let mut cfg = PipelineConfig::from_file(PipelineConfigFile::default());
        cfg.engine.name = "yolo".into();
        assert!(cfg.validated().is_err());
    }
}
