use anyhow::{anyhow, Result};

use super::backend::InferenceEngine;
use super::backends::{MotionEngine, StubEngine};
use super::deadline::DeadlineEngine;
use crate::config::EngineSettings;

/// Engine names accepted by `engine_from_settings`.
pub const ENGINE_NAMES: &[&str] = &["stub", "motion", "tract"];

/// Build the configured engine. When a timeout is configured the engine runs on a
/// worker thread behind a `DeadlineEngine`.
pub fn engine_from_settings(settings: &EngineSettings) -> Result<Box<dyn InferenceEngine>> {
    let mut engine: Box<dyn InferenceEngine> = match settings.name.as_str() {
        "stub" => Box::new(StubEngine::new()),
        "motion" => Box::new(
            MotionEngine::new()
                .with_grid(settings.motion_grid)?
                .with_threshold(settings.motion_threshold)?,
        ),
        "tract" => tract_engine(settings)?,
        other => {
            return Err(anyhow!(
                "unknown engine '{}' (expected one of {})",
                other,
                ENGINE_NAMES.join(", ")
            ))
        }
    };

    match settings.timeout {
        Some(timeout) => Ok(Box::new(DeadlineEngine::spawn(engine, timeout)?)),
        None => {
            engine.warm_up()?;
            Ok(engine)
        }
    }
}

#[cfg(feature = "backend-tract")]
fn tract_engine(settings: &EngineSettings) -> Result<Box<dyn InferenceEngine>> {
    let model_path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("the tract engine requires engine.model_path"))?;
    let engine = super::backends::TractEngine::new(
        model_path,
        settings.input_width,
        settings.input_height,
    )?
    .with_threshold(settings.confidence);
    Ok(Box::new(engine))
}

#[cfg(not(feature = "backend-tract"))]
fn tract_engine(_settings: &EngineSettings) -> Result<Box<dyn InferenceEngine>> {
    Err(anyhow!("the tract engine requires the backend-tract feature"))
}
