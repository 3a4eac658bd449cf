//! Single-image mode: one inference over one image file.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::detect::InferenceEngine;
use crate::frame::{Detection, Frame};

#[derive(Clone, Debug, Serialize)]
pub struct StillReport {
    pub engine: &'static str,
    pub input: PathBuf,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub detections: Vec<Detection>,
}

/// Run `engine` over the image at `input` and save the annotated result to
/// `output`. The output format follows the output file extension.
pub fn process_image(
    engine: &mut dyn InferenceEngine,
    input: &Path,
    output: &Path,
) -> Result<StillReport> {
    if !input.is_file() {
        return Err(anyhow!("input image {} does not exist", input.display()));
    }
    let rgb = image::open(input)
        .with_context(|| format!("failed to decode image {}", input.display()))?
        .to_rgb8();
    let (width, height) = rgb.dimensions();
    let frame = Frame::rgb(1, width, height, rgb.into_raw())?;

    let inference = engine
        .infer(&frame)
        .with_context(|| format!("{} engine failed on {}", engine.name(), input.display()))?;
    inference.validate_for(&frame)?;

    let annotated = RgbImage::from_raw(width, height, inference.annotated.pixels().to_vec())
        .ok_or_else(|| anyhow!("annotated image does not match {}x{}", width, height))?;
    annotated
        .save(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    log::info!(
        "{}: {} detections -> {}",
        input.display(),
        inference.detections.len(),
        output.display()
    );

    Ok(StillReport {
        engine: engine.name(),
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        width,
        height,
        detections: inference.detections,
    })
}
