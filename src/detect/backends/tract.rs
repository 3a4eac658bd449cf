#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops, imageops::FilterType, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::annotate::draw_detections;
use crate::detect::backend::InferenceEngine;
use crate::detect::result::Inference;
use crate::frame::{Detection, Frame, RGB_CHANNELS};

/// Overlap above which the weaker of two boxes is suppressed.
const NMS_IOU: f32 = 0.45;

/// Tract-based engine for ONNX detection models.
///
/// Expects a YOLO-style head: one output of shape `[1, 4 + classes, anchors]` (or
/// its transpose) with `cx, cy, w, h` in model input pixels followed by class
/// scores. Frames are resized to the model input before inference.
pub struct TractEngine {
    model: TypedRunnableModel<TypedModel>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
    max_detections: usize,
}

impl TractEngine {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            confidence_threshold: 0.4,
            max_detections: 300,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.channels() != RGB_CHANNELS {
            return Err(anyhow!(
                "tract engine expects RGB frames, frame {} has {} channels",
                frame.index(),
                frame.channels()
            ));
        }
        let source = RgbImage::from_raw(frame.width(), frame.height(), frame.pixels().to_vec())
            .ok_or_else(|| anyhow!("frame {} buffer does not match its size", frame.index()))?;
        let resized = if source.dimensions() == (self.width, self.height) {
            source
        } else {
            imageops::resize(&source, self.width, self.height, FilterType::Triangle)
        };

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }

    fn decode(&self, output: &Tensor) -> Result<Vec<Detection>> {
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        // Rows are anchors, columns are features.
        let (anchors, features, transposed) = if shape[1] < shape[2] {
            (shape[2], shape[1], true)
        } else {
            (shape[1], shape[2], false)
        };
        if features < 5 {
            return Err(anyhow!("model output has {} features, need at least 5", features));
        }
        let at = |anchor: usize, feature: usize| {
            if transposed {
                view[[0, feature, anchor]]
            } else {
                view[[0, anchor, feature]]
            }
        };

        let (w, h) = (self.width as f32, self.height as f32);
        let mut candidates: Vec<Detection> = (0..anchors)
            .filter_map(|anchor| {
                let score = (4..features)
                    .map(|f| at(anchor, f))
                    .fold(f32::NEG_INFINITY, f32::max);
                if !(score.is_finite() && score >= self.confidence_threshold) {
                    return None;
                }
                let (cx, cy, bw, bh) = (at(anchor, 0), at(anchor, 1), at(anchor, 2), at(anchor, 3));
                Some(Detection::new(
                    (cx - bw / 2.0) / w,
                    (cy - bh / 2.0) / h,
                    bw / w,
                    bh / h,
                    score.min(1.0),
                ))
            })
            .collect();

        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        let mut kept: Vec<Detection> = Vec::new();
        for candidate in candidates {
            if kept.len() >= self.max_detections {
                break;
            }
            if kept.iter().all(|k| iou(k, &candidate) < NMS_IOU) {
                kept.push(candidate);
            }
        }
        Ok(kept)
    }
}

fn iou(a: &Detection, b: &Detection) -> f32 {
    let x0 = a.x.max(b.x);
    let y0 = a.y.max(b.y);
    let x1 = (a.x + a.w).min(b.x + b.w);
    let y1 = (a.y + a.h).min(b.y + b.h);
    let inter = (x1 - x0).max(0.0) * (y1 - y0).max(0.0);
    let union = a.w * a.h + b.w * b.h - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

impl InferenceEngine for TractEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, frame: &Frame) -> Result<Inference> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let detections = self.decode(output)?;
        let annotated = draw_detections(frame, &detections)?;
        Ok(Inference {
            annotated,
            detections,
        })
    }
}
