use anyhow::{anyhow, Result};

use crate::detect::annotate::draw_detections;
use crate::detect::backend::InferenceEngine;
use crate::detect::result::Inference;
use crate::frame::{Detection, Frame};

/// CPU engine: frame differencing over a grid of cells.
///
/// Every cell whose mean absolute difference from the previous frame exceeds the
/// threshold becomes one detection, with the normalized difference as confidence.
/// The first frame, and any frame whose geometry changed, reports nothing.
pub struct MotionEngine {
    grid: u32,
    threshold: f32,
    previous: Option<Frame>,
}

impl MotionEngine {
    pub fn new() -> Self {
        Self {
            grid: 8,
            threshold: 0.08,
            previous: None,
        }
    }

    pub fn with_grid(mut self, grid: u32) -> Result<Self> {
        if grid == 0 {
            return Err(anyhow!("motion grid must have at least one cell per side"));
        }
        self.grid = grid;
        Ok(self)
    }

    pub fn with_threshold(mut self, threshold: f32) -> Result<Self> {
        if !(0.0..1.0).contains(&threshold) {
            return Err(anyhow!("motion threshold must be in 0..1 (got {})", threshold));
        }
        self.threshold = threshold;
        Ok(self)
    }

    fn changed_cells(&self, previous: &Frame, current: &Frame) -> Vec<Detection> {
        let width = current.width();
        let height = current.height();
        let channels = current.channels() as usize;
        let cols = self.grid.min(width);
        let rows = self.grid.min(height);
        let mut detections = Vec::new();

        for row in 0..rows {
            let y0 = row * height / rows;
            let y1 = (row + 1) * height / rows;
            for col in 0..cols {
                let x0 = col * width / cols;
                let x1 = (col + 1) * width / cols;

                let mut sum = 0u64;
                let mut samples = 0u64;
                for y in y0..y1 {
                    let start = (y as usize * width as usize + x0 as usize) * channels;
                    let end = (y as usize * width as usize + x1 as usize) * channels;
                    let a = &previous.pixels()[start..end];
                    let b = &current.pixels()[start..end];
                    sum += a
                        .iter()
                        .zip(b)
                        .map(|(p, q)| p.abs_diff(*q) as u64)
                        .sum::<u64>();
                    samples += (end - start) as u64;
                }
                if samples == 0 {
                    continue;
                }
                let diff = sum as f32 / samples as f32 / 255.0;
                if diff > self.threshold {
                    detections.push(Detection::new(
                        x0 as f32 / width as f32,
                        y0 as f32 / height as f32,
                        (x1 - x0) as f32 / width as f32,
                        (y1 - y0) as f32 / height as f32,
                        diff.min(1.0),
                    ));
                }
            }
        }
        detections
    }
}

impl Default for MotionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceEngine for MotionEngine {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn infer(&mut self, frame: &Frame) -> Result<Inference> {
        let detections = match &self.previous {
            Some(prev)
                if prev.width() == frame.width()
                    && prev.height() == frame.height()
                    && prev.channels() == frame.channels() =>
            {
                self.changed_cells(prev, frame)
            }
            _ => Vec::new(),
        };
        self.previous = Some(frame.clone());

        let annotated = draw_detections(frame, &detections)?;
        Ok(Inference {
            annotated,
            detections,
        })
    }
}
