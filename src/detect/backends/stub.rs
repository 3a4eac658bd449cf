use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::annotate::draw_detections;
use crate::detect::backend::InferenceEngine;
use crate::detect::result::Inference;
use crate::frame::{Detection, Frame};

/// Most detections the stub reports for one frame.
pub const STUB_MAX_DETECTIONS: u8 = 7;

/// Stub engine for testing. Derives detections from a pixel digest, so the same
/// frame always yields the same regions.
pub struct StubEngine {
    max_detections: u8,
}

impl StubEngine {
    pub fn new() -> Self {
        Self {
            max_detections: STUB_MAX_DETECTIONS,
        }
    }

    /// Cap detections per frame (at most `STUB_MAX_DETECTIONS`).
    pub fn with_max_detections(mut self, max: u8) -> Self {
        self.max_detections = max.min(STUB_MAX_DETECTIONS);
        self
    }

    fn detections_for(&self, pixels: &[u8]) -> Vec<Detection> {
        let digest: [u8; 32] = Sha256::digest(pixels).into();
        let count = digest[0] % (self.max_detections + 1);
        digest[1..]
            .chunks_exact(4)
            .take(count as usize)
            .map(|b| {
                let unit = |v: u8| v as f32 / 255.0;
                Detection::new(
                    unit(b[0]) * 0.8,
                    unit(b[1]) * 0.8,
                    0.05 + unit(b[2]) * 0.15,
                    0.05 + unit(b[3]) * 0.15,
                    0.4 + unit(b[0] ^ b[3]) * 0.6,
                )
            })
            .collect()
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, frame: &Frame) -> Result<Inference> {
        let detections = self.detections_for(frame.pixels());
        let annotated = draw_detections(frame, &detections)?;
        Ok(Inference {
            annotated,
            detections,
        })
    }
}
