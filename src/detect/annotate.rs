//! Box-outline rendering of detections onto a copy of the frame.

use anyhow::Result;

use crate::frame::{AnnotatedFrame, Detection, Frame};

/// Outline thickness in pixels.
const STROKE: u32 = 2;

/// Draws one outline per detection. Colour runs from red (low confidence) to
/// green (high confidence); single-channel frames get a white outline.
pub fn draw_detections(frame: &Frame, detections: &[Detection]) -> Result<AnnotatedFrame> {
    if detections.is_empty() {
        return Ok(AnnotatedFrame::passthrough(frame));
    }

    let width = frame.width();
    let height = frame.height();
    let channels = frame.channels() as usize;
    let mut pixels = frame.pixels().to_vec();

    for det in detections {
        let colour = confidence_colour(det.confidence);
        let (x0, y0, x1, y1) = det.pixel_rect(width, height);
        for y in y0..=y1 {
            for x in x0..=x1 {
                let on_edge = x < x0 + STROKE
                    || x + STROKE > x1
                    || y < y0 + STROKE
                    || y + STROKE > y1;
                if !on_edge {
                    continue;
                }
                let offset = (y as usize * width as usize + x as usize) * channels;
                let px = &mut pixels[offset..offset + channels];
                if channels >= 3 {
                    px[..3].copy_from_slice(&colour);
                } else {
                    px.fill(255);
                }
            }
        }
    }

    AnnotatedFrame::new(frame.index(), width, height, frame.channels(), pixels)
}

fn confidence_colour(confidence: f32) -> [u8; 3] {
    let c = if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };
    [((1.0 - c) * 255.0) as u8, (c * 255.0) as u8, 32]
}
