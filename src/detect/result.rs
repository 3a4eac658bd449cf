use anyhow::{anyhow, Result};

use crate::frame::{AnnotatedFrame, Detection, Frame};

/// Output of one inference call.
#[derive(Clone, Debug)]
pub struct Inference {
    pub annotated: AnnotatedFrame,
    pub detections: Vec<Detection>,
}

impl Inference {
    /// Rejects results that would corrupt the run: an annotation for a different
    /// frame, or detections with out-of-range geometry or confidence.
    pub fn validate_for(&self, frame: &Frame) -> Result<()> {
        if self.annotated.index() != frame.index() {
            return Err(anyhow!(
                "annotation is for frame {}, expected frame {}",
                self.annotated.index(),
                frame.index()
            ));
        }
        if let Some((pos, det)) = self
            .detections
            .iter()
            .enumerate()
            .find(|(_, det)| !det.is_well_formed())
        {
            return Err(anyhow!("malformed detection #{}: {:?}", pos, det));
        }
        Ok(())
    }
}
