use anyhow::Result;

use crate::detect::result::Inference;
use crate::frame::Frame;

/// Inference engine contract.
///
/// Given one frame, an engine returns the detected regions and an annotated
/// rendering of that frame. `infer` is the single call in a pipeline step that is
/// allowed to block on external latency.
///
/// Any error is fatal to the run that issued the call. Engines that need a hard
/// latency bound are wrapped in `DeadlineEngine`.
pub trait InferenceEngine: Send {
    /// Engine identifier.
    fn name(&self) -> &'static str;

    /// Run inference on a frame.
    fn infer(&mut self, frame: &Frame) -> Result<Inference>;

    /// Optional warm-up hook, called once before the first `infer`.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn infer(&mut self, frame: &Frame) -> Result<Inference> {
        (**self).infer(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
