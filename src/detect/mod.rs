mod annotate;
mod backend;
mod backends;
mod deadline;
mod registry;
mod result;

pub use annotate::draw_detections;
pub use backend::InferenceEngine;
pub use backends::{MotionEngine, StubEngine, STUB_MAX_DETECTIONS};
#[cfg(feature = "backend-tract")]
pub use backends::TractEngine;
pub use deadline::DeadlineEngine;
pub use registry::{engine_from_settings, ENGINE_NAMES};
pub use result::Inference;
