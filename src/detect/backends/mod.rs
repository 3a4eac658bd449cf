pub mod motion;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use motion::MotionEngine;
pub use stub::{StubEngine, STUB_MAX_DETECTIONS};

#[cfg(feature = "backend-tract")]
pub use tract::TractEngine;
