pub mod engine;
pub mod reconciler;
pub mod slicer;
pub mod throttler;

pub use engine::{ExecutionConfig, ExecutionEngine, ExecutionEvent, ExecutionHandle};
pub use slicer::slice_order;
pub use throttler::DispatchThrottler;
