//! Sampling primitives shared by every device kind

mod circular;
mod delta;

pub use circular::CircularBuffer;
pub use delta::{DeltaTracker, HighWaterMark};
