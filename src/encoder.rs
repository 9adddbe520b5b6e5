// Rotary position estimation core
// Decodes the raw sensor samples, tracks linear and circular counts, and
// runs the PLL observer that produces position / velocity / electrical phase

pub mod calibration;
pub mod estimator;
pub mod hall;
pub mod math;

// Re-export main types for easier access
pub use estimator::{Encoder, SINCOS_CPR};
pub use hall::decode_hall;
