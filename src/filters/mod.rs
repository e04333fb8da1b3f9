pub mod heading;
pub mod linear_accel;

pub use heading::HeadingFilter;
pub use linear_accel::LinearAccelerationEstimator;
