pub mod angle;
pub mod measurement;

pub use angle::{inclination, vertex_angle, AngleSpace, Axis};
pub use measurement::{Anchor, AngleDefinition, AngleEngine, JointAngleSample, Measurement};
