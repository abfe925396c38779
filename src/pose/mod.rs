pub mod estimator;
pub mod frame;
pub mod keypoint;
pub mod normalize;

pub use estimator::{PoseEstimator, ReplayEstimator};
pub use frame::{CapturedImage, Frame};
pub use keypoint::{Keypoint, KeypointIndex, Pose};
pub use normalize::{BodyFrame, KeypointNormalizer, NormalizedPose, ScaleFallback, ScaleReference};
