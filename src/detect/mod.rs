mod backend;
mod backends;
mod result;

pub use backend::{DetectionRequest, DetectionService};
pub use backends::{fixture::FixtureImage, FixtureDetector, RoboflowClient, RoboflowConfig};
pub use result::{Detection, ObjectClass};
