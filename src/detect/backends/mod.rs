pub mod fixture;
pub mod roboflow;

pub use fixture::FixtureDetector;
pub use roboflow::{RoboflowClient, RoboflowConfig};
