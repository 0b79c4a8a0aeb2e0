pub mod batch;
pub mod composer;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod severity;
pub mod treatment;

pub use config::DetectionConfig;
pub use error::DetectError;
pub use model::{DetectionModel, ModelProvider};
