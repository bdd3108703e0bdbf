pub mod catalog;
pub mod cli;
pub mod detection;
pub mod error;
pub mod fs;

pub use catalog::{Catalog, DetectionConfig};
pub use detection::{
    cache::DetectionCache,
    engine::Detector,
    types::{DetectOptions, DetectionReport, DetectionResult},
};
pub use error::{DetectorError, Result};
pub use fs::{FileSystem, LocalFileSystem};
