//! GeoWatch analysis core: satellite land-cover change detection
//!
//! This library implements the change-detection pipeline of the GeoWatch
//! analysis worker: window selection and compositing, cloud/quality masking,
//! band-ratio classification, area-weighted change aggregation, raster
//! export coordination and callback delivery to the orchestrating backend.

pub mod config;
pub mod core;
pub mod io;
pub mod pipeline;
pub mod report;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    AnalysisError, AnalysisMetrics, AnalysisRequest, AnalysisResult, AnalysisType, Band,
    BoundingBox, CallbackPayload, Geometry, ImageComposite, ImageUrls, JobStatus, ProductKind,
    Stage, StageError, TimeWindow,
};

pub use config::{Environment, Settings};
pub use pipeline::Worker;
