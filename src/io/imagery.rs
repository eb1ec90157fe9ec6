use async_trait::async_trait;

use crate::types::{AnalysisResult, Geometry, ImageComposite, TimeWindow};

/// Remote imagery platform, treated as an oracle that returns composites
/// clipped to a geometry
///
/// The platform performs scene querying, cloud masking and per-pixel median
/// reduction server-side; this crate never decodes raw scenes itself.
/// Implementations must be safe for concurrent use across jobs.
#[async_trait]
pub trait ImageryProvider: Send + Sync {
    /// Per-pixel median composite of all cloud-masked scenes acquired inside
    /// the window, clipped to the geometry.
    ///
    /// Returns `Ok(None)` when the window contains no source scenes; the
    /// caller decides whether that is fatal. A single scene in the window
    /// stands alone as its own composite.
    async fn median_composite(
        &self,
        geometry: &Geometry,
        window: &TimeWindow,
    ) -> AnalysisResult<Option<ImageComposite>>;
}
