use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::Settings;
use crate::core::change::RasterProducts;
use crate::types::{
    AnalysisError, AnalysisResult, BoolMask, ImageUrls, ProductKind, VisualImage,
    ANALYSIS_SCALE_METERS,
};

/// Output projection for exported rasters, chosen for map-display clients
pub const OUTPUT_CRS: &str = "EPSG:3857";

/// Cloud-optimized GeoTIFF, supporting range-based partial reads
pub const OUTPUT_FORMAT: &str = "COG";

/// Default poll cadence against the export job queue
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default wall-clock budget for all five exports together
pub const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(300);

/// Fallback storage bucket when none is configured
pub const DEFAULT_STORAGE_BUCKET: &str = "geowatch-exports";

/// Pixel payload of one export submission
#[derive(Debug, Clone)]
pub enum RasterPayload {
    Visual(VisualImage),
    Mask(BoolMask),
}

/// One raster-product-to-storage submission
#[derive(Debug, Clone)]
pub struct ExportSpec {
    pub product: ProductKind,
    pub data: RasterPayload,
    pub bucket: String,
    pub destination_path: String,
    pub scale_meters: f64,
    pub crs: &'static str,
    pub format: &'static str,
}

/// Opaque handle to a submitted export job
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExportHandle(pub String);

/// Observable state of a submitted export job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportState {
    Submitted,
    Running,
    Completed { url: String },
    Failed { reason: String },
    Cancelled,
}

/// Asynchronous batch-export facility of the imagery platform
#[async_trait]
pub trait ExportQueue: Send + Sync {
    async fn submit(&self, spec: ExportSpec) -> AnalysisResult<ExportHandle>;
    async fn status(&self, handle: &ExportHandle) -> AnalysisResult<ExportState>;
}

/// Job identifiers needed to derive deterministic output paths
#[derive(Debug, Clone)]
pub struct ExportJobContext {
    pub area_id: String,
    pub result_id: String,
    pub current_date: NaiveDate,
}

impl ExportJobContext {
    fn destination_path(&self, product: ProductKind) -> String {
        format!(
            "{}/{}/{}_{}.tif",
            self.area_id, self.result_id, self.current_date, product
        )
    }
}

/// Submits the five raster products and polls them to completion.
///
/// All submissions happen before any polling (fan-out then fan-in) so the
/// wall-clock cost is the slowest export, not the sum.
pub struct ExportCoordinator<Q> {
    queue: Q,
    bucket: String,
    poll_interval: Duration,
    budget: Duration,
}

impl<Q: ExportQueue> ExportCoordinator<Q> {
    pub fn new(queue: Q) -> Self {
        Self {
            queue,
            bucket: DEFAULT_STORAGE_BUCKET.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            budget: DEFAULT_EXPORT_TIMEOUT,
        }
    }

    pub fn from_settings(queue: Q, settings: &Settings) -> Self {
        Self {
            queue,
            bucket: settings.storage_bucket.clone(),
            poll_interval: settings.export_poll_interval,
            budget: settings.export_timeout,
        }
    }

    pub fn with_timing(mut self, poll_interval: Duration, budget: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.budget = budget;
        self
    }

    fn spec(
        &self,
        job: &ExportJobContext,
        product: ProductKind,
        data: RasterPayload,
    ) -> ExportSpec {
        ExportSpec {
            product,
            data,
            bucket: self.bucket.clone(),
            destination_path: job.destination_path(product),
            scale_meters: ANALYSIS_SCALE_METERS,
            crs: OUTPUT_CRS,
            format: OUTPUT_FORMAT,
        }
    }

    /// Export all five products and return their storage locators.
    ///
    /// A `Failed` or `Cancelled` job aborts immediately with `ExportFailed`;
    /// sibling jobs already submitted are left to finish on the platform.
    /// Exceeding the wall-clock budget with jobs still pending raises
    /// `ExportTimeout` naming the pending products.
    pub async fn export_all(
        &self,
        products: RasterProducts,
        job: &ExportJobContext,
    ) -> AnalysisResult<ImageUrls> {
        let specs = [
            self.spec(
                job,
                ProductKind::BaselineImage,
                RasterPayload::Visual(products.baseline_visual),
            ),
            self.spec(
                job,
                ProductKind::CurrentImage,
                RasterPayload::Visual(products.current_visual),
            ),
            self.spec(
                job,
                ProductKind::BaselineComputed,
                RasterPayload::Mask(products.baseline_class),
            ),
            self.spec(
                job,
                ProductKind::CurrentComputed,
                RasterPayload::Mask(products.current_class),
            ),
            self.spec(
                job,
                ProductKind::DifferenceImage,
                RasterPayload::Visual(products.difference),
            ),
        ];

        log::info!(
            "Submitting {} export jobs for result {}",
            specs.len(),
            job.result_id
        );

        let kinds: Vec<ProductKind> = specs.iter().map(|s| s.product).collect();
        let [s0, s1, s2, s3, s4] = specs;
        let handles = tokio::try_join!(
            self.queue.submit(s0),
            self.queue.submit(s1),
            self.queue.submit(s2),
            self.queue.submit(s3),
            self.queue.submit(s4),
        )?;
        let handles = [handles.0, handles.1, handles.2, handles.3, handles.4];

        let mut pending: Vec<(ProductKind, ExportHandle)> =
            kinds.into_iter().zip(handles).collect();
        let mut urls: HashMap<ProductKind, String> = HashMap::new();
        let deadline = Instant::now() + self.budget;

        while !pending.is_empty() {
            if Instant::now() >= deadline {
                let pending_kinds: Vec<ProductKind> =
                    pending.iter().map(|(kind, _)| *kind).collect();
                log::error!(
                    "Export budget exceeded for result {}; pending: {:?}",
                    job.result_id,
                    pending_kinds
                );
                return Err(AnalysisError::ExportTimeout(pending_kinds));
            }

            tokio::time::sleep(self.poll_interval).await;

            let mut still_pending = Vec::with_capacity(pending.len());
            for (kind, handle) in pending {
                match self.queue.status(&handle).await? {
                    ExportState::Completed { url } => {
                        log::info!("Export of {} completed: {}", kind, url);
                        urls.insert(kind, url);
                    }
                    ExportState::Failed { reason } => {
                        return Err(AnalysisError::ExportFailed {
                            product: kind,
                            reason,
                        });
                    }
                    ExportState::Cancelled => {
                        return Err(AnalysisError::ExportFailed {
                            product: kind,
                            reason: "cancelled by the platform".to_string(),
                        });
                    }
                    ExportState::Submitted | ExportState::Running => {
                        still_pending.push((kind, handle));
                    }
                }
            }
            pending = still_pending;
        }

        ImageUrls::from_map(urls).ok_or_else(|| {
            AnalysisError::Platform("export queue returned an incomplete URL set".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_destination_path_is_deterministic() {
        let job = ExportJobContext {
            area_id: "area-7".to_string(),
            result_id: "res-42".to_string(),
            current_date: NaiveDate::from_ymd_opt(2024, 8, 15).unwrap(),
        };
        assert_eq!(
            job.destination_path(ProductKind::DifferenceImage),
            "area-7/res-42/2024-08-15_difference_image.tif"
        );
        assert_eq!(
            job.destination_path(ProductKind::DifferenceImage),
            job.destination_path(ProductKind::DifferenceImage)
        );
    }
}
