use chrono::{DateTime, Utc};

use crate::core::change::{aggregate_change, ChangeSummary, EpochData};
use crate::core::classify::classify;
use crate::core::cloud_mask::build_validity_mask;
use crate::core::selector::{select_epochs, SelectedEpochs};
use crate::io::callback::{CallbackClient, CallbackTransport, TokenProvider};
use crate::io::export::{ExportCoordinator, ExportJobContext, ExportQueue};
use crate::io::imagery::ImageryProvider;
use crate::types::{
    AnalysisRequest, CallbackPayload, JobStatus, Stage, StageError,
};

/// One analysis worker: collaborator clients wired together for job runs.
///
/// Clients are stateless and safe for concurrent use, so a single worker can
/// serve many jobs at once; each job is otherwise fully isolated.
pub struct Worker<P, Q, T, A> {
    provider: P,
    exporter: ExportCoordinator<Q>,
    callback: CallbackClient<T, A>,
}

impl<P, Q, T, A> Worker<P, Q, T, A>
where
    P: ImageryProvider,
    Q: ExportQueue,
    T: CallbackTransport,
    A: TokenProvider,
{
    pub fn new(
        provider: P,
        exporter: ExportCoordinator<Q>,
        callback: CallbackClient<T, A>,
    ) -> Self {
        Self {
            provider,
            exporter,
            callback,
        }
    }

    /// Run one analysis job end to end and always report the outcome.
    ///
    /// Any stage failure short-circuits into a failed payload; the callback
    /// is sent unconditionally with whatever information survived
    /// (callback-or-bust). Exhausted callback delivery is logged, never
    /// propagated: the triggering request already got its 202.
    pub async fn run_job(&self, request: AnalysisRequest, now: DateTime<Utc>) {
        log::info!(
            "Starting analysis for result {} (area {}, type {}, baseline: {})",
            request.result_id,
            request.area_id,
            request.analysis_type,
            request.is_baseline
        );

        let payload = match self.execute(&request, now).await {
            Ok(payload) => payload,
            Err(stage_err) => {
                log::error!(
                    "Analysis failed for result {}: {}",
                    request.result_id,
                    stage_err
                );
                CallbackPayload::failed(&request.result_id, format!("Analysis error: {stage_err}"))
            }
        };

        log::info!(
            "Sending final callback for result {} with status {:?}",
            request.result_id,
            payload.status
        );
        if let Err(e) = self.callback.send(&payload).await {
            // Job is lost from the request path; external monitoring picks it up
            log::error!("Failed to deliver callback: {}", e);
        }
    }

    /// The five sequential stages, each error tagged with its origin.
    async fn execute(
        &self,
        request: &AnalysisRequest,
        now: DateTime<Utc>,
    ) -> Result<CallbackPayload, StageError> {
        log::info!("Step 1/5: selecting imagery epochs for {}", request.result_id);
        let epochs = select_epochs(&self.provider, &request.polygon, now)
            .await
            .map_err(|e| StageError::new(Stage::Selector, e))?;

        log::info!("Step 2/5: building validity masks for {}", request.result_id);
        let baseline_validity = build_validity_mask(&epochs.baseline)
            .map_err(|e| StageError::new(Stage::CloudMask, e))?;
        let current_validity = build_validity_mask(&epochs.current)
            .map_err(|e| StageError::new(Stage::CloudMask, e))?;

        log::info!("Step 3/5: classifying epochs for {}", request.result_id);
        let baseline_class =
            classify(&epochs.baseline, &baseline_validity.mask, request.analysis_type)
                .map_err(|e| StageError::new(Stage::Classifier, e))?;
        let current_class =
            classify(&epochs.current, &current_validity.mask, request.analysis_type)
                .map_err(|e| StageError::new(Stage::Classifier, e))?;

        log::info!("Step 4/5: aggregating change for {}", request.result_id);
        let SelectedEpochs {
            geometry,
            baseline,
            current,
            ..
        } = epochs;
        let baseline_epoch = EpochData {
            composite: baseline,
            validity: baseline_validity,
            class_mask: baseline_class,
        };
        let current_epoch = EpochData {
            composite: current,
            validity: current_validity,
            class_mask: current_class,
        };
        let summary = aggregate_change(
            &geometry,
            &baseline_epoch,
            &current_epoch,
            request.analysis_type,
        )
        .map_err(|e| StageError::new(Stage::Aggregator, e))?;

        log::info!("Step 5/5: exporting raster products for {}", request.result_id);
        let job = ExportJobContext {
            area_id: request.area_id.clone(),
            result_id: request.result_id.clone(),
            current_date: summary.metrics.current_date,
        };
        let ChangeSummary {
            metrics,
            products,
            bounds,
            ..
        } = summary;
        let image_urls = self
            .exporter
            .export_all(products, &job)
            .await
            .map_err(|e| StageError::new(Stage::Export, e))?;

        Ok(CallbackPayload {
            result_id: request.result_id.clone(),
            status: JobStatus::Completed,
            error_message: None,
            image_urls: Some(image_urls),
            metrics: Some(metrics),
            bounds: Some(bounds.as_bounds()),
        })
    }
}
