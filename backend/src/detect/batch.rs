use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use shared::DiagnosisRecord;
use uuid::Uuid;

use crate::detect::config::DetectionConfig;
use crate::detect::error::DetectError;
use crate::detect::model::DetectionModel;
use crate::detect::{composer, engine};

/// Cooperative cancellation for a batch run. Images already in flight finish;
/// images not yet started resolve to `DetectError::Cancelled`.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs the full pipeline over a collection of images with bounded
/// concurrency. One result per input, in input order, no matter which image
/// finished first; a single bad image yields an error in its slot and the
/// rest of the batch proceeds. Timeouts are per image, so one slow image
/// cannot stall the others.
pub async fn batch_detect(
    model: Arc<dyn DetectionModel>,
    user_id: Uuid,
    images: Vec<Vec<u8>>,
    config: &DetectionConfig,
    cancel: &CancelToken,
) -> Vec<Result<DiagnosisRecord, DetectError>> {
    let budget = Duration::from_millis(config.batch.image_timeout_ms);
    let concurrency = config.batch.concurrency.max(1);

    stream::iter(images)
        .map(|image_bytes| {
            let model = model.clone();
            let config = config.clone();
            let cancel = cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return Err(DetectError::Cancelled);
                }
                run_one(model, user_id, image_bytes, &config, budget).await
            }
        })
        .buffered(concurrency)
        .collect()
        .await
}

async fn run_one(
    model: Arc<dyn DetectionModel>,
    user_id: Uuid,
    image_bytes: Vec<u8>,
    config: &DetectionConfig,
    budget: Duration,
) -> Result<DiagnosisRecord, DetectError> {
    let thresholds = config.thresholds.clone();
    let severity = config.severity.clone();
    let work = tokio::task::spawn_blocking(move || {
        let inference = engine::infer(model.as_ref(), &image_bytes, &thresholds)?;
        Ok(composer::compose(user_id, &inference, &severity))
    });

    match tokio::time::timeout(budget, work).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(DetectError::Inference(join_err.to_string())),
        // The blocking task keeps running to completion on its worker thread,
        // but its slot in the batch is already decided.
        Err(_) => Err(DetectError::Timeout(budget)),
    }
}
