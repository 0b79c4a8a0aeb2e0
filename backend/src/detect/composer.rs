use shared::{DiagnosisRecord, RawDetection};
use uuid::Uuid;

use crate::detect::config::SeverityThresholds;
use crate::detect::engine::Inference;
use crate::detect::{severity, treatment};

/// Decides overall health and assembles the record to persist.
///
/// The diagnosis label follows the dominant disease; the severity reflects
/// the union of *all* diseased regions, so a leaf with several small lesions
/// of different diseases is labeled by the strongest detection but graded by
/// the total affected area.
pub fn compose(
    user_id: Uuid,
    inference: &Inference,
    thresholds: &SeverityThresholds,
) -> DiagnosisRecord {
    let diseased: Vec<RawDetection> = inference
        .detections
        .iter()
        .filter(|d| !d.class.is_healthy())
        .cloned()
        .collect();

    let Some(primary) = select_primary(&diseased) else {
        let confidence = inference
            .detections
            .iter()
            .filter(|d| d.class.is_healthy())
            .map(|d| d.confidence)
            .fold(0.0, f32::max);
        return DiagnosisRecord::healthy(user_id, confidence);
    };

    let assessment = severity::assess(&diseased, inference.width, inference.height, thresholds);
    let recommendation = treatment::recommend(primary.class, assessment.severity_level);
    DiagnosisRecord::diseased(
        user_id,
        primary.class,
        primary.confidence,
        assessment,
        recommendation,
    )
}

/// Highest confidence wins; ties go to the larger box, then to the earlier
/// detection. The order is total, so the same detections always yield the
/// same primary disease.
fn select_primary(diseased: &[RawDetection]) -> Option<&RawDetection> {
    diseased.iter().enumerate().min_by(|(ia, a), (ib, b)| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.bbox
                    .area()
                    .partial_cmp(&a.bbox.area())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| ia.cmp(ib))
    })
    .map(|(_, d)| d)
}
