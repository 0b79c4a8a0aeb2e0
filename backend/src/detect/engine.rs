use image::RgbImage;
use shared::RawDetection;

use crate::detect::config::ThresholdConfig;
use crate::detect::error::DetectError;
use crate::detect::model::DetectionModel;

/// Filtered, deduplicated detections for one image, with its dimensions.
#[derive(Debug, Clone)]
pub struct Inference {
    pub detections: Vec<RawDetection>,
    pub width: u32,
    pub height: u32,
}

/// Runs one image through the model: decode, forward, confidence filter,
/// per-class non-max suppression. Model failures surface as errors; they are
/// never folded into an empty (and therefore "healthy") detection set.
pub fn infer(
    model: &dyn DetectionModel,
    image_bytes: &[u8],
    thresholds: &ThresholdConfig,
) -> Result<Inference, DetectError> {
    let image = decode_image(image_bytes)?;
    let mut candidates = model.forward(&image)?;
    candidates.retain(|d| d.confidence >= thresholds.confidence);
    let detections = non_max_suppression(candidates, thresholds.iou);
    Ok(Inference {
        detections,
        width: image.width(),
        height: image.height(),
    })
}

pub fn decode_image(image_bytes: &[u8]) -> Result<RgbImage, DetectError> {
    let image = image::load_from_memory(image_bytes)
        .map_err(|e| DetectError::InvalidImage(e.to_string()))?
        .to_rgb8();
    if image.width() == 0 || image.height() == 0 {
        return Err(DetectError::InvalidImage("image has zero area".to_string()));
    }
    Ok(image)
}

/// Intersection over union of two boxes; degenerate boxes score 0.
pub fn iou(a: &RawDetection, b: &RawDetection) -> f32 {
    let intersection = a.bbox.intersection_area(&b.bbox);
    let union = a.bbox.area() + b.bbox.area() - intersection;
    if union > 0.0 { intersection / union } else { 0.0 }
}

/// Greedy non-max suppression, independently per class: highest confidence
/// first (ties by larger box, then input order), suppress same-class boxes
/// whose IoU with the keeper reaches the threshold. Idempotent: a second
/// pass over its own output changes nothing.
pub fn non_max_suppression(
    detections: Vec<RawDetection>,
    iou_threshold: f32,
) -> Vec<RawDetection> {
    let mut order: Vec<(usize, RawDetection)> = detections.into_iter().enumerate().collect();
    order.sort_by(|(ia, a), (ib, b)| {
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
    });

    let mut kept: Vec<RawDetection> = Vec::with_capacity(order.len());
    for (_, candidate) in order {
        let duplicate = kept
            .iter()
            .any(|k| k.class == candidate.class && iou(k, &candidate) >= iou_threshold);
        if !duplicate {
            kept.push(candidate);
        }
    }
    kept
}
