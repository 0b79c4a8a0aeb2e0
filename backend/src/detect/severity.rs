use shared::{BoundingBox, RawDetection, SeverityAssessment, SeverityLevel};

use crate::detect::config::SeverityThresholds;

/// Judges how much of the image the diseased regions cover.
///
/// `detections` must already be filtered to disease classes; healthy boxes do
/// not belong here. Overlapping boxes are counted once via an exact
/// rectangle-union sweep, so two boxes covering the same tissue cannot push
/// the ratio past what the image actually shows.
pub fn assess(
    detections: &[RawDetection],
    image_width: u32,
    image_height: u32,
    thresholds: &SeverityThresholds,
) -> SeverityAssessment {
    let image_area = image_width as f64 * image_height as f64;
    if image_area <= 0.0 || detections.is_empty() {
        return SeverityAssessment {
            affected_area_ratio: 0.0,
            severity_level: SeverityLevel::None,
        };
    }

    let boxes: Vec<BoundingBox> = detections
        .iter()
        .map(|d| clamp_box(&d.bbox, image_width as f32, image_height as f32))
        .filter(|b| b.area() > 0.0)
        .collect();

    let ratio = (union_area(&boxes) / image_area).clamp(0.0, 1.0) as f32;
    SeverityAssessment {
        affected_area_ratio: ratio,
        severity_level: bucket(ratio, thresholds),
    }
}

/// Buckets partition [0, 1]: exactly zero is None, then Low up to `low_max`,
/// Medium up to `high_min`, High for the rest.
pub fn bucket(ratio: f32, thresholds: &SeverityThresholds) -> SeverityLevel {
    if ratio <= 0.0 {
        SeverityLevel::None
    } else if ratio < thresholds.low_max {
        SeverityLevel::Low
    } else if ratio < thresholds.high_min {
        SeverityLevel::Medium
    } else {
        SeverityLevel::High
    }
}

/// Exact union area of axis-aligned rectangles.
///
/// Sweeps the distinct x coordinates; inside each vertical slab the covered
/// height is the merged length of the y intervals of the boxes spanning it.
pub fn union_area(boxes: &[BoundingBox]) -> f64 {
    if boxes.is_empty() {
        return 0.0;
    }

    let mut xs: Vec<f32> = boxes.iter().flat_map(|b| [b.x1, b.x2]).collect();
    xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    xs.dedup();

    let mut total = 0.0f64;
    for window in xs.windows(2) {
        let (xa, xb) = (window[0], window[1]);
        if xb <= xa {
            continue;
        }
        let mut intervals: Vec<(f32, f32)> = boxes
            .iter()
            .filter(|b| b.x1 <= xa && b.x2 >= xb)
            .map(|b| (b.y1, b.y2))
            .collect();
        intervals.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut covered = 0.0f64;
        let mut current: Option<(f32, f32)> = None;
        for (y1, y2) in intervals {
            match current {
                Some((start, end)) if y1 <= end => {
                    current = Some((start, end.max(y2)));
                }
                Some((start, end)) => {
                    covered += (end - start) as f64;
                    current = Some((y1, y2));
                }
                None => current = Some((y1, y2)),
            }
        }
        if let Some((start, end)) = current {
            covered += (end - start) as f64;
        }
        total += covered * (xb - xa) as f64;
    }
    total
}

fn clamp_box(bbox: &BoundingBox, width: f32, height: f32) -> BoundingBox {
    BoundingBox::new(
        bbox.x1.clamp(0.0, width),
        bbox.y1.clamp(0.0, height),
        bbox.x2.clamp(0.0, width),
        bbox.y2.clamp(0.0, height),
    )
}
