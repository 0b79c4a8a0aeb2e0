use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use uuid::Uuid;

/// Disease taxonomy of the trained model, in class-id order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DiseaseClass {
    Healthy,
    BacterialSpot,
    EarlyBlight,
    LateBlight,
    LeafMold,
    SeptoriaLeafSpot,
    SpiderMites,
    TargetSpot,
    MosaicVirus,
    YellowLeafCurlVirus,
}

impl DiseaseClass {
    /// Maps a model head class index to its label.
    pub fn from_class_id(class_id: usize) -> Option<Self> {
        use DiseaseClass::*;
        match class_id {
            0 => Some(Healthy),
            1 => Some(BacterialSpot),
            2 => Some(EarlyBlight),
            3 => Some(LateBlight),
            4 => Some(LeafMold),
            5 => Some(SeptoriaLeafSpot),
            6 => Some(SpiderMites),
            7 => Some(TargetSpot),
            8 => Some(MosaicVirus),
            9 => Some(YellowLeafCurlVirus),
            _ => None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, DiseaseClass::Healthy)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumIter, EnumString,
)]
pub enum SeverityLevel {
    None,
    Low,
    Medium,
    High,
}

impl SeverityLevel {
    /// The wire contract renders `None` as a JSON null rather than "None".
    pub fn as_reported(self) -> Option<SeverityLevel> {
        match self {
            SeverityLevel::None => Option::None,
            level => Some(level),
        }
    }
}

/// Axis-aligned box in image pixel coordinates, `x1 < x2`, `y1 < y2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f32 {
        let w = self.x2.min(other.x2) - self.x1.max(other.x1);
        let h = self.y2.min(other.y2) - self.y1.max(other.y1);
        w.max(0.0) * h.max(0.0)
    }
}

/// One detected region, as produced by a single inference call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub class: DiseaseClass,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Output of the severity analyzer over the diseased detections of one image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityAssessment {
    /// Union area of diseased boxes over image area, in [0, 1].
    pub affected_area_ratio: f32,
    pub severity_level: SeverityLevel,
}

impl SeverityAssessment {
    pub fn percentage(&self) -> f32 {
        self.affected_area_ratio * 100.0
    }
}

/// The persisted unit: one diagnosis for one image. Never mutated after
/// creation; deleted only through bulk account purge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub disease_detected: bool,
    pub disease_type: Option<DiseaseClass>,
    pub confidence: f32,
    pub severity_level: SeverityLevel,
    pub severity_percentage: f32,
    pub treatment_recommendation: Option<String>,
}

impl DiagnosisRecord {
    pub fn healthy(user_id: Uuid, confidence: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            timestamp: Utc::now(),
            disease_detected: false,
            disease_type: None,
            confidence,
            severity_level: SeverityLevel::None,
            severity_percentage: 0.0,
            treatment_recommendation: None,
        }
    }

    pub fn diseased(
        user_id: Uuid,
        disease: DiseaseClass,
        confidence: f32,
        severity: SeverityAssessment,
        treatment: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            timestamp: Utc::now(),
            disease_detected: true,
            disease_type: Some(disease),
            confidence,
            severity_level: severity.severity_level,
            severity_percentage: severity.percentage(),
            treatment_recommendation: treatment,
        }
    }
}

/// Aggregate counters, recomputed from the record set on every read so they
/// can never drift from it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub total_detections: u64,
    pub healthy_detections: u64,
    pub diseased_detections: u64,
    pub detection_rate: f64,
}

impl UserStats {
    pub fn from_counts(total: u64, diseased: u64) -> Self {
        let rate = if total == 0 {
            0.0
        } else {
            diseased as f64 / total as f64 * 100.0
        };
        Self {
            total_detections: total,
            healthy_detections: total - diseased,
            diseased_detections: diseased,
            detection_rate: rate,
        }
    }
}

/// One window of a user's history, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub history: Vec<DiagnosisRecord>,
    pub total: u64,
    pub pages: u64,
    pub current_page: u32,
    pub per_page: u32,
}

/// Wire shape of a single diagnosis, as served by `/api/detect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResponse {
    pub id: Uuid,
    pub disease_detected: bool,
    pub confidence: f32,
    pub disease_type: Option<DiseaseClass>,
    pub severity_level: Option<SeverityLevel>,
    pub severity_percentage: f32,
    pub treatment_recommendation: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// False when the diagnosis could not be persisted; the result is still
    /// valid, it just will not appear in history.
    pub persisted: bool,
}

impl DetectionResponse {
    pub fn from_record(record: &DiagnosisRecord, persisted: bool) -> Self {
        Self {
            id: record.id,
            disease_detected: record.disease_detected,
            confidence: record.confidence,
            disease_type: record.disease_type,
            severity_level: record.severity_level.as_reported(),
            severity_percentage: record.severity_percentage,
            treatment_recommendation: record.treatment_recommendation.clone(),
            timestamp: record.timestamp,
            persisted,
        }
    }
}
