use serde::{Deserialize, Serialize};

/// Engine tunables. Everything here is policy, not contract: deployments may
/// override any of it through `config/detection.yaml` or the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub model: ModelConfig,
    pub thresholds: ThresholdConfig,
    pub severity: SeverityThresholds,
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// TorchScript artifact path. `MODEL_PATH` in the environment wins.
    pub path: String,
    /// Square input edge the model was exported with.
    pub input_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Minimum confidence for a detection to count.
    pub confidence: f32,
    /// IoU above which same-class detections are considered duplicates.
    pub iou: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityThresholds {
    /// Ratios in (0, low_max) bucket as Low.
    pub low_max: f32,
    /// Ratios in [high_min, 1] bucket as High; [low_max, high_min) is Medium.
    pub high_min: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Bounded worker count for batch fan-out.
    pub concurrency: usize,
    /// Per-image execution budget, not a whole-batch budget.
    pub image_timeout_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: "models/best.torchscript".to_string(),
            input_size: 640,
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            confidence: 0.25,
            iou: 0.45,
        }
    }
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            low_max: 0.20,
            high_min: 0.50,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            image_timeout_ms: 30_000,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            thresholds: ThresholdConfig::default(),
            severity: SeverityThresholds::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl DetectionConfig {
    /// Reads `config/detection.yaml` next to the workspace root, then applies
    /// environment overrides. Missing file is not an error; the defaults
    /// above apply.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = match Self::config_path() {
            Some(path) if std::path::Path::new(&path).exists() => {
                let raw = std::fs::read_to_string(&path)?;
                serde_yaml::from_str(&raw)?
            }
            _ => Self::default(),
        };
        if let Ok(path) = std::env::var("MODEL_PATH") {
            config.model.path = path;
        }
        config.validate()?;
        Ok(config)
    }

    fn config_path() -> Option<String> {
        std::env::var("CARGO_MANIFEST_DIR")
            .ok()
            .map(|dir| format!("{}/../config/detection.yaml", dir))
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if !(0.0..=1.0).contains(&self.thresholds.confidence) {
            return Err("confidence threshold must be in [0, 1]".into());
        }
        if !(0.0..=1.0).contains(&self.thresholds.iou) {
            return Err("iou threshold must be in [0, 1]".into());
        }
        if self.severity.low_max <= 0.0
            || self.severity.high_min <= self.severity.low_max
            || self.severity.high_min > 1.0
        {
            return Err("severity thresholds must satisfy 0 < low_max < high_min <= 1".into());
        }
        if self.batch.concurrency == 0 {
            return Err("batch concurrency must be at least 1".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(DetectionConfig::default().validate().is_ok());
    }

    #[test]
    fn inverted_severity_thresholds_rejected() {
        let mut config = DetectionConfig::default();
        config.severity.low_max = 0.6;
        config.severity.high_min = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn yaml_overrides_parse() {
        let config: DetectionConfig =
            serde_yaml::from_str("thresholds:\n  confidence: 0.5\n").unwrap();
        assert_eq!(config.thresholds.confidence, 0.5);
        // untouched sections keep their defaults
        assert_eq!(config.thresholds.iou, 0.45);
        assert_eq!(config.severity.high_min, 0.50);
    }
}
