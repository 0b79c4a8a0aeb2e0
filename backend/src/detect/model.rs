use std::sync::{Arc, Mutex};

use image::RgbImage;
use image::imageops::FilterType;
use serde::Serialize;
use shared::{BoundingBox, DiseaseClass, RawDetection};
use tch::{CModule, Device, Kind, Tensor};

use crate::detect::config::ModelConfig;
use crate::detect::error::DetectError;

/// Candidates below this are dropped during head decoding; the engine's
/// configurable confidence threshold does the real filtering.
const DECODE_FLOOR: f32 = 1e-3;

/// Seam between the pipeline and the inference runtime. Implementations
/// return candidate detections in original-image pixel coordinates, before
/// confidence filtering and non-max suppression. Tests inject scripted fakes.
pub trait DetectionModel: Send + Sync {
    fn forward(&self, image: &RgbImage) -> Result<Vec<RawDetection>, DetectError>;

    fn info(&self) -> ModelInfo;
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub source: String,
    pub device: String,
    pub input_size: u32,
}

/// TorchScript detection model. The module is serialized behind a mutex
/// since libtorch modules are not re-entrant; the tensor math dominates the
/// call anyway.
pub struct TchModel {
    module: Mutex<CModule>,
    device: Device,
    input_size: u32,
    source: String,
}

impl TchModel {
    pub fn load(config: &ModelConfig) -> Result<Self, DetectError> {
        let device = Device::cuda_if_available();
        let module = CModule::load_on_device(&config.path, device)
            .map_err(|e| DetectError::ModelLoad(format!("{}: {}", config.path, e)))?;

        let model = Self {
            module: Mutex::new(module),
            device,
            input_size: config.input_size,
            source: config.path.clone(),
        };
        model.check_output_shape()?;
        log::info!(
            "Loaded detection model from {} on {:?}",
            model.source,
            model.device
        );
        Ok(model)
    }

    /// Dry-run on a zero tensor so an artifact exported with the wrong input
    /// shape fails at load, not on the first user request.
    fn check_output_shape(&self) -> Result<(), DetectError> {
        let s = self.input_size as i64;
        let zeros = Tensor::zeros([1, 3, s, s], (Kind::Float, self.device));
        let output = self
            .module
            .lock()
            .unwrap()
            .forward_ts(&[zeros])
            .map_err(|e| DetectError::ModelLoad(format!("shape probe failed: {e}")))?;
        let size = output.size();
        let rows = match size.as_slice() {
            [1, rows, _] => *rows,
            [rows, _] => *rows,
            other => {
                return Err(DetectError::ModelLoad(format!(
                    "unexpected output shape {other:?}"
                )));
            }
        };
        if rows <= 4 {
            return Err(DetectError::ModelLoad(format!(
                "output has {rows} rows; expected 4 box rows plus class scores"
            )));
        }
        Ok(())
    }

    fn preprocess(&self, image: &RgbImage) -> Tensor {
        let s = self.input_size;
        let resized = image::imageops::resize(image, s, s, FilterType::Triangle);
        let plane = (s * s) as usize;
        let mut chw = vec![0f32; 3 * plane];
        for (x, y, pixel) in resized.enumerate_pixels() {
            let idx = y as usize * s as usize + x as usize;
            chw[idx] = pixel[0] as f32 / 255.0;
            chw[plane + idx] = pixel[1] as f32 / 255.0;
            chw[2 * plane + idx] = pixel[2] as f32 / 255.0;
        }
        Tensor::from_slice(&chw)
            .view([1, 3, s as i64, s as i64])
            .to_device(self.device)
    }

    /// Decodes a YOLO head laid out as [4 box rows + one row per class] x
    /// [anchors], cx/cy/w/h in model-input pixels, into detections scaled
    /// back to the original image.
    fn decode(&self, output: &Tensor, orig_w: u32, orig_h: u32) -> Result<Vec<RawDetection>, DetectError> {
        let output = if output.size().len() == 3 {
            output.squeeze_dim(0)
        } else {
            output.shallow_clone()
        };
        let size = output.size();
        let (rows, anchors) = match size.as_slice() {
            [rows, anchors] => (*rows as usize, *anchors as usize),
            other => {
                return Err(DetectError::Inference(format!(
                    "unexpected output shape {other:?}"
                )));
            }
        };
        if rows <= 4 {
            return Err(DetectError::Inference(format!(
                "output has {rows} rows; expected box rows plus class scores"
            )));
        }
        let classes = rows - 4;

        let flat = output.to_kind(Kind::Float).contiguous().view([-1]);
        let n = flat.size()[0] as usize;
        let mut buf = vec![0f32; n];
        flat.copy_data(&mut buf, n);

        let scale_x = orig_w as f32 / self.input_size as f32;
        let scale_y = orig_h as f32 / self.input_size as f32;

        let mut detections = Vec::new();
        for i in 0..anchors {
            let mut best_class = 0usize;
            let mut best_conf = 0f32;
            for c in 0..classes {
                let conf = buf[(4 + c) * anchors + i];
                if conf > best_conf {
                    best_conf = conf;
                    best_class = c;
                }
            }
            if best_conf < DECODE_FLOOR {
                continue;
            }
            let Some(class) = DiseaseClass::from_class_id(best_class) else {
                continue;
            };

            let cx = buf[i] * scale_x;
            let cy = buf[anchors + i] * scale_y;
            let w = buf[2 * anchors + i] * scale_x;
            let h = buf[3 * anchors + i] * scale_y;
            let bbox = BoundingBox::new(
                (cx - w / 2.0).clamp(0.0, orig_w as f32),
                (cy - h / 2.0).clamp(0.0, orig_h as f32),
                (cx + w / 2.0).clamp(0.0, orig_w as f32),
                (cy + h / 2.0).clamp(0.0, orig_h as f32),
            );
            if bbox.area() <= 0.0 {
                continue;
            }
            detections.push(RawDetection {
                class,
                confidence: best_conf,
                bbox,
            });
        }
        Ok(detections)
    }
}

impl DetectionModel for TchModel {
    fn forward(&self, image: &RgbImage) -> Result<Vec<RawDetection>, DetectError> {
        let input = self.preprocess(image);
        let output = self.module.lock().unwrap().forward_ts(&[input])?;
        self.decode(&output, image.width(), image.height())
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            source: self.source.clone(),
            device: format!("{:?}", self.device),
            input_size: self.input_size,
        }
    }
}

/// Owns the process-wide model instance. The first `get` loads the artifact
/// under the lock, so concurrent first callers trigger exactly one load and
/// all receive the same handle; afterwards `get` is a cheap Arc clone. The
/// handle's lifetime is the provider's: dropping the provider at shutdown
/// releases the model.
pub struct ModelProvider {
    config: ModelConfig,
    model: Mutex<Option<Arc<dyn DetectionModel>>>,
}

impl ModelProvider {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            model: Mutex::new(None),
        }
    }

    /// Provider pre-seeded with an existing handle; nothing is loaded from
    /// disk. This is the injection point for fakes in tests.
    pub fn with_model(model: Arc<dyn DetectionModel>) -> Self {
        Self {
            config: ModelConfig::default(),
            model: Mutex::new(Some(model)),
        }
    }

    pub fn get(&self) -> Result<Arc<dyn DetectionModel>, DetectError> {
        let mut guard = self.model.lock().unwrap();
        if let Some(model) = guard.as_ref() {
            return Ok(model.clone());
        }
        let model: Arc<dyn DetectionModel> = Arc::new(TchModel::load(&self.config)?);
        *guard = Some(model.clone());
        Ok(model)
    }

    /// The handle if one has been loaded; never triggers a load.
    pub fn current(&self) -> Option<Arc<dyn DetectionModel>> {
        self.model.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingModel {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl DetectionModel for CountingModel {
        fn forward(&self, _image: &RgbImage) -> Result<Vec<RawDetection>, DetectError> {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(Vec::new())
        }

        fn info(&self) -> ModelInfo {
            ModelInfo {
                source: "scripted".into(),
                device: "cpu".into(),
                input_size: 640,
            }
        }
    }

    #[test]
    fn seeded_provider_reuses_the_same_handle() {
        let model = Arc::new(CountingModel {
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let provider = ModelProvider::with_model(model);
        let a = provider.get().unwrap();
        let b = provider.get().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn missing_artifact_is_a_model_load_error() {
        let provider = ModelProvider::new(ModelConfig {
            path: "/nonexistent/model.torchscript".into(),
            input_size: 640,
        });
        let err = provider.get().err().expect("load should fail");
        assert!(matches!(err, DetectError::ModelLoad(_)));
        assert!(provider.current().is_none());
    }
}
