use oar_ocr::pipeline::{OAROCR, OAROCRBuilder};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::OcrEngineError;
use crate::settings::NeuralSettings;

use super::{EngineKind, OcrEngine, Point, Quad, TextBlock, normalize_confidence};

/// ONNX detection + recognition reader. The model is loaded on the first
/// `recognize` call and shared by every job after that; `predict` needs
/// exclusive access so calls are serialized on the mutex.
pub struct NeuralEngine {
    detection_model: PathBuf,
    recognition_model: PathBuf,
    char_dict: PathBuf,
    reader: Mutex<Option<OAROCR>>,
}

impl NeuralEngine {
    pub fn from_settings(settings: &NeuralSettings) -> Result<Self, OcrEngineError> {
        let require = |value: &Option<PathBuf>, key: &str| {
            value.clone().ok_or_else(|| {
                OcrEngineError::Unavailable(format!("[neural] {key} is not configured"))
            })
        };
        Ok(Self {
            detection_model: require(&settings.detection_model, "detection_model")?,
            recognition_model: require(&settings.recognition_model, "recognition_model")?,
            char_dict: require(&settings.char_dict, "char_dict")?,
            reader: Mutex::new(None),
        })
    }

    fn load_reader(&self) -> Result<OAROCR, OcrEngineError> {
        for path in [&self.detection_model, &self.recognition_model, &self.char_dict] {
            if !path.exists() {
                return Err(OcrEngineError::Unavailable(format!(
                    "model file not found: {}",
                    path.display()
                )));
            }
        }
        info!("loading neural OCR models");
        OAROCRBuilder::new(
            self.detection_model.to_string_lossy().to_string(),
            self.recognition_model.to_string_lossy().to_string(),
            self.char_dict.to_string_lossy().to_string(),
        )
        .build()
        .map_err(|err| OcrEngineError::Unavailable(format!("failed to load models: {err}")))
    }
}

impl OcrEngine for NeuralEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Neural
    }

    fn recognize(&self, raster: &Path) -> Result<Vec<TextBlock>, OcrEngineError> {
        let mut guard = self
            .reader
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_none() {
            *guard = Some(self.load_reader()?);
        }
        let Some(reader) = guard.as_mut() else {
            return Err(OcrEngineError::Unavailable("reader not initialised".to_string()));
        };
        let result = reader
            .predict(raster)
            .map_err(|err| OcrEngineError::Backend(format!("neural reader failed: {err}")))?;
        drop(guard);

        if result.text_boxes.len() != result.rec_texts.len() {
            warn!(
                "neural reader returned {} boxes but {} texts for {}",
                result.text_boxes.len(),
                result.rec_texts.len(),
                raster.display()
            );
        }
        let mut blocks = Vec::with_capacity(result.rec_texts.len());
        for ((bbox, text), score) in result
            .text_boxes
            .iter()
            .zip(result.rec_texts.iter())
            .zip(result.rec_scores.iter())
        {
            if text.trim().is_empty() {
                continue;
            }
            let points = bbox
                .points
                .iter()
                .map(|point| Point::new(point.x, point.y))
                .collect::<Vec<_>>();
            let Some(quad) = Quad::from_points(&points) else {
                continue;
            };
            blocks.push(TextBlock {
                bbox: quad,
                text: text.to_string(),
                confidence: normalize_confidence(*score, 1.0),
            });
        }
        debug!(
            "neural reader found {} block(s) in {}",
            blocks.len(),
            raster.display()
        );
        Ok(blocks)
    }
}
