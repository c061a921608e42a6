use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ocr::EngineKind;
use crate::paths;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone)]
pub struct Settings {
    pub engine: EngineKind,
    pub dpi: u32,
    pub max_dimension: Option<u32>,
    pub languages: String,
    pub min_confidence: f32,
    pub neural: NeuralSettings,
    pub workers: usize,
    pub queue_capacity: usize,
    pub work_dir: PathBuf,
    pub allowed_extensions: Vec<String>,
    pub max_input_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct NeuralSettings {
    pub detection_model: Option<PathBuf>,
    pub recognition_model: Option<PathBuf>,
    pub char_dict: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine: EngineKind::Tesseract,
            dpi: 300,
            max_dimension: None,
            languages: "eng".to_string(),
            min_confidence: 30.0,
            neural: NeuralSettings::default(),
            workers: 0,
            queue_capacity: 64,
            work_dir: std::env::temp_dir(),
            allowed_extensions: Vec::new(),
            max_input_bytes: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    ocr: Option<OcrSettings>,
    neural: Option<NeuralFileSettings>,
    pipeline: Option<PipelineSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct OcrSettings {
    engine: Option<EngineKind>,
    dpi: Option<u32>,
    max_dimension: Option<u32>,
    languages: Option<String>,
    min_confidence: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct NeuralFileSettings {
    detection_model: Option<String>,
    recognition_model: Option<String>,
    char_dict: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelineSettings {
    workers: Option<usize>,
    queue_capacity: Option<usize>,
    work_dir: Option<String>,
    allowed_extensions: Option<Vec<String>>,
    max_input_bytes: Option<u64>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    if let Some(dir) = paths::settings_dir() {
        ordered_paths.push(dir.join("settings.toml"));
        ordered_paths.push(dir.join("settings.local.toml"));
    }
    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }
    load_from_paths(&ordered_paths)
}

fn load_from_paths(ordered_paths: &[PathBuf]) -> Result<Settings> {
    let mut settings = Settings::default();
    let defaults: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse built-in settings")?;
    settings.merge(defaults);

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }

    Ok(settings)
}

impl Settings {
    /// Worker count with `0` resolved to the CPU count.
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }

    pub fn is_allowed_extension(&self, path: &Path) -> bool {
        if self.allowed_extensions.is_empty() {
            return true;
        }
        let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
            return false;
        };
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext))
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(ocr) = incoming.ocr {
            if let Some(engine) = ocr.engine {
                self.engine = engine;
            }
            if let Some(dpi) = ocr.dpi {
                if dpi > 0 {
                    self.dpi = dpi;
                }
            }
            if let Some(max_dimension) = ocr.max_dimension {
                self.max_dimension = if max_dimension > 0 {
                    Some(max_dimension)
                } else {
                    None
                };
            }
            if let Some(languages) = ocr.languages {
                if !languages.trim().is_empty() {
                    self.languages = languages;
                }
            }
            if let Some(confidence) = ocr.min_confidence {
                if (0.0..=100.0).contains(&confidence) {
                    self.min_confidence = confidence;
                }
            }
        }
        if let Some(neural) = incoming.neural {
            if let Some(path) = neural.detection_model.as_deref().and_then(paths::expand_path) {
                self.neural.detection_model = Some(path);
            }
            if let Some(path) = neural
                .recognition_model
                .as_deref()
                .and_then(paths::expand_path)
            {
                self.neural.recognition_model = Some(path);
            }
            if let Some(path) = neural.char_dict.as_deref().and_then(paths::expand_path) {
                self.neural.char_dict = Some(path);
            }
        }
        if let Some(pipeline) = incoming.pipeline {
            if let Some(workers) = pipeline.workers {
                self.workers = workers;
            }
            if let Some(capacity) = pipeline.queue_capacity {
                if capacity > 0 {
                    self.queue_capacity = capacity;
                }
            }
            if let Some(dir) = pipeline.work_dir {
                self.work_dir = paths::work_dir(&dir);
            }
            if let Some(extensions) = pipeline.allowed_extensions {
                self.allowed_extensions = extensions
                    .into_iter()
                    .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
                    .filter(|ext| !ext.is_empty())
                    .collect();
            }
            if let Some(limit) = pipeline.max_input_bytes {
                self.max_input_bytes = if limit > 0 { Some(limit) } else { None };
            }
        }
    }
}
