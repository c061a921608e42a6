use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::error::OcrEngineError;

use super::parse::{TsvWord, parse_tsv_words};
use super::preprocess;
use super::{EngineKind, OcrEngine, Quad, TextBlock, normalize_confidence};

const TESSERACT_BIN: &str = "tesseract";
/// Fully automatic page segmentation.
const PAGE_SEG_MODE: u32 = 3;

/// Traditional engine: preprocesses each raster and shells out to `tesseract`.
pub struct TesseractEngine {
    requested_languages: String,
    min_confidence: f32,
    dpi: u32,
    languages: OnceLock<Result<String, String>>,
}

impl TesseractEngine {
    pub fn new(languages: &str, min_confidence: f32, dpi: u32) -> Self {
        Self {
            requested_languages: languages.trim().to_string(),
            min_confidence,
            dpi,
            languages: OnceLock::new(),
        }
    }

    fn languages(&self) -> Result<&str, OcrEngineError> {
        self.languages
            .get_or_init(|| resolve_languages(&self.requested_languages))
            .as_deref()
            .map_err(|message| OcrEngineError::Unavailable(message.clone()))
    }

    fn to_blocks(&self, words: Vec<TsvWord>) -> Vec<TextBlock> {
        words
            .into_iter()
            .filter(|word| word.conf >= self.min_confidence)
            .filter(|word| !word.text.trim().is_empty())
            .map(|word| TextBlock {
                bbox: Quad::from_rect(
                    word.left as f32,
                    word.top as f32,
                    word.width as f32,
                    word.height as f32,
                ),
                confidence: normalize_confidence(word.conf, 100.0),
                text: word.text,
            })
            .collect()
    }
}

impl OcrEngine for TesseractEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Tesseract
    }

    fn recognize(&self, raster: &Path) -> Result<Vec<TextBlock>, OcrEngineError> {
        let languages = self.languages()?;
        let image = image::open(raster).map_err(|source| OcrEngineError::Raster {
            path: raster.to_path_buf(),
            source,
        })?;
        let derived = preprocess::write_derived(preprocess::binarize_for_ocr(&image))?;
        let tsv = run_tesseract_tsv(derived.path(), languages, PAGE_SEG_MODE, self.dpi)?;
        drop(derived);

        let blocks = self.to_blocks(parse_tsv_words(&tsv));
        debug!(
            "tesseract found {} block(s) in {}",
            blocks.len(),
            raster.display()
        );
        Ok(blocks)
    }
}

pub fn list_tesseract_languages() -> Result<Vec<String>, OcrEngineError> {
    let output = Command::new(TESSERACT_BIN)
        .arg("--list-langs")
        .output()
        .map_err(|err| {
            OcrEngineError::Unavailable(format!("failed to run tesseract --list-langs: {err}"))
        })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(OcrEngineError::Backend(format!(
            "tesseract --list-langs failed: {}",
            stderr.trim()
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut langs = Vec::new();
    for (idx, line) in stdout.lines().enumerate() {
        if idx == 0 {
            continue;
        }
        let value = line.trim();
        if !value.is_empty() {
            langs.push(value.to_string());
        }
    }
    Ok(langs)
}

fn resolve_languages(requested: &str) -> Result<String, String> {
    if requested.is_empty() {
        return Err("ocr languages is empty".to_string());
    }
    // Without a language listing, pass the request through and let tesseract decide.
    let available = match list_tesseract_languages() {
        Ok(list) => list,
        Err(_) => return Ok(requested.to_string()),
    };
    select_languages(requested, &available)
}

fn select_languages(requested: &str, available: &[String]) -> Result<String, String> {
    let mut chosen = Vec::new();
    let mut missing = Vec::new();
    for raw in requested.split(['+', ',', ' ']) {
        let lang = raw.trim();
        if lang.is_empty() {
            continue;
        }
        if available.iter().any(|value| value == lang) {
            chosen.push(lang.to_string());
        } else {
            missing.push(lang.to_string());
        }
    }

    if chosen.is_empty() {
        return Err(format!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        ));
    }
    if !missing.is_empty() {
        warn!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        );
    }
    Ok(chosen.join("+"))
}

fn run_tesseract_tsv(
    path: &Path,
    languages: &str,
    psm: u32,
    dpi: u32,
) -> Result<String, OcrEngineError> {
    let output = Command::new(TESSERACT_BIN)
        .arg(path)
        .arg("stdout")
        .arg("-l")
        .arg(languages)
        .arg("--psm")
        .arg(psm.to_string())
        .arg("--dpi")
        .arg(dpi.to_string())
        .arg("tsv")
        .output()
        .map_err(|err| {
            OcrEngineError::Unavailable(format!("failed to run tesseract (is it installed?): {err}"))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(OcrEngineError::Backend(format!(
            "tesseract failed: {}",
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
