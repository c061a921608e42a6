use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::OcrEngineError;
use crate::job::{JobId, JobStatusSink};
use crate::ocr::{EngineKind, OcrEngine, Quad, TextBlock};

/// White page with a dark bar, enough for every decoder in the pipeline.
pub(crate) fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let mut page = image::RgbImage::from_pixel(width, height, image::Rgb([255, 255, 255]));
    for x in width / 8..width / 2 {
        for y in height / 3..(height / 3 + 2).min(height) {
            page.put_pixel(x, y, image::Rgb([20, 20, 20]));
        }
    }
    let path = dir.join(name);
    page.save(&path).expect("save png");
    path
}

pub(crate) fn write_text_pdf(dir: &Path, name: &str, pages: usize) -> PathBuf {
    use printpdf::{BuiltinFont, Mm, PdfDocument};

    let (doc, page, layer) = PdfDocument::new("fixture", Mm(100.0), Mm(60.0), "Page 1");
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .expect("builtin font");
    doc.get_page(page)
        .get_layer(layer)
        .use_text("Page 1", 18.0, Mm(10.0), Mm(30.0), &font);
    for idx in 2..=pages {
        let (page, layer) = doc.add_page(Mm(100.0), Mm(60.0), format!("Page {}", idx));
        doc.get_page(page).get_layer(layer).use_text(
            format!("Page {}", idx),
            18.0,
            Mm(10.0),
            Mm(30.0),
            &font,
        );
    }
    let path = dir.join(name);
    let file = std::fs::File::create(&path).expect("create pdf");
    doc.save(&mut std::io::BufWriter::new(file))
        .expect("save pdf");
    path
}

/// Returns the same blocks for every page, or fails on one page number.
pub(crate) struct ScriptedEngine {
    pub blocks: Vec<TextBlock>,
    pub fail_on_page: Option<usize>,
    calls: Mutex<usize>,
}

impl ScriptedEngine {
    pub(crate) fn new(blocks: Vec<TextBlock>) -> Self {
        Self {
            blocks,
            fail_on_page: None,
            calls: Mutex::new(0),
        }
    }

    pub(crate) fn failing_on(page: usize) -> Self {
        Self {
            fail_on_page: Some(page),
            ..Self::new(vec![invoice_block()])
        }
    }

    pub(crate) fn calls(&self) -> usize {
        *self.calls.lock().expect("calls")
    }
}

impl OcrEngine for ScriptedEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Tesseract
    }

    fn recognize(&self, _raster: &Path) -> Result<Vec<TextBlock>, OcrEngineError> {
        let page = {
            let mut calls = self.calls.lock().expect("calls");
            *calls += 1;
            *calls
        };
        if self.fail_on_page == Some(page) {
            return Err(OcrEngineError::Backend("recognizer crashed".to_string()));
        }
        Ok(self.blocks.clone())
    }
}

pub(crate) fn invoice_block() -> TextBlock {
    TextBlock {
        bbox: Quad::from_rect(10.0, 10.0, 100.0, 20.0),
        text: "Invoice".to_string(),
        confidence: 0.92,
    }
}

/// Keeps every transition in call order.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub events: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().expect("events").clone()
    }
}

impl JobStatusSink for RecordingSink {
    fn mark_processing(&self, job_id: &JobId) {
        self.events
            .lock()
            .expect("events")
            .push(format!("processing {}", job_id));
    }

    fn mark_completed(&self, job_id: &JobId, _elapsed: Duration) {
        self.events
            .lock()
            .expect("events")
            .push(format!("completed {}", job_id));
    }

    fn mark_failed(&self, job_id: &JobId, _elapsed: Duration, error_message: &str) {
        self.events
            .lock()
            .expect("events")
            .push(format!("failed {}: {}", job_id, error_message));
    }
}
