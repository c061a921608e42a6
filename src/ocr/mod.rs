#[cfg(feature = "neural")]
mod neural;
mod parse;
mod preprocess;
mod tesseract;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::OcrEngineError;
use crate::settings::Settings;

#[cfg(feature = "neural")]
pub use neural::NeuralEngine;
pub use tesseract::{TesseractEngine, list_tesseract_languages};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Four corners in raster pixel space, clockwise from top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Quad(pub [Point; 4]);

impl Quad {
    pub fn from_rect(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self([
            Point::new(x, y),
            Point::new(x + w, y),
            Point::new(x + w, y + h),
            Point::new(x, y + h),
        ])
    }

    /// Orders a point list into top-left, top-right, bottom-right,
    /// bottom-left. A convex quad keeps its cyclic order and only rotates to
    /// start at the top-left; a crossed one is re-sorted by its extreme
    /// corners. Anything other than four points, or four points that do not
    /// give four distinct corners, collapses to the enclosing rectangle.
    pub fn from_points(points: &[Point]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let Ok(corners) = <[Point; 4]>::try_from(points) else {
            return Some(Self::bounding(points));
        };
        if let Some(clockwise) = convex_winding(&corners) {
            let mut ordered = corners;
            if !clockwise {
                ordered.reverse();
            }
            let start = extreme(&ordered, |p| p.x + p.y);
            ordered.rotate_left(start);
            return Some(Self(ordered));
        }
        let picks = [
            extreme(&corners, |p| p.x + p.y),
            extreme(&corners, |p| p.y - p.x),
            extreme(&corners, |p| -(p.x + p.y)),
            extreme(&corners, |p| p.x - p.y),
        ];
        let distinct = picks
            .iter()
            .enumerate()
            .all(|(idx, pick)| !picks[idx + 1..].contains(pick));
        if !distinct {
            return Some(Self::bounding(points));
        }
        Some(Self(picks.map(|idx| corners[idx])))
    }

    fn bounding(points: &[Point]) -> Self {
        let min_x = points.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
        let min_y = points.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
        let max_x = points.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max);
        let max_y = points.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);
        Self::from_rect(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    pub fn top_left(&self) -> Point {
        self.0[0]
    }

    pub fn bottom_right(&self) -> Point {
        self.0[2]
    }

    pub fn height(&self) -> f32 {
        self.bottom_right().y - self.top_left().y
    }
}

/// Index of the point with the smallest score; ties keep the earlier point.
fn extreme(points: &[Point], score: impl Fn(&Point) -> f32) -> usize {
    let mut best = 0;
    for (idx, point) in points.iter().enumerate().skip(1) {
        if score(point) < score(&points[best]) {
            best = idx;
        }
    }
    best
}

/// `Some(true)` when the corners turn clockwise on screen (y down) at every
/// vertex, `Some(false)` when they all turn the other way, `None` for crossed
/// or degenerate quads.
fn convex_winding(corners: &[Point; 4]) -> Option<bool> {
    let turns: Vec<f32> = (0..4)
        .map(|idx| {
            let (a, b, c) = (corners[idx], corners[(idx + 1) % 4], corners[(idx + 2) % 4]);
            (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x)
        })
        .collect();
    if turns.iter().all(|turn| *turn > 0.0) {
        Some(true)
    } else if turns.iter().all(|turn| *turn < 0.0) {
        Some(false)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextBlock {
    pub bbox: Quad,
    pub text: String,
    /// Always in `[0, 1]`.
    pub confidence: f32,
}

impl TextBlock {
    pub fn is_renderable(&self) -> bool {
        !self.text.trim().is_empty() && self.bbox.height() > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Tesseract,
    Neural,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Tesseract => f.write_str("tesseract"),
            EngineKind::Neural => f.write_str("neural"),
        }
    }
}

/// A recognition backend. Implementations return blocks in detection order
/// with empty text removed and confidence scaled into `[0, 1]`.
pub trait OcrEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    fn recognize(&self, raster: &Path) -> Result<Vec<TextBlock>, OcrEngineError>;
}

pub fn build_engine(settings: &Settings) -> Result<Arc<dyn OcrEngine>, OcrEngineError> {
    match settings.engine {
        EngineKind::Tesseract => Ok(Arc::new(TesseractEngine::new(
            &settings.languages,
            settings.min_confidence,
            settings.dpi,
        ))),
        #[cfg(feature = "neural")]
        EngineKind::Neural => Ok(Arc::new(NeuralEngine::from_settings(&settings.neural)?)),
        #[cfg(not(feature = "neural"))]
        EngineKind::Neural => Err(OcrEngineError::Unavailable(
            "this build does not include the `neural` feature".to_string(),
        )),
    }
}

pub(crate) fn normalize_confidence(native: f32, scale: f32) -> f32 {
    if !native.is_finite() || scale <= 0.0 {
        return 0.0;
    }
    (native / scale).clamp(0.0, 1.0)
}

/// Drops blocks the compositor cannot place: blank text or a box without height.
pub fn renderable_blocks(blocks: Vec<TextBlock>) -> Vec<TextBlock> {
    blocks
        .into_iter()
        .filter(TextBlock::is_renderable)
        .map(|mut block| {
            block.confidence = block.confidence.clamp(0.0, 1.0);
            block
        })
        .collect()
}
