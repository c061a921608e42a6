use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RasterizationError {
    #[error("input not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to decode image {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("pdf rendering failed: {0}")]
    Render(String),
    #[error("pdf rendering requires mutool or pdftoppm (install mupdf or poppler)")]
    NoRenderer,
    #[error("no pages found in {}", .0.display())]
    NoPages(PathBuf),
    #[error("raster io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum OcrEngineError {
    #[error("failed to read raster {}: {source}", path.display())]
    Raster {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("preprocessing failed: {0}")]
    Preprocess(String),
    #[error("{0}")]
    Backend(String),
    #[error("ocr engine unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CompositionError {
    #[error("no pages to compose")]
    Empty,
    #[error("failed to load page raster {}: {message}", path.display())]
    Raster { path: PathBuf, message: String },
    #[error("pdf build failed: {0}")]
    Build(String),
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-block failure inside the compositor. Always recovered by skipping the block.
#[derive(Debug, thiserror::Error)]
pub enum BlockRenderError {
    #[error("character {0:?} cannot be encoded with the standard font")]
    Unencodable(char),
    #[error("block lies outside the page ({x}, {y})")]
    OutOfPage { x: f32, y: f32 },
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("rasterization failed: {0}")]
    Rasterization(#[from] RasterizationError),
    #[error("OCR failed on page {page}: {source}")]
    Ocr {
        page: usize,
        #[source]
        source: OcrEngineError,
    },
    #[error("composition failed: {0}")]
    Composition(#[from] CompositionError),
}
