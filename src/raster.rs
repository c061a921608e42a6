use image::imageops::FilterType;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::error::RasterizationError;
use crate::job::JobId;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Pdf,
    Png,
    Jpeg,
}

/// Turns an input document into page rasters inside a per-job scratch directory.
#[derive(Debug, Clone)]
pub struct Rasterizer {
    dpi: u32,
    max_dimension: Option<u32>,
    work_dir: PathBuf,
}

impl Rasterizer {
    pub fn new(dpi: u32, max_dimension: Option<u32>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            dpi: dpi.max(1),
            max_dimension,
            work_dir: work_dir.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.dpi, settings.max_dimension, settings.work_dir.clone())
    }

    /// Scratch directory private to one job.
    pub fn job_dir(&self, job_id: &JobId) -> PathBuf {
        self.work_dir.join(format!("searchable-pdf-{}", job_id))
    }

    /// Page rasters in page order. A single image that needs no resizing is
    /// returned as the input path itself.
    pub fn rasterize(
        &self,
        job_id: &JobId,
        input: &Path,
    ) -> Result<Vec<PathBuf>, RasterizationError> {
        let format = detect_format(input)?;
        match format {
            InputFormat::Pdf => {
                let dir = self.prepare_job_dir(job_id)?;
                let pages = render_pdf_pages(input, &dir, self.dpi)?;
                if pages.is_empty() {
                    return Err(RasterizationError::NoPages(input.to_path_buf()));
                }
                info!("rendered {} page(s) at {} dpi", pages.len(), self.dpi);
                Ok(pages)
            }
            InputFormat::Png | InputFormat::Jpeg => {
                let image = image::open(input).map_err(|source| RasterizationError::Decode {
                    path: input.to_path_buf(),
                    source,
                })?;
                let (width, height) = (image.width(), image.height());
                match self.max_dimension {
                    Some(limit) if width.max(height) > limit => {
                        let resized = image.resize(limit, limit, FilterType::Lanczos3);
                        let dir = self.prepare_job_dir(job_id)?;
                        let path = dir.join("page-001.png");
                        resized
                            .save_with_format(&path, image::ImageFormat::Png)
                            .map_err(|source| RasterizationError::Decode {
                                path: path.clone(),
                                source,
                            })?;
                        debug!(
                            "downscaled {}x{} to {}x{}",
                            width,
                            height,
                            resized.width(),
                            resized.height()
                        );
                        Ok(vec![path])
                    }
                    _ => Ok(vec![input.to_path_buf()]),
                }
            }
        }
    }

    fn prepare_job_dir(&self, job_id: &JobId) -> Result<PathBuf, RasterizationError> {
        let dir = self.job_dir(job_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// Sniffs magic bytes and falls back to the extension.
pub fn detect_format(path: &Path) -> Result<InputFormat, RasterizationError> {
    if !path.is_file() {
        return Err(RasterizationError::NotFound(path.to_path_buf()));
    }
    if let Some(kind) = infer::get_from_path(path)? {
        return match kind.mime_type() {
            "application/pdf" => Ok(InputFormat::Pdf),
            "image/png" => Ok(InputFormat::Png),
            "image/jpeg" => Ok(InputFormat::Jpeg),
            other => Err(RasterizationError::UnsupportedFormat(other.to_string())),
        };
    }
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => Ok(InputFormat::Pdf),
        "png" => Ok(InputFormat::Png),
        "jpg" | "jpeg" => Ok(InputFormat::Jpeg),
        "" => Err(RasterizationError::UnsupportedFormat(
            "unrecognised content without extension".to_string(),
        )),
        other => Err(RasterizationError::UnsupportedFormat(other.to_string())),
    }
}

fn render_pdf_pages(input: &Path, dir: &Path, dpi: u32) -> Result<Vec<PathBuf>, RasterizationError> {
    let dpi = dpi.to_string();
    if command_exists("mutool") {
        let output = Command::new("mutool")
            .arg("draw")
            .arg("-q")
            .arg("-r")
            .arg(&dpi)
            .arg("-o")
            .arg(dir.join("page-%03d.png"))
            .arg(input)
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RasterizationError::Render(format!(
                "mutool draw failed: {}",
                stderr.trim()
            )));
        }
        return read_sorted_pngs(dir);
    }

    if command_exists("pdftoppm") {
        let output = Command::new("pdftoppm")
            .arg("-r")
            .arg(&dpi)
            .arg("-png")
            .arg(input)
            .arg(dir.join("page"))
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RasterizationError::Render(format!(
                "pdftoppm failed: {}",
                stderr.trim()
            )));
        }
        return read_sorted_pngs(dir);
    }

    Err(RasterizationError::NoRenderer)
}

fn read_sorted_pngs(dir: &Path) -> Result<Vec<PathBuf>, RasterizationError> {
    let mut entries = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("png"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();
    entries.sort_by_key(|path| {
        path.file_name()
            .and_then(|name| name.to_str())
            .and_then(page_index_from_name)
            .unwrap_or(u32::MAX)
    });
    Ok(entries)
}

pub(crate) fn command_exists(cmd: &str) -> bool {
    match Command::new(cmd).arg("-h").output() {
        Ok(_) => true,
        Err(err) => err.kind() != std::io::ErrorKind::NotFound,
    }
}

fn page_index_from_name(name: &str) -> Option<u32> {
    let mut digits = String::new();
    for ch in name.chars().rev() {
        if ch.is_ascii_digit() {
            digits.push(ch);
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.is_empty() {
        return None;
    }
    let value: String = digits.chars().rev().collect();
    value.parse::<u32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{write_png, write_text_pdf};
    use tempfile::tempdir;

    #[test]
    fn small_image_passes_through() {
        let dir = tempdir().expect("tempdir");
        let input = write_png(dir.path(), "scan.png", 120, 80);
        let rasterizer = Rasterizer::new(300, Some(4000), dir.path().join("work"));
        let job = JobId::from("pass-through");

        let pages = rasterizer.rasterize(&job, &input).expect("rasterize");
        assert_eq!(pages, vec![input]);
        assert!(!rasterizer.job_dir(&job).exists());
    }

    #[test]
    fn oversized_image_is_downscaled_keeping_aspect() {
        let dir = tempdir().expect("tempdir");
        let input = write_png(dir.path(), "big.png", 400, 100);
        let rasterizer = Rasterizer::new(300, Some(200), dir.path());
        let job = JobId::from("resize");

        let pages = rasterizer.rasterize(&job, &input).expect("rasterize");
        assert_eq!(pages.len(), 1);
        assert!(pages[0].starts_with(rasterizer.job_dir(&job)));
        let resized = image::open(&pages[0]).expect("open");
        assert_eq!((resized.width(), resized.height()), (200, 50));
        assert!(input.exists());
    }

    #[test]
    fn unsupported_and_missing_inputs_are_rejected() {
        let dir = tempdir().expect("tempdir");
        let text = dir.path().join("notes.txt");
        fs::write(&text, "plain text").expect("write");
        let gif = dir.path().join("anim.png");
        fs::write(&gif, b"GIF89a\x01\x00\x01\x00\x00\x00\x00;").expect("write");

        assert!(matches!(
            detect_format(&text),
            Err(RasterizationError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            detect_format(&gif),
            Err(RasterizationError::UnsupportedFormat(mime)) if mime == "image/gif"
        ));
        assert!(matches!(
            detect_format(&dir.path().join("absent.pdf")),
            Err(RasterizationError::NotFound(_))
        ));
    }

    #[test]
    fn corrupt_image_is_a_rasterization_error() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("broken.png");
        fs::write(&input, b"\x89PNG\r\n\x1a\nnot really").expect("write");
        let rasterizer = Rasterizer::new(300, None, dir.path());
        let err = rasterizer
            .rasterize(&JobId::from("corrupt"), &input)
            .expect_err("corrupt input");
        assert!(matches!(err, RasterizationError::Decode { .. }));
    }

    #[test]
    fn page_files_sort_numerically() {
        assert_eq!(page_index_from_name("page-010.png"), Some(10));
        assert_eq!(page_index_from_name("page-2.png"), Some(2));
        assert_eq!(page_index_from_name("cover.png"), None);
    }

    #[test]
    fn pdf_pages_render_in_order() {
        if !command_exists("mutool") && !command_exists("pdftoppm") {
            return;
        }
        let dir = tempdir().expect("tempdir");
        let input = write_text_pdf(dir.path(), "three.pdf", 3);
        let rasterizer = Rasterizer::new(72, None, dir.path().join("work"));
        let job = JobId::from("pdf");

        let pages = rasterizer.rasterize(&job, &input).expect("rasterize");
        assert_eq!(pages.len(), 3);
        for page in &pages {
            assert!(page.starts_with(rasterizer.job_dir(&job)));
        }
    }
}
