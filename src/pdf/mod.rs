mod text_layer;

use printpdf::image_crate::{DynamicImage, RgbImage};
use printpdf::{
    BuiltinFont, Image, ImageTransform, IndirectFontRef, Mm, PdfDocument, PdfLayerReference, Pt,
    TextRenderingMode,
};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{BlockRenderError, CompositionError};
use crate::ocr::TextBlock;

pub use text_layer::{
    MAX_FONT_SIZE, MIN_FONT_SIZE, TextRun, font_size_for, is_win_ansi, layout_block,
};

const DOCUMENT_TITLE: &str = "searchable document";

/// One output page: its background raster and the blocks recognised on it.
#[derive(Debug, Clone)]
pub struct PageContent {
    pub raster: PathBuf,
    pub blocks: Vec<TextBlock>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComposeStats {
    pub pages: usize,
    pub text_runs: usize,
    pub skipped_blocks: usize,
    /// Subset of `skipped_blocks` with text the builtin font cannot encode.
    pub unencodable_blocks: usize,
}

/// Builds the searchable PDF and writes it to `output` in one step.
/// Nothing is left at `output` when this fails.
pub fn compose(pages: &[PageContent], output: &Path) -> Result<ComposeStats, CompositionError> {
    let (bytes, stats) = build_document(pages)?;
    let bytes = finalize(bytes)?;
    write_atomically(output, &bytes)?;
    debug!(
        "wrote {} page(s), {} text run(s), {} skipped block(s) to {}",
        stats.pages,
        stats.text_runs,
        stats.skipped_blocks,
        output.display()
    );
    Ok(stats)
}

fn build_document(pages: &[PageContent]) -> Result<(Vec<u8>, ComposeStats), CompositionError> {
    let first = pages.first().ok_or(CompositionError::Empty)?;
    let mut background = load_background(&first.raster)?;
    let (doc, page_idx, layer_idx) = PdfDocument::new(
        DOCUMENT_TITLE,
        Mm::from(Pt(background.width() as f32)),
        Mm::from(Pt(background.height() as f32)),
        "Page 1",
    );
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|err| CompositionError::Build(err.to_string()))?;
    let mut layer = doc.get_page(page_idx).get_layer(layer_idx);
    let mut stats = ComposeStats::default();

    for (idx, page) in pages.iter().enumerate() {
        if idx > 0 {
            background = load_background(&page.raster)?;
            let (page_idx, layer_idx) = doc.add_page(
                Mm::from(Pt(background.width() as f32)),
                Mm::from(Pt(background.height() as f32)),
                format!("Page {}", idx + 1),
            );
            layer = doc.get_page(page_idx).get_layer(layer_idx);
        }
        let (width, height) = (background.width() as f32, background.height() as f32);

        Image::from_dynamic_image(&DynamicImage::ImageRgb8(background.clone())).add_to_layer(
            layer.clone(),
            ImageTransform {
                translate_x: Some(Mm(0.0)),
                translate_y: Some(Mm(0.0)),
                rotate: None,
                scale_x: Some(1.0),
                scale_y: Some(1.0),
                dpi: Some(72.0),
            },
        );

        let mut unencodable = 0;
        for block in &page.blocks {
            match layout_block(block, width, height) {
                Ok(Some(run)) => {
                    write_invisible_run(&layer, &font, &run);
                    stats.text_runs += 1;
                }
                Ok(None) => stats.skipped_blocks += 1,
                Err(err) => {
                    if matches!(err, BlockRenderError::Unencodable(_)) {
                        unencodable += 1;
                    }
                    warn!("page {}: skipping block {:?}: {}", idx + 1, block.text, err);
                    stats.skipped_blocks += 1;
                }
            }
        }
        if unencodable > 0 {
            debug!(
                "page {}: {} of {} block(s) dropped for characters outside WinAnsi",
                idx + 1,
                unencodable,
                page.blocks.len()
            );
        }
        stats.unencodable_blocks += unencodable;
        stats.pages += 1;
    }

    let mut buffer = Vec::new();
    {
        let mut writer = BufWriter::new(&mut buffer);
        doc.save(&mut writer)
            .map_err(|err| CompositionError::Build(err.to_string()))?;
    }
    Ok((buffer, stats))
}

fn load_background(path: &Path) -> Result<RgbImage, CompositionError> {
    printpdf::image_crate::open(path)
        .map(|image| image.to_rgb8())
        .map_err(|err| CompositionError::Raster {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}

fn write_invisible_run(layer: &PdfLayerReference, font: &IndirectFontRef, run: &TextRun) {
    layer.begin_text_section();
    layer.set_font(font, run.font_size);
    layer.set_text_rendering_mode(TextRenderingMode::Invisible);
    layer.set_text_cursor(Mm::from(Pt(run.x)), Mm::from(Pt(run.baseline)));
    layer.write_text(run.text.clone(), font);
    layer.end_text_section();
}

/// Drops unreachable objects and flate-compresses every stream.
fn finalize(bytes: Vec<u8>) -> Result<Vec<u8>, CompositionError> {
    let mut document = lopdf::Document::load_mem(&bytes)
        .map_err(|err| CompositionError::Build(format!("reload failed: {err}")))?;
    document.prune_objects();
    document.delete_zero_length_streams();
    document.renumber_objects();
    document.compress();
    let mut out = Vec::with_capacity(bytes.len());
    document
        .save_to(&mut out)
        .map_err(|err| CompositionError::Build(format!("serialize failed: {err}")))?;
    Ok(out)
}

fn write_atomically(output: &Path, bytes: &[u8]) -> Result<(), CompositionError> {
    let write_error = |source: std::io::Error| CompositionError::Write {
        path: output.to_path_buf(),
        source,
    };
    let parent = output
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".searchable-pdf-")
        .suffix(".pdf.part")
        .tempfile_in(parent)
        .map_err(write_error)?;
    tmp.write_all(bytes).map_err(write_error)?;
    tmp.flush().map_err(write_error)?;
    tmp.persist(output)
        .map_err(|err| write_error(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::Quad;
    use crate::test_util::{invoice_block, write_png};
    use lopdf::content::Content;
    use tempfile::tempdir;

    fn operators(doc: &lopdf::Document, page_id: lopdf::ObjectId) -> Vec<lopdf::content::Operation> {
        let data = doc.get_page_content(page_id).expect("content");
        Content::decode(&data).expect("decode").operations
    }

    #[test]
    fn unencodable_block_is_skipped_not_fatal() {
        let dir = tempdir().expect("tempdir");
        let raster = write_png(dir.path(), "page.png", 300, 200);
        let output = dir.path().join("out.pdf");
        let pages = vec![PageContent {
            raster,
            blocks: vec![
                TextBlock {
                    bbox: Quad::from_rect(10.0, 50.0, 80.0, 20.0),
                    text: "領収書".to_string(),
                    confidence: 0.8,
                },
                invoice_block(),
            ],
        }];

        let stats = compose(&pages, &output).expect("compose");
        assert_eq!(
            stats,
            ComposeStats {
                pages: 1,
                text_runs: 1,
                skipped_blocks: 1,
                unencodable_blocks: 1,
            }
        );

        let doc = lopdf::Document::load(&output).expect("load");
        let page_id = *doc.get_pages().get(&1).expect("page 1");
        let shown = operators(&doc, page_id)
            .into_iter()
            .filter(|op| op.operator == "Tj")
            .count();
        assert_eq!(shown, 1);
    }

    fn block(text: &str) -> TextBlock {
        TextBlock {
            bbox: Quad::from_rect(10.0, 10.0, 80.0, 20.0),
            text: text.to_string(),
            confidence: 0.9,
        }
    }

    fn media_box(doc: &lopdf::Document, page_id: lopdf::ObjectId) -> Vec<f32> {
        doc.get_dictionary(page_id)
            .and_then(|page| page.get(b"MediaBox"))
            .and_then(lopdf::Object::as_array)
            .expect("media box")
            .iter()
            .map(|value| value.as_float().expect("number"))
            .collect()
    }

    #[test]
    fn pages_keep_their_order_size_and_text() {
        let dir = tempdir().expect("tempdir");
        let sizes = [(300, 200), (120, 400), (500, 90)];
        let labels = ["first page", "second page", "third page"];
        let pages: Vec<PageContent> = sizes
            .iter()
            .zip(labels)
            .enumerate()
            .map(|(idx, (&(width, height), label))| PageContent {
                raster: write_png(dir.path(), &format!("page-{}.png", idx + 1), width, height),
                blocks: vec![block(label)],
            })
            .collect();
        let output = dir.path().join("out.pdf");

        let stats = compose(&pages, &output).expect("compose");
        assert_eq!(stats.pages, 3);
        assert_eq!(stats.text_runs, 3);

        let doc = lopdf::Document::load(&output).expect("load");
        let page_ids = doc.get_pages();
        assert_eq!(page_ids.len(), 3);
        for (number, (&(width, height), label)) in (1u32..).zip(sizes.iter().zip(labels)) {
            let bounds = media_box(&doc, page_ids[&number]);
            assert!((bounds[2] - width as f32).abs() < 0.01, "page {number} width");
            assert!((bounds[3] - height as f32).abs() < 0.01, "page {number} height");
            let text = doc.extract_text(&[number]).expect("text");
            assert_eq!(text.trim(), label);
        }
    }

    #[test]
    fn latin_text_survives_extraction() {
        let dir = tempdir().expect("tempdir");
        let raster = write_png(dir.path(), "page.png", 300, 120);
        for (idx, text) in ["Größe – 5 €", "(a) \\ b"].into_iter().enumerate() {
            let output = dir.path().join(format!("out-{idx}.pdf"));
            compose(
                &[PageContent {
                    raster: raster.clone(),
                    blocks: vec![block(text)],
                }],
                &output,
            )
            .expect("compose");
            let doc = lopdf::Document::load(&output).expect("load");
            assert_eq!(doc.extract_text(&[1]).expect("text").trim(), text);
        }
    }

    #[test]
    fn page_without_blocks_keeps_background() {
        let dir = tempdir().expect("tempdir");
        let raster = write_png(dir.path(), "page.png", 64, 48);
        let output = dir.path().join("out.pdf");
        compose(
            &[PageContent {
                raster,
                blocks: Vec::new(),
            }],
            &output,
        )
        .expect("compose");

        let doc = lopdf::Document::load(&output).expect("load");
        let page_id = *doc.get_pages().get(&1).expect("page 1");
        let ops = operators(&doc, page_id);
        assert!(ops.iter().any(|op| op.operator == "Do"));
        assert!(!ops.iter().any(|op| op.operator == "BT"));
    }

    #[test]
    fn empty_document_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let output = dir.path().join("out.pdf");
        assert!(matches!(
            compose(&[], &output),
            Err(CompositionError::Empty)
        ));
        assert!(!output.exists());
    }

    #[test]
    fn unwritable_destination_leaves_nothing_behind() {
        let dir = tempdir().expect("tempdir");
        let raster = write_png(dir.path(), "page.png", 32, 32);
        let output = dir.path().join("missing").join("out.pdf");
        let err = compose(
            &[PageContent {
                raster,
                blocks: vec![invoice_block()],
            }],
            &output,
        )
        .expect_err("no parent directory");
        assert!(matches!(err, CompositionError::Write { .. }));
        assert!(!output.exists());
    }
}
