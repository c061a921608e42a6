use crate::error::BlockRenderError;
use crate::ocr::TextBlock;

pub const MIN_FONT_SIZE: f32 = 6.0;
pub const MAX_FONT_SIZE: f32 = 40.0;

/// One invisible text run in page space (points, origin bottom-left).
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub x: f32,
    pub baseline: f32,
    pub font_size: f32,
}

pub fn font_size_for(block: &TextBlock) -> f32 {
    block.bbox.height().clamp(MIN_FONT_SIZE, MAX_FONT_SIZE)
}

/// Maps a block from raster pixels onto a page of the same size in points.
/// `Ok(None)` means there is nothing to draw.
pub fn layout_block(
    block: &TextBlock,
    page_width: f32,
    page_height: f32,
) -> Result<Option<TextRun>, BlockRenderError> {
    if block.text.trim().is_empty() || block.bbox.height() <= 0.0 {
        return Ok(None);
    }
    let top_left = block.bbox.top_left();
    let bottom_right = block.bbox.bottom_right();
    let (x1, y1) = (top_left.x, top_left.y);
    let (x2, y2) = (bottom_right.x, bottom_right.y);
    if x1 >= page_width || y1 >= page_height || x2 <= 0.0 || y2 <= 0.0 {
        return Err(BlockRenderError::OutOfPage { x: x1, y: y1 });
    }
    let font_size = font_size_for(block);
    if font_size <= 0.0 {
        return Ok(None);
    }
    if let Some(ch) = block.text.chars().find(|ch| !is_win_ansi(*ch)) {
        return Err(BlockRenderError::Unencodable(ch));
    }
    Ok(Some(TextRun {
        text: block.text.clone(),
        x: x1,
        baseline: page_height - y2,
        font_size,
    }))
}

/// Characters the standard 14 fonts can show through WinAnsiEncoding.
/// A block with any other character is not drawn at all, so ligatures such
/// as `ﬁ` or a U+2212 minus make the whole word unsearchable.
pub fn is_win_ansi(ch: char) -> bool {
    matches!(ch, ' '..='~' | '\u{a0}'..='\u{ff}')
        || matches!(
            ch,
            '€' | '‚'
                | 'ƒ'
                | '„'
                | '…'
                | '†'
                | '‡'
                | 'ˆ'
                | '‰'
                | 'Š'
                | '‹'
                | 'Œ'
                | 'Ž'
                | '‘'
                | '’'
                | '“'
                | '”'
                | '•'
                | '–'
                | '—'
                | '˜'
                | '™'
                | 'š'
                | '›'
                | 'œ'
                | 'ž'
                | 'Ÿ'
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{Point, Quad};

    fn block(text: &str, bbox: Quad) -> TextBlock {
        TextBlock {
            bbox,
            text: text.to_string(),
            confidence: 0.9,
        }
    }

    #[test]
    fn baseline_sits_at_bottom_left_of_box() {
        let run = layout_block(
            &block("Invoice", Quad::from_rect(10.0, 10.0, 100.0, 20.0)),
            640.0,
            480.0,
        )
        .expect("layout")
        .expect("run");
        assert_eq!(
            run,
            TextRun {
                text: "Invoice".to_string(),
                x: 10.0,
                baseline: 450.0,
                font_size: 20.0,
            }
        );
    }

    #[test]
    fn font_size_is_clamped() {
        let tiny = block("a", Quad::from_rect(0.0, 0.0, 10.0, 2.0));
        let huge = block("A", Quad::from_rect(0.0, 0.0, 10.0, 90.0));
        assert_eq!(font_size_for(&tiny), MIN_FONT_SIZE);
        assert_eq!(font_size_for(&huge), MAX_FONT_SIZE);
    }

    #[test]
    fn blank_or_flat_blocks_produce_nothing() {
        let flat = block("flat", Quad::from_rect(10.0, 10.0, 50.0, 0.0));
        let blank = block(" \t", Quad::from_rect(10.0, 10.0, 50.0, 20.0));
        assert_eq!(layout_block(&flat, 100.0, 100.0).expect("flat"), None);
        assert_eq!(layout_block(&blank, 100.0, 100.0).expect("blank"), None);
    }

    #[test]
    fn unencodable_text_is_reported() {
        let cjk = block("請求書", Quad::from_rect(10.0, 10.0, 50.0, 20.0));
        assert!(matches!(
            layout_block(&cjk, 100.0, 100.0),
            Err(BlockRenderError::Unencodable('請'))
        ));
        let latin = block("Größe – 5 €", Quad::from_rect(10.0, 10.0, 50.0, 20.0));
        assert!(layout_block(&latin, 100.0, 100.0).expect("latin").is_some());
        let ligature = block("ﬁnance", Quad::from_rect(10.0, 10.0, 50.0, 20.0));
        assert!(matches!(
            layout_block(&ligature, 100.0, 100.0),
            Err(BlockRenderError::Unencodable('ﬁ'))
        ));
    }

    #[test]
    fn block_outside_page_is_rejected() {
        let outside = block(
            "far",
            Quad([
                Point::new(500.0, 10.0),
                Point::new(600.0, 10.0),
                Point::new(600.0, 30.0),
                Point::new(500.0, 30.0),
            ]),
        );
        assert!(matches!(
            layout_block(&outside, 100.0, 100.0),
            Err(BlockRenderError::OutOfPage { .. })
        ));
    }
}
