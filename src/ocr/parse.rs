/// One word row from tesseract's TSV output, still on the native 0-100 scale.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct TsvWord {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
    pub conf: f32,
    pub text: String,
}

/// Word-level (level 5) rows in the order tesseract emitted them.
pub(super) fn parse_tsv_words(tsv: &str) -> Vec<TsvWord> {
    let mut words = Vec::new();
    for (idx, row) in tsv.lines().enumerate() {
        if idx == 0 {
            continue;
        }
        let cols = row.split('\t').collect::<Vec<_>>();
        if cols.len() < 12 {
            continue;
        }
        let level: i32 = cols[0].parse().unwrap_or(0);
        if level != 5 {
            continue;
        }
        let left: u32 = cols[6].parse().unwrap_or(0);
        let top: u32 = cols[7].parse().unwrap_or(0);
        let width: u32 = cols[8].parse().unwrap_or(0);
        let height: u32 = cols[9].parse().unwrap_or(0);
        let conf: f32 = cols[10].trim().parse().unwrap_or(-1.0);
        let text = cols[11..].join("\t");
        let text = text.trim();
        if text.is_empty() || conf < 0.0 {
            continue;
        }
        words.push(TsvWord {
            left,
            top,
            width,
            height,
            conf,
            text: text.to_string(),
        });
    }
    words
}
