use crate::error::IngestError;
use crate::models::{IngestionOptions, PageRecord, Passage};

pub const DEFAULT_CHUNK_SIZE: usize = 900;
pub const DEFAULT_CHUNK_OVERLAP: usize = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            chunk_size: value.chunk_size,
            chunk_overlap: value.chunk_overlap,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::Configuration(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::Configuration(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    fn lookback(&self) -> usize {
        self.chunk_size / 4
    }
}

/// Boundary kinds in order of preference when snapping a window end.
#[derive(Debug, Clone, Copy)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
    Word,
}

impl Boundary {
    const PREFERENCE: [Boundary; 4] = [
        Boundary::Paragraph,
        Boundary::Line,
        Boundary::Sentence,
        Boundary::Word,
    ];

    /// Whether a cut placed before `chars[cut]` lands on this boundary.
    fn matches(self, chars: &[char], cut: usize) -> bool {
        let before = chars[cut - 1];
        match self {
            Boundary::Paragraph => cut >= 2 && before == '\n' && chars[cut - 2] == '\n',
            Boundary::Line => before == '\n',
            Boundary::Sentence => {
                cut >= 2 && before.is_whitespace() && matches!(chars[cut - 2], '.' | '!' | '?')
            }
            Boundary::Word => before.is_whitespace(),
        }
    }
}

pub fn split_text(text: &str, config: ChunkingConfig) -> Result<Vec<String>, IngestError> {
    config.validate()?;
    let chars: Vec<char> = text.chars().collect();

    Ok(window_spans(&chars, config)
        .into_iter()
        .map(|(start, end)| chars[start..end].iter().collect::<String>())
        .filter(|piece| !piece.trim().is_empty())
        .collect())
}

pub fn chunk_pages<I>(pages: I, config: ChunkingConfig) -> Result<Vec<Passage>, IngestError>
where
    I: IntoIterator<Item = PageRecord>,
{
    config.validate()?;

    let mut passages = Vec::new();
    for page in pages {
        for text in split_text(&page.text, config)? {
            passages.push(Passage {
                text,
                source_file: page.source_file.clone(),
                page_number: page.page_number,
            });
        }
    }
    Ok(passages)
}

/// Char-offset `(start, end)` windows over `chars`. Assumes a validated config.
fn window_spans(chars: &[char], config: ChunkingConfig) -> Vec<(usize, usize)> {
    let len = chars.len();
    if len == 0 {
        return Vec::new();
    }
    if len <= config.chunk_size {
        return vec![(0, len)];
    }

    let mut spans = Vec::new();
    let mut start = 0;
    loop {
        let hard_end = start + config.chunk_size;
        if hard_end >= len {
            spans.push((start, len));
            break;
        }

        let end = snap_end(chars, start, hard_end, config);
        spans.push((start, end));
        start = snap_start(chars, end - config.chunk_overlap, end);
    }
    spans
}

fn snap_end(chars: &[char], start: usize, hard_end: usize, config: ChunkingConfig) -> usize {
    // the next window starts at end - overlap, which has to stay ahead of `start`
    let floor = hard_end
        .saturating_sub(config.lookback())
        .max(start + config.chunk_overlap + 1);

    for boundary in Boundary::PREFERENCE {
        if let Some(cut) = (floor..=hard_end)
            .rev()
            .find(|&cut| boundary.matches(chars, cut))
        {
            return cut;
        }
    }
    hard_end
}

/// Moves a window start forward to the next word, then past any whitespace run.
fn snap_start(chars: &[char], nominal: usize, end: usize) -> usize {
    let word_start = if nominal == 0 || chars[nominal - 1].is_whitespace() {
        nominal
    } else {
        (nominal + 1..end)
            .find(|&index| chars[index - 1].is_whitespace())
            .unwrap_or(nominal)
    };
    (word_start..end)
        .find(|&index| !chars[index].is_whitespace())
        .unwrap_or(word_start)
}
