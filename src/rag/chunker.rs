//! Character-window text chunking with page provenance.
//!
//! Windows are measured in Unicode scalar values (`char`s), not bytes, so
//! `char_start`/`char_end` index the same positions a reader counts.

use serde::{Deserialize, Serialize};

/// Default window size used by the knowledge indexer.
pub const DEFAULT_CHUNK_SIZE: usize = 512;
/// Default overlap between consecutive windows.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;
/// Trailing windows that would add fewer new characters than this are folded
/// into a final window anchored at the end of the text.
pub const DEFAULT_MIN_FRAGMENT: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkerError {
    #[error("Invalid chunker configuration: {0}")]
    InvalidConfiguration(String),
}

/// A bounded, overlapping slice of a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChunk {
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
    pub page: Option<u32>,
}

impl DocumentChunk {
    pub fn len_chars(&self) -> usize {
        self.char_end - self.char_start
    }
}

/// Validated chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    chunk_size: usize,
    overlap: usize,
    min_fragment: usize,
}

impl ChunkerConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ChunkerError> {
        Self::with_min_fragment(chunk_size, overlap, DEFAULT_MIN_FRAGMENT.min(chunk_size))
    }

    pub fn with_min_fragment(
        chunk_size: usize,
        overlap: usize,
        min_fragment: usize,
    ) -> Result<Self, ChunkerError> {
        if chunk_size == 0 {
            return Err(ChunkerError::InvalidConfiguration(
                "chunk_size must be greater than zero".into(),
            ));
        }
        if overlap >= chunk_size {
            return Err(ChunkerError::InvalidConfiguration(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        if min_fragment > chunk_size {
            return Err(ChunkerError::InvalidConfiguration(format!(
                "min_fragment ({}) must not exceed chunk_size ({})",
                min_fragment, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
            min_fragment,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn min_fragment(&self) -> usize {
        self.min_fragment
    }

    fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
            min_fragment: DEFAULT_MIN_FRAGMENT,
        }
    }
}

/// Page boundaries of a source document, as character offsets.
///
/// `starts[i]` is the offset at which page `first_page + i` begins. Offsets
/// must be ascending and the first must be zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMap {
    starts: Vec<usize>,
    first_page: u32,
}

impl PageMap {
    pub fn new(starts: Vec<usize>) -> Result<Self, ChunkerError> {
        Self::starting_at(starts, 1)
    }

    pub fn starting_at(starts: Vec<usize>, first_page: u32) -> Result<Self, ChunkerError> {
        if starts.first() != Some(&0) {
            return Err(ChunkerError::InvalidConfiguration(
                "page offsets must start at 0".into(),
            ));
        }
        if starts.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ChunkerError::InvalidConfiguration(
                "page offsets must be strictly ascending".into(),
            ));
        }
        Ok(Self { starts, first_page })
    }

    /// Page containing the character at `offset`.
    pub fn page_at(&self, offset: usize) -> u32 {
        let idx = self.starts.partition_point(|&start| start <= offset);
        self.first_page + (idx.saturating_sub(1)) as u32
    }

    /// Median page of the characters in `[start, end)`.
    ///
    /// Pages grow monotonically with the offset, so the median page is the
    /// page of the median character (lower median for even lengths).
    pub fn median_page(&self, start: usize, end: usize) -> u32 {
        let len = end.saturating_sub(start);
        self.page_at(start + len.saturating_sub(1) / 2)
    }
}

pub struct TextChunker {
    config: ChunkerConfig,
}

impl TextChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Build a chunker from raw sizes, failing fast on invalid parameters.
    pub fn with_sizes(chunk_size: usize, overlap: usize) -> Result<Self, ChunkerError> {
        Ok(Self::new(ChunkerConfig::new(chunk_size, overlap)?))
    }

    pub fn config(&self) -> ChunkerConfig {
        self.config
    }

    pub fn chunk(&self, text: &str) -> Vec<DocumentChunk> {
        self.chunk_with_pages(text, None)
    }

    /// Split `text` into overlapping windows.
    ///
    /// Every window except possibly the last starts `chunk_size - overlap`
    /// characters after its predecessor. When the remaining uncovered tail is
    /// shorter than `min_fragment`, the last window is anchored to the end of
    /// the text instead, so it stays within `chunk_size` and overlaps the
    /// previous window by more than `overlap`.
    pub fn chunk_with_pages(&self, text: &str, pages: Option<&PageMap>) -> Vec<DocumentChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        // Byte offset of every char boundary, plus the end of the string.
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(byte, _)| byte)
            .chain(std::iter::once(text.len()))
            .collect();
        let total = boundaries.len() - 1;

        let size = self.config.chunk_size;
        let step = self.config.step();
        let mut windows: Vec<(usize, usize)> = Vec::new();
        let mut start = 0;

        loop {
            let end = (start + size).min(total);
            windows.push((start, end));
            if end == total {
                break;
            }

            let next = start + step;
            let remainder = total - end;
            if remainder < self.config.min_fragment && total >= size {
                windows.push((total - size, total));
                break;
            }
            start = next;
        }

        windows
            .into_iter()
            .map(|(char_start, char_end)| DocumentChunk {
                text: text[boundaries[char_start]..boundaries[char_end]].to_string(),
                char_start,
                char_end,
                page: pages.map(|p| p.median_page(char_start, char_end)),
            })
            .collect()
    }
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}
