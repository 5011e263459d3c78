//! Rich-text schema and position arithmetic.
//!
//! A document is a flat, non-empty list of blocks. Textblocks hold inline
//! content; leaf blocks (divider, image) hold none.
//!
//! Positions follow the usual structured-editor convention: a textblock
//! occupies `inline_len + 2` positions (its open and close boundaries plus
//! one per inline unit), a leaf block occupies one. Position `0` is before
//! the first block and `doc.size()` is after the last.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Inline marks applied to a text run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Marks {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strike: bool,
    pub code: bool,
    pub link: Option<String>,
}

/// Mark kinds that can be toggled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkType {
    Bold,
    Italic,
    Underline,
    Strike,
    Code,
    Link,
}

impl Marks {
    pub fn has(&self, mark: MarkType) -> bool {
        match mark {
            MarkType::Bold => self.bold,
            MarkType::Italic => self.italic,
            MarkType::Underline => self.underline,
            MarkType::Strike => self.strike,
            MarkType::Code => self.code,
            MarkType::Link => self.link.is_some(),
        }
    }

    /// Set or clear a mark. `href` is only consulted for links.
    pub fn set(&mut self, mark: MarkType, on: bool, href: Option<&str>) {
        match mark {
            MarkType::Bold => self.bold = on,
            MarkType::Italic => self.italic = on,
            MarkType::Underline => self.underline = on,
            MarkType::Strike => self.strike = on,
            MarkType::Code => self.code = on,
            MarkType::Link => self.link = on.then(|| href.unwrap_or_default().to_string()),
        }
    }
}

/// Inline content of a textblock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Inline {
    Text { text: String, marks: Marks },
    HardBreak,
    Mention { id: SmolStr, label: String },
}

impl Inline {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            marks: Marks::default(),
        }
    }

    pub fn marked(text: impl Into<String>, marks: Marks) -> Self {
        Self::Text {
            text: text.into(),
            marks,
        }
    }

    /// Positions this inline occupies.
    pub fn len(&self) -> usize {
        match self {
            Self::Text { text, .. } => text.chars().count(),
            Self::HardBreak | Self::Mention { .. } => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Plain-text rendering used for counting and text extraction.
    pub fn plain_text(&self) -> String {
        match self {
            Self::Text { text, .. } => text.clone(),
            Self::HardBreak => "\n".into(),
            Self::Mention { label, .. } => format!("@{label}"),
        }
    }
}

/// Attributes of an embedded image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageAttrs {
    /// Source locator (asset id or URL). `None` until an upload confirms it.
    pub src: Option<String>,
    /// Pending-upload id.
    pub id: Option<SmolStr>,
    /// Display width in pixels. `None` means never sized.
    pub width: Option<f64>,
    /// Display height in pixels. `None` means auto.
    pub height: Option<f64>,
    pub aspect_ratio: Option<f64>,
}

/// Heading levels are 1 through 6.
pub const MAX_HEADING_LEVEL: u8 = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BlockKind {
    Paragraph,
    Heading(u8),
    Blockquote,
    CodeBlock(Option<SmolStr>),
    BulletItem,
    OrderedItem,
    TaskItem { checked: bool },
    HorizontalRule,
    Image(ImageAttrs),
}

impl BlockKind {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::HorizontalRule | Self::Image(_))
    }

    pub fn is_list_item(&self) -> bool {
        matches!(
            self,
            Self::BulletItem | Self::OrderedItem | Self::TaskItem { .. }
        )
    }

    /// Whether two kinds are the same node type, ignoring attributes.
    pub fn same_type(&self, other: &BlockKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub kind: BlockKind,
    pub content: Vec<Inline>,
}

impl Block {
    pub fn new(kind: BlockKind, content: Vec<Inline>) -> Self {
        let content = if kind.is_leaf() { Vec::new() } else { content };
        let mut block = Self { kind, content };
        block.normalize();
        block
    }

    pub fn paragraph(content: Vec<Inline>) -> Self {
        Self::new(BlockKind::Paragraph, content)
    }

    pub fn empty_paragraph() -> Self {
        Self::paragraph(Vec::new())
    }

    pub fn image(attrs: ImageAttrs) -> Self {
        Self::new(BlockKind::Image(attrs), Vec::new())
    }

    pub fn is_textblock(&self) -> bool {
        !self.kind.is_leaf()
    }

    /// Number of inline positions.
    pub fn inline_len(&self) -> usize {
        self.content.iter().map(Inline::len).sum()
    }

    /// Positions this block occupies in the document.
    pub fn size(&self) -> usize {
        if self.kind.is_leaf() {
            1
        } else {
            self.inline_len() + 2
        }
    }

    pub fn plain_text(&self) -> String {
        self.content.iter().map(Inline::plain_text).collect()
    }

    /// Merge adjacent text runs with identical marks and drop empty runs.
    pub fn normalize(&mut self) {
        let mut merged: Vec<Inline> = Vec::with_capacity(self.content.len());
        for inline in self.content.drain(..) {
            if inline.is_empty() {
                continue;
            }
            if let (
                Some(Inline::Text {
                    text: prev,
                    marks: prev_marks,
                }),
                Inline::Text { text, marks },
            ) = (merged.last_mut(), &inline)
            {
                if prev_marks == marks {
                    prev.push_str(text);
                    continue;
                }
            }
            merged.push(inline);
        }
        self.content = merged;
    }
}

/// A schema-valid document: never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    blocks: Vec<Block>,
}

impl Default for Document {
    fn default() -> Self {
        Self::empty()
    }
}

/// Where a document position falls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedPos {
    /// Between blocks; `index` is the block that follows (may equal the block count).
    Boundary { index: usize },
    /// Inside textblock `index` at inline offset `offset`.
    Inline { index: usize, offset: usize },
}

impl Document {
    /// A document holding one empty paragraph.
    pub fn empty() -> Self {
        Self {
            blocks: vec![Block::empty_paragraph()],
        }
    }

    /// Build from blocks, substituting an empty paragraph for an empty list.
    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        if blocks.is_empty() {
            Self::empty()
        } else {
            Self { blocks }
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    /// Mutate blocks; the non-empty invariant is restored afterwards.
    pub fn with_blocks_mut<R>(&mut self, f: impl FnOnce(&mut Vec<Block>) -> R) -> R {
        let result = f(&mut self.blocks);
        if self.blocks.is_empty() {
            self.blocks.push(Block::empty_paragraph());
        }
        result
    }

    /// Total number of positions.
    pub fn size(&self) -> usize {
        self.blocks.iter().map(Block::size).sum()
    }

    /// Whether the document is a single empty paragraph.
    pub fn is_blank(&self) -> bool {
        self.blocks.len() == 1
            && self.blocks[0].kind == BlockKind::Paragraph
            && self.blocks[0].content.is_empty()
    }

    /// Start position of every block, in order.
    pub fn block_starts(&self) -> Vec<usize> {
        let mut pos = 0;
        self.blocks
            .iter()
            .map(|b| {
                let start = pos;
                pos += b.size();
                start
            })
            .collect()
    }

    /// Resolve a position (clamped to the document).
    pub fn resolve(&self, pos: usize) -> ResolvedPos {
        let pos = pos.min(self.size());
        let mut start = 0;
        for (index, block) in self.blocks.iter().enumerate() {
            if pos == start {
                return ResolvedPos::Boundary { index };
            }
            let end = start + block.size();
            if pos < end {
                // Leaves have size one, so only textblocks get here.
                return ResolvedPos::Inline {
                    index,
                    offset: pos - start - 1,
                };
            }
            start = end;
        }
        ResolvedPos::Boundary {
            index: self.blocks.len(),
        }
    }

    /// Text between two positions, with blocks separated by `separator`.
    pub fn text_between(&self, from: usize, to: usize, separator: &str) -> String {
        let (from, to) = (from.min(to), from.max(to).min(self.size()));
        let mut parts = Vec::new();
        for (block, start) in self.blocks.iter().zip(self.block_starts()) {
            let end = start + block.size();
            if end <= from || start >= to || !block.is_textblock() {
                continue;
            }
            let lo = from.saturating_sub(start + 1).min(block.inline_len());
            let hi = (to.saturating_sub(start + 1)).min(block.inline_len());
            let slice = slice_inlines(&block.content, lo, hi);
            parts.push(slice.iter().map(Inline::plain_text).collect::<String>());
        }
        parts.join(separator)
    }

    /// Indices of top-level blocks overlapping `[from, to)`.
    pub fn blocks_in_range(&self, from: usize, to: usize) -> Vec<usize> {
        let (from, to) = (from.min(to), from.max(to));
        self.blocks
            .iter()
            .zip(self.block_starts())
            .enumerate()
            .filter(|(_, (block, start))| {
                let end = start + block.size();
                if from == to {
                    *start <= from && from < end
                } else {
                    *start < to && end > from
                }
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Every image in the document.
    pub fn images(&self) -> impl Iterator<Item = &ImageAttrs> {
        self.blocks.iter().filter_map(|b| match &b.kind {
            BlockKind::Image(attrs) => Some(attrs),
            _ => None,
        })
    }
}

// === Inline helpers ===

/// Split inline content at an inline offset.
pub fn split_inlines(content: &[Inline], offset: usize) -> (Vec<Inline>, Vec<Inline>) {
    let mut left = Vec::new();
    let mut right = Vec::new();
    let mut pos = 0;
    for inline in content {
        let len = inline.len();
        if pos + len <= offset {
            left.push(inline.clone());
        } else if pos >= offset {
            right.push(inline.clone());
        } else {
            // Only text runs can straddle an offset.
            if let Inline::Text { text, marks } = inline {
                let cut = char_to_byte(text, offset - pos);
                left.push(Inline::marked(&text[..cut], marks.clone()));
                right.push(Inline::marked(&text[cut..], marks.clone()));
            }
        }
        pos += len;
    }
    (left, right)
}

/// Inline content between two inline offsets.
pub fn slice_inlines(content: &[Inline], from: usize, to: usize) -> Vec<Inline> {
    let (_, rest) = split_inlines(content, from);
    let (middle, _) = split_inlines(&rest, to.saturating_sub(from));
    middle
}

fn char_to_byte(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}
