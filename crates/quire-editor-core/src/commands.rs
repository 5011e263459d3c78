//! Named commands behind the host's menus and toolbars.
//!
//! Each [`MenuItem`] has a stable string key, belongs to an extension, and
//! knows how to apply itself to a document and whether it is active at a
//! selection.

use smol_str::SmolStr;

use crate::config::{EditorConfig, extension};
use crate::error::EditorError;
use crate::schema::{Block, BlockKind, Document, ImageAttrs, MarkType, MAX_HEADING_LEVEL};
use crate::transform::{insert_fragment, range_has_mark, range_is_kind, set_block_kind, toggle_mark};
use crate::types::Selection;

/// Extra parameters some commands need.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandArgs {
    /// Target for `link`. `None` removes an existing link.
    pub url: Option<String>,
    /// Attributes for `image`.
    pub image: Option<ImageAttrs>,
}

impl CommandArgs {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn image(attrs: ImageAttrs) -> Self {
        Self {
            image: Some(attrs),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MenuItem {
    Text,
    Heading(u8),
    Bold,
    Italic,
    Underline,
    Strikethrough,
    Code,
    CodeBlock,
    Quote,
    BulletedList,
    NumberedList,
    TodoList,
    Divider,
    Image,
    Link,
}

impl MenuItem {
    pub const ALL: [MenuItem; 20] = [
        Self::Text,
        Self::Heading(1),
        Self::Heading(2),
        Self::Heading(3),
        Self::Heading(4),
        Self::Heading(5),
        Self::Heading(6),
        Self::Bold,
        Self::Italic,
        Self::Underline,
        Self::Strikethrough,
        Self::Code,
        Self::CodeBlock,
        Self::Quote,
        Self::BulletedList,
        Self::NumberedList,
        Self::TodoList,
        Self::Divider,
        Self::Image,
        Self::Link,
    ];

    pub fn from_key(key: &str) -> Option<Self> {
        let item = match key {
            "text" => Self::Text,
            "bold" => Self::Bold,
            "italic" => Self::Italic,
            "underline" => Self::Underline,
            "strikethrough" => Self::Strikethrough,
            "code" => Self::Code,
            "code-block" => Self::CodeBlock,
            "quote" => Self::Quote,
            "bulleted-list" => Self::BulletedList,
            "numbered-list" => Self::NumberedList,
            "to-do-list" => Self::TodoList,
            "divider" => Self::Divider,
            "image" => Self::Image,
            "link" => Self::Link,
            other => {
                let level: u8 = other.strip_prefix('h')?.parse().ok()?;
                if !(1..=MAX_HEADING_LEVEL).contains(&level) {
                    return None;
                }
                Self::Heading(level)
            }
        };
        Some(item)
    }

    pub fn key(&self) -> SmolStr {
        match self {
            Self::Text => "text".into(),
            Self::Heading(level) => smol_str::format_smolstr!("h{level}"),
            Self::Bold => "bold".into(),
            Self::Italic => "italic".into(),
            Self::Underline => "underline".into(),
            Self::Strikethrough => "strikethrough".into(),
            Self::Code => "code".into(),
            Self::CodeBlock => "code-block".into(),
            Self::Quote => "quote".into(),
            Self::BulletedList => "bulleted-list".into(),
            Self::NumberedList => "numbered-list".into(),
            Self::TodoList => "to-do-list".into(),
            Self::Divider => "divider".into(),
            Self::Image => "image".into(),
            Self::Link => "link".into(),
        }
    }

    /// The extension that has to be enabled for this item, beyond the base schema.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Self::Image => Some(extension::IMAGE),
            _ => None,
        }
    }

    /// Resolve a key against a configuration. Disabled or flagged
    /// extensions make their items unavailable.
    pub fn lookup(key: &str, config: &EditorConfig) -> Result<Self, EditorError> {
        let item = Self::from_key(key).ok_or_else(|| EditorError::CommandNotFound(key.into()))?;
        let available =
            config.is_enabled(key) && item.extension().is_none_or(|ext| config.is_enabled(ext));
        if available {
            Ok(item)
        } else {
            Err(EditorError::CommandNotFound(key.into()))
        }
    }

    fn block_kind(&self) -> Option<BlockKind> {
        match self {
            Self::Text => Some(BlockKind::Paragraph),
            Self::Heading(level) => Some(BlockKind::Heading(*level)),
            Self::CodeBlock => Some(BlockKind::CodeBlock(None)),
            Self::Quote => Some(BlockKind::Blockquote),
            Self::BulletedList => Some(BlockKind::BulletItem),
            Self::NumberedList => Some(BlockKind::OrderedItem),
            Self::TodoList => Some(BlockKind::TaskItem { checked: false }),
            _ => None,
        }
    }

    fn mark(&self) -> Option<MarkType> {
        match self {
            Self::Bold => Some(MarkType::Bold),
            Self::Italic => Some(MarkType::Italic),
            Self::Underline => Some(MarkType::Underline),
            Self::Strikethrough => Some(MarkType::Strike),
            Self::Code => Some(MarkType::Code),
            Self::Link => Some(MarkType::Link),
            _ => None,
        }
    }

    /// Apply the item. Returns the selection afterwards, or `None` if the
    /// document did not change.
    pub fn run(
        &self,
        doc: &mut Document,
        selection: Selection,
        args: &CommandArgs,
    ) -> Result<Option<Selection>, EditorError> {
        let (from, to) = (selection.start(), selection.end());

        if let Some(kind) = self.block_kind() {
            // Applying the active block type again turns it back into text.
            let target = if *self != Self::Text && range_is_kind(doc, from, to, &kind) {
                BlockKind::Paragraph
            } else {
                kind
            };
            let changed = set_block_kind(doc, from, to, &target);
            return Ok(changed.then(|| selection.clamped(doc.size())));
        }

        match self {
            Self::Link => {
                let linked = range_has_mark(doc, from, to, MarkType::Link);
                let mut changed = false;
                if linked {
                    changed |= toggle_mark(doc, from, to, MarkType::Link, None);
                }
                if let Some(url) = &args.url {
                    changed |= toggle_mark(doc, from, to, MarkType::Link, Some(url));
                }
                return Ok(changed.then_some(selection));
            }
            Self::Divider => {
                let fragment = Document::from_blocks(vec![Block::new(BlockKind::HorizontalRule, Vec::new())]);
                let cursor = insert_fragment(doc, to, fragment);
                return Ok(Some(Selection::collapsed(cursor)));
            }
            Self::Image => {
                let attrs = args
                    .image
                    .clone()
                    .ok_or_else(|| EditorError::InvalidAttributes("image command needs attributes".into()))?;
                let cursor = insert_fragment(doc, to, Document::from_blocks(vec![Block::image(attrs)]));
                return Ok(Some(Selection::collapsed(cursor)));
            }
            _ => {}
        }

        match self.mark() {
            Some(mark) => Ok(toggle_mark(doc, from, to, mark, None).then_some(selection)),
            None => Ok(None),
        }
    }

    pub fn is_active(&self, doc: &Document, selection: Selection) -> bool {
        let (from, to) = (selection.start(), selection.end());
        if let Some(kind) = self.block_kind() {
            return range_is_kind(doc, from, to, &kind);
        }
        match self.mark() {
            Some(mark) => range_has_mark(doc, from, to, mark),
            None => false,
        }
    }
}
