//! Per-extension storage derived from or attached to the editor state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::schema::{BlockKind, Document};

/// A heading entry in the document outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadingMarking {
    pub level: u8,
    pub text: String,
    /// One-based order among all headings.
    pub sequence: usize,
}

/// Outline of every heading, in document order.
pub fn headings(doc: &Document) -> Vec<HeadingMarking> {
    doc.blocks()
        .iter()
        .filter_map(|b| match b.kind {
            BlockKind::Heading(level) => Some((level, b.plain_text())),
            _ => None,
        })
        .enumerate()
        .map(|(i, (level, text))| HeadingMarking {
            level,
            text,
            sequence: i + 1,
        })
        .collect()
}

/// Upload progress per asset id, 0 to 100.
pub type AssetsUploadStatus = BTreeMap<SmolStr, u8>;

/// Utility storage: upload tracking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UtilityStorage {
    assets_upload_status: AssetsUploadStatus,
}

impl UtilityStorage {
    /// Replace the status map. Completed entries are dropped.
    pub fn update_assets_upload_status(&mut self, status: AssetsUploadStatus) {
        self.assets_upload_status = status.into_iter().filter(|(_, p)| *p < 100).collect();
    }

    pub fn assets_upload_status(&self) -> &AssetsUploadStatus {
        &self.assets_upload_status
    }

    pub fn upload_in_progress(&self) -> bool {
        !self.assets_upload_status.is_empty()
    }
}

/// Size statistics for the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub characters: usize,
    pub words: usize,
    pub paragraphs: usize,
}

impl DocumentInfo {
    /// Characters and words count every textblock; paragraphs count
    /// paragraph blocks with visible text.
    pub fn of(doc: &Document) -> Self {
        let mut info = Self::default();
        for block in doc.blocks() {
            let text = block.plain_text();
            info.characters += text.chars().filter(|c| *c != '\n').count();
            info.words += text.split_whitespace().count();
            if block.kind == BlockKind::Paragraph && !text.trim().is_empty() {
                info.paragraphs += 1;
            }
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::parse_html;

    #[test]
    fn test_headings_in_order() {
        let doc = parse_html("<h1>Intro</h1><p>x</p><h3>Deep <em>dive</em></h3>").unwrap();
        assert_eq!(
            headings(&doc),
            vec![
                HeadingMarking {
                    level: 1,
                    text: "Intro".into(),
                    sequence: 1
                },
                HeadingMarking {
                    level: 3,
                    text: "Deep dive".into(),
                    sequence: 2
                },
            ]
        );
    }

    #[test]
    fn test_upload_tracking() {
        let mut storage = UtilityStorage::default();
        assert!(!storage.upload_in_progress());
        storage.update_assets_upload_status(BTreeMap::from([("a".into(), 40), ("b".into(), 100)]));
        assert!(storage.upload_in_progress());
        assert_eq!(storage.assets_upload_status().len(), 1);
        storage.update_assets_upload_status(BTreeMap::from([("a".into(), 100)]));
        assert!(!storage.upload_in_progress());
    }

    #[test]
    fn test_document_info() {
        let doc = parse_html("<h1>Two words</h1><p>one two three</p><p> </p><ul><li><p>item</p></li></ul>").unwrap();
        assert_eq!(
            DocumentInfo::of(&doc),
            DocumentInfo {
                characters: 9 + 13 + 1 + 4,
                words: 2 + 3 + 1,
                paragraphs: 1,
            }
        );
    }
}
