//! Local undo/redo for non-collaborative editors.
//!
//! Collaborative documents leave history to the CRDT; this stack only sees
//! local changes and is disabled with `EditorConfig::enable_history`.

use crate::schema::Document;
use crate::types::Selection;

#[derive(Debug, Clone)]
struct Entry {
    doc: Document,
    selection: Selection,
}

#[derive(Debug, Clone)]
pub struct History {
    undo_stack: Vec<Entry>,
    redo_stack: Vec<Entry>,
    max_steps: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(100)
    }
}

impl History {
    pub fn new(max_steps: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_steps,
        }
    }

    /// Record the state before a local change. Clears redo.
    pub fn record(&mut self, doc: &Document, selection: Selection) {
        self.undo_stack.push(Entry {
            doc: doc.clone(),
            selection,
        });
        if self.undo_stack.len() > self.max_steps {
            self.undo_stack.remove(0);
        }
        self.redo_stack.clear();
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Step back from `current`, returning the state to restore.
    pub fn undo(&mut self, current: &Document, selection: Selection) -> Option<(Document, Selection)> {
        let entry = self.undo_stack.pop()?;
        self.redo_stack.push(Entry {
            doc: current.clone(),
            selection,
        });
        Some((entry.doc, entry.selection))
    }

    pub fn redo(&mut self, current: &Document, selection: Selection) -> Option<(Document, Selection)> {
        let entry = self.redo_stack.pop()?;
        self.undo_stack.push(Entry {
            doc: current.clone(),
            selection,
        });
        Some((entry.doc, entry.selection))
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}
