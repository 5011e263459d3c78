//! Document transforms.
//!
//! Every transform takes a schema-valid document and leaves a schema-valid
//! document behind. Positions are clamped, never rejected.

use crate::schema::{
    Block, BlockKind, Document, ImageAttrs, Inline, MarkType, Marks, ResolvedPos, slice_inlines,
    split_inlines,
};

/// Insert `fragment` at `pos`. Returns the cursor position after the
/// inserted content.
///
/// A single non-empty textblock inserted inside a textblock is spliced into
/// it inline; anything else splits the surrounding block.
pub fn insert_fragment(doc: &mut Document, pos: usize, fragment: Document) -> usize {
    let pos = pos.min(doc.size());
    let mut blocks = fragment.into_blocks();

    match doc.resolve(pos) {
        ResolvedPos::Inline { index, offset } => {
            let inline_merge = blocks.len() == 1
                && blocks[0].is_textblock()
                && !blocks[0].content.is_empty();
            if inline_merge {
                let inserted = blocks.remove(0);
                let added = inserted.inline_len();
                doc.with_blocks_mut(|all| splice_inline(&mut all[index], offset, inserted.content));
                return pos + added;
            }
            let len = doc.blocks()[index].inline_len();
            let block_start = pos - offset - 1;
            if offset == 0 {
                insert_blocks(doc, index, block_start, blocks)
            } else if offset >= len {
                insert_blocks(doc, index + 1, block_start + len + 2, blocks)
            } else {
                doc.with_blocks_mut(|all| {
                    let block = &mut all[index];
                    let (left, right) = split_inlines(&block.content, offset);
                    let right = Block::new(block.kind.clone(), right);
                    block.content = left;
                    all.insert(index + 1, right);
                });
                insert_blocks(doc, index + 1, block_start + offset + 2, blocks)
            }
        }
        ResolvedPos::Boundary { index } => insert_blocks(doc, index, pos, blocks),
    }
}

/// Insert whole blocks before block `index`, which starts at `at`.
fn insert_blocks(doc: &mut Document, index: usize, at: usize, blocks: Vec<Block>) -> usize {
    let added: usize = blocks.iter().map(Block::size).sum();
    let ends_in_textblock = blocks.last().is_some_and(Block::is_textblock);
    doc.with_blocks_mut(|all| {
        for (i, block) in blocks.into_iter().enumerate() {
            all.insert(index + i, block);
        }
    });
    let end = at + added;
    if ends_in_textblock { end - 1 } else { end }
}

fn splice_inline(block: &mut Block, offset: usize, inserted: Vec<Inline>) {
    let inserted = if matches!(block.kind, BlockKind::CodeBlock(_)) {
        let text: String = inserted.iter().map(Inline::plain_text).collect();
        vec![Inline::text(text)]
    } else {
        inserted
    };
    let (mut left, right) = split_inlines(&block.content, offset);
    left.extend(inserted);
    left.extend(right);
    block.content = left;
    block.normalize();
}

/// Delete everything between two positions, joining the textblocks at either
/// end. Returns the attributes of any images removed.
pub fn delete_range(doc: &mut Document, from: usize, to: usize) -> Vec<ImageAttrs> {
    let size = doc.size();
    let (from, to) = (from.min(to).min(size), from.max(to).min(size));
    if from == to {
        return Vec::new();
    }

    let starts = doc.block_starts();
    let mut removed = Vec::new();
    doc.with_blocks_mut(|all| {
        let mut out: Vec<Block> = Vec::with_capacity(all.len());
        let mut left: Option<usize> = None;

        for (block, start) in all.drain(..).zip(starts) {
            let end = start + block.size();
            if end <= from || start >= to {
                out.push(block);
                continue;
            }
            let holds_from = start < from && from < end;
            let holds_to = start < to && to < end;
            let len = block.inline_len();
            let offset = |pos: usize| (pos - start - 1).min(len);

            match (holds_from, holds_to) {
                (true, true) => {
                    let (a, _) = split_inlines(&block.content, offset(from));
                    let (_, c) = split_inlines(&block.content, offset(to));
                    let mut a = a;
                    a.extend(c);
                    out.push(Block::new(block.kind, a));
                }
                (true, false) => {
                    let (a, _) = split_inlines(&block.content, offset(from));
                    out.push(Block::new(block.kind, a));
                    left = Some(out.len() - 1);
                }
                (false, true) => {
                    let (_, rest) = split_inlines(&block.content, offset(to));
                    match left.and_then(|i| out.get_mut(i)) {
                        Some(joined) if joined.is_textblock() => {
                            joined.content.extend(rest);
                            joined.normalize();
                        }
                        _ => out.push(Block::new(block.kind, rest)),
                    }
                }
                (false, false) => {
                    if let BlockKind::Image(attrs) = block.kind {
                        removed.push(attrs);
                    }
                }
            }
        }
        *all = out;
    });
    removed
}

/// Replace a range with a fragment. Returns the cursor after the insertion
/// and any images the deletion removed.
pub fn replace_range(
    doc: &mut Document,
    from: usize,
    to: usize,
    fragment: Document,
) -> (usize, Vec<ImageAttrs>) {
    let start = from.min(to);
    let removed = delete_range(doc, from, to);
    let cursor = insert_fragment(doc, start, fragment);
    (cursor, removed)
}

/// Change the kind of every textblock overlapping the range.
/// Returns whether anything changed.
pub fn set_block_kind(doc: &mut Document, from: usize, to: usize, kind: &BlockKind) -> bool {
    if kind.is_leaf() {
        return false;
    }
    let indices = doc.blocks_in_range(from, to);
    doc.with_blocks_mut(|all| {
        let mut changed = false;
        for i in indices {
            let block = &mut all[i];
            if !block.is_textblock() || block.kind == *kind {
                continue;
            }
            if matches!(kind, BlockKind::CodeBlock(_)) {
                let text = block.plain_text();
                block.content = vec![Inline::text(text)];
            }
            block.kind = kind.clone();
            block.normalize();
            changed = true;
        }
        changed
    })
}

/// Whether every textblock overlapping the range has the given node type.
pub fn range_is_kind(doc: &Document, from: usize, to: usize, kind: &BlockKind) -> bool {
    let indices = doc.blocks_in_range(from, to);
    !indices.is_empty()
        && indices
            .iter()
            .filter_map(|&i| doc.blocks().get(i))
            .all(|b| b.kind.same_type(kind) && (b.kind == *kind || !exact_attrs(kind)))
}

// Headings compare by level; lists, code and tasks by type only.
fn exact_attrs(kind: &BlockKind) -> bool {
    matches!(kind, BlockKind::Heading(_))
}

/// Marks in effect at `pos`: the text before the position, or after it at
/// the start of a block.
pub fn marks_at(doc: &Document, pos: usize) -> Option<Marks> {
    let ResolvedPos::Inline { index, offset } = doc.resolve(pos) else {
        return None;
    };
    let block = &doc.blocks()[index];
    let candidates = if offset == 0 {
        slice_inlines(&block.content, 0, 1)
    } else {
        slice_inlines(&block.content, offset - 1, offset)
    };
    candidates.into_iter().find_map(|inline| match inline {
        Inline::Text { marks, .. } => Some(marks),
        _ => None,
    })
}

/// Whether all text in the range carries the mark. A collapsed range looks
/// at the marks in effect at the cursor.
pub fn range_has_mark(doc: &Document, from: usize, to: usize, mark: MarkType) -> bool {
    if from == to {
        return marks_at(doc, from).is_some_and(|m| m.has(mark));
    }
    let mut saw_text = false;
    let all = text_runs_in_range(doc, from, to).all(|marks| {
        saw_text = true;
        marks.has(mark)
    });
    saw_text && all
}

fn text_runs_in_range(doc: &Document, from: usize, to: usize) -> impl Iterator<Item = Marks> + '_ {
    let (from, to) = (from.min(to), from.max(to));
    doc.blocks()
        .iter()
        .zip(doc.block_starts())
        .filter(move |(b, start)| b.is_textblock() && *start < to && start + b.size() > from)
        .flat_map(move |(b, start)| {
            let len = b.inline_len();
            let lo = from.saturating_sub(start + 1).min(len);
            let hi = to.saturating_sub(start + 1).min(len);
            slice_inlines(&b.content, lo, hi)
        })
        .filter_map(|inline| match inline {
            Inline::Text { marks, .. } => Some(marks),
            _ => None,
        })
}

/// Toggle a mark over a non-empty range: removed if every text run already
/// has it, added otherwise. Code blocks are skipped.
pub fn toggle_mark(
    doc: &mut Document,
    from: usize,
    to: usize,
    mark: MarkType,
    href: Option<&str>,
) -> bool {
    let (from, to) = (from.min(to), from.max(to).min(doc.size()));
    if from == to {
        return false;
    }
    let on = !range_has_mark(doc, from, to, mark);
    let starts = doc.block_starts();
    doc.with_blocks_mut(|all| {
        let mut changed = false;
        for (block, start) in all.iter_mut().zip(starts) {
            let end = start + block.size();
            if !block.is_textblock()
                || matches!(block.kind, BlockKind::CodeBlock(_))
                || end <= from
                || start >= to
            {
                continue;
            }
            let len = block.inline_len();
            let lo = from.saturating_sub(start + 1).min(len);
            let hi = to.saturating_sub(start + 1).min(len);
            if lo == hi {
                continue;
            }
            let (head, rest) = split_inlines(&block.content, lo);
            let (middle, tail) = split_inlines(&rest, hi - lo);
            let middle = middle.into_iter().map(|inline| match inline {
                Inline::Text { text, mut marks } => {
                    marks.set(mark, on, href);
                    Inline::Text { text, marks }
                }
                other => other,
            });
            let mut content = head;
            content.extend(middle);
            content.extend(tail);
            block.content = content;
            block.normalize();
            changed = true;
        }
        changed
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::{parse_html, render_html};

    fn doc(html: &str) -> Document {
        parse_html(html).unwrap()
    }

    #[test]
    fn test_inline_insert() {
        let mut d = doc("<p>Hello</p>");
        let cursor = insert_fragment(&mut d, 3, doc("<p><strong>XY</strong></p>"));
        assert_eq!(render_html(&d), "<p>He<strong>XY</strong>llo</p>");
        assert_eq!(cursor, 5);
    }

    #[test]
    fn test_block_insert_splits() {
        let mut d = doc("<p>Hello</p>");
        let cursor = insert_fragment(&mut d, 3, doc("<hr>"));
        assert_eq!(render_html(&d), "<p>He</p><hr><p>llo</p>");
        assert_eq!(cursor, 5);
    }

    #[test]
    fn test_block_insert_at_end_of_block() {
        let mut d = doc("<p>Hi</p>");
        let cursor = insert_fragment(&mut d, 3, doc("<h1>T</h1><p>x</p>"));
        assert_eq!(render_html(&d), "<p>Hi</p><h1>T</h1><p>x</p>");
        // Inside the trailing paragraph, after "x".
        assert_eq!(cursor, 4 + 3 + 2);
    }

    #[test]
    fn test_insert_clamps_position() {
        let mut d = doc("<p>a</p>");
        insert_fragment(&mut d, 999, doc("<p>b</p>"));
        assert_eq!(render_html(&d), "<p>a</p><p>b</p>");
    }

    #[test]
    fn test_delete_within_block() {
        let mut d = doc("<p>Hello</p>");
        delete_range(&mut d, 2, 4);
        assert_eq!(render_html(&d), "<p>Hlo</p>");
    }

    #[test]
    fn test_delete_joins_blocks_and_reports_images() {
        let mut d = doc(r#"<h1>Title</h1><img src="a1"><p>body text</p>"#);
        // From inside the heading ("Ti|tle") to inside the paragraph ("body |text").
        let removed = delete_range(&mut d, 3, 7 + 1 + 6);
        assert_eq!(render_html(&d), "<h1>Titext</h1>");
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].src.as_deref(), Some("a1"));
    }

    #[test]
    fn test_delete_everything_leaves_empty_paragraph() {
        let mut d = doc("<p>a</p><hr>");
        let size = d.size();
        delete_range(&mut d, 0, size);
        assert!(d.is_blank());
    }

    #[test]
    fn test_toggle_mark() {
        let mut d = doc("<p>Hello</p>");
        assert!(toggle_mark(&mut d, 1, 3, MarkType::Bold, None));
        assert_eq!(render_html(&d), "<p><strong>He</strong>llo</p>");
        assert!(range_has_mark(&d, 1, 3, MarkType::Bold));
        assert!(!range_has_mark(&d, 1, 6, MarkType::Bold));

        // Mixed range gets the mark everywhere first.
        toggle_mark(&mut d, 1, 6, MarkType::Bold, None);
        assert_eq!(render_html(&d), "<p><strong>Hello</strong></p>");
        toggle_mark(&mut d, 1, 6, MarkType::Bold, None);
        assert_eq!(render_html(&d), "<p>Hello</p>");
    }

    #[test]
    fn test_link_mark_carries_href() {
        let mut d = doc("<p>site</p>");
        toggle_mark(&mut d, 1, 5, MarkType::Link, Some("https://x.test"));
        assert_eq!(render_html(&d), r#"<p><a href="https://x.test">site</a></p>"#);
    }

    #[test]
    fn test_set_block_kind() {
        let mut d = doc("<p>a</p><p>b</p><hr>");
        assert!(set_block_kind(&mut d, 1, 4, &BlockKind::Heading(2)));
        assert_eq!(render_html(&d), "<h2>a</h2><h2>b</h2><hr>");
        assert!(range_is_kind(&d, 1, 4, &BlockKind::Heading(2)));
        assert!(!range_is_kind(&d, 1, 4, &BlockKind::Heading(1)));
        assert!(!set_block_kind(&mut d, 1, 4, &BlockKind::Heading(2)));
    }

    #[test]
    fn test_marks_at_cursor() {
        let d = doc("<p><em>ab</em>cd</p>");
        assert!(marks_at(&d, 2).unwrap().italic);
        assert!(marks_at(&d, 1).unwrap().italic);
        assert!(!marks_at(&d, 4).unwrap().italic);
        assert_eq!(marks_at(&d, 0), None);
    }
}
