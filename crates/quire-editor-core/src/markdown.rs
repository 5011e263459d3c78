//! Markdown export.

use crate::schema::{Block, BlockKind, Document, Inline};

/// Render a document as markdown.
///
/// Underline has no markdown form and is dropped; everything else maps to
/// CommonMark plus GFM strikethrough and task items.
pub fn to_markdown(doc: &Document) -> String {
    let mut out = String::new();
    let mut prev: Option<&Block> = None;
    let mut ordinal = 0usize;

    for block in doc.blocks() {
        if let Some(prev) = prev {
            let same_list = prev.kind.is_list_item() && prev.kind.same_type(&block.kind);
            out.push_str(if same_list { "\n" } else { "\n\n" });
        }
        ordinal = match (&block.kind, prev.map(|p| &p.kind)) {
            (BlockKind::OrderedItem, Some(BlockKind::OrderedItem)) => ordinal + 1,
            (BlockKind::OrderedItem, _) => 1,
            _ => 0,
        };
        write_block(&mut out, block, ordinal);
        prev = Some(block);
    }
    out
}

fn write_block(out: &mut String, block: &Block, ordinal: usize) {
    match &block.kind {
        BlockKind::Paragraph => write_inlines(out, &block.content),
        BlockKind::Heading(level) => {
            out.push_str(&"#".repeat(usize::from(*level)));
            out.push(' ');
            write_inlines(out, &block.content);
        }
        BlockKind::Blockquote => {
            out.push_str("> ");
            write_inlines(out, &block.content);
        }
        BlockKind::CodeBlock(language) => {
            out.push_str("```");
            if let Some(lang) = language {
                out.push_str(lang);
            }
            out.push('\n');
            out.push_str(&block.plain_text());
            out.push_str("\n```");
        }
        BlockKind::BulletItem => {
            out.push_str("- ");
            write_inlines(out, &block.content);
        }
        BlockKind::OrderedItem => {
            out.push_str(&format!("{ordinal}. "));
            write_inlines(out, &block.content);
        }
        BlockKind::TaskItem { checked } => {
            out.push_str(if *checked { "- [x] " } else { "- [ ] " });
            write_inlines(out, &block.content);
        }
        BlockKind::HorizontalRule => out.push_str("---"),
        BlockKind::Image(attrs) => {
            out.push_str("![](");
            out.push_str(attrs.src.as_deref().unwrap_or_default());
            out.push(')');
        }
    }
}

fn write_inlines(out: &mut String, content: &[Inline]) {
    for inline in content {
        match inline {
            Inline::Text { text, marks } => {
                if marks.code {
                    // Code spans are literal; other marks wrap around them.
                    let mut wrapped = format!("`{text}`");
                    wrap_marks(&mut wrapped, marks.bold, marks.italic, marks.strike);
                    push_link(out, &wrapped, marks.link.as_deref());
                } else {
                    let mut wrapped = escape(text);
                    wrap_marks(&mut wrapped, marks.bold, marks.italic, marks.strike);
                    push_link(out, &wrapped, marks.link.as_deref());
                }
            }
            Inline::HardBreak => out.push_str("  \n"),
            Inline::Mention { label, .. } => {
                out.push('@');
                out.push_str(label);
            }
        }
    }
}

fn wrap_marks(text: &mut String, bold: bool, italic: bool, strike: bool) {
    for (on, delim) in [(strike, "~~"), (italic, "*"), (bold, "**")] {
        if on {
            *text = format!("{delim}{text}{delim}");
        }
    }
}

fn push_link(out: &mut String, text: &str, href: Option<&str>) {
    match href {
        Some(href) => out.push_str(&format!("[{text}]({href})")),
        None => out.push_str(text),
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '*' | '_' | '`' | '[' | ']' | '~') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::parse_html;

    #[test]
    fn test_markdown_export() {
        let doc = parse_html(concat!(
            "<h1>Title</h1>",
            "<p>Some <strong>bold</strong>, <em>soft</em> and <code>code</code> with a <a href=\"https://x.test\">link</a>.</p>",
            "<ol><li><p>first</p></li><li><p>second</p></li></ol>",
            "<ul data-type=\"taskList\"><li data-type=\"taskItem\" data-checked=\"true\"><p>done</p></li></ul>",
            "<pre><code class=\"language-rust\">let x = 1;</code></pre>",
            "<hr>",
            "<img src=\"asset-1\">",
        ))
        .unwrap();

        insta::assert_snapshot!(to_markdown(&doc), @r"
        # Title

        Some **bold**, *soft* and `code` with a [link](https://x.test).

        1. first
        2. second

        - [x] done

        ```rust
        let x = 1;
        ```

        ---

        ![](asset-1)
        ");
    }

    #[test]
    fn test_markdown_escapes_literal_syntax() {
        let doc = parse_html("<p>2 * 3 = [six]</p>").unwrap();
        assert_eq!(to_markdown(&doc), r"2 \* 3 = \[six\]");
    }
}
