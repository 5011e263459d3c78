//! Structured JSON export in the familiar `{type, attrs, content, marks}` shape.

use serde_json::{Map, Value, json};

use crate::schema::{Block, BlockKind, Document, Inline, Marks};

/// Render a document as a structured JSON tree.
pub fn to_json(doc: &Document) -> Value {
    let mut content = Vec::new();
    let mut list: Option<(&'static str, Vec<Value>)> = None;

    for block in doc.blocks() {
        let list_type = match block.kind {
            BlockKind::BulletItem => Some("bulletList"),
            BlockKind::OrderedItem => Some("orderedList"),
            BlockKind::TaskItem { .. } => Some("taskList"),
            _ => None,
        };
        if list.as_ref().map(|(t, _)| *t) != list_type {
            if let Some((t, items)) = list.take() {
                content.push(json!({ "type": t, "content": items }));
            }
            list = list_type.map(|t| (t, Vec::new()));
        }
        match &mut list {
            Some((_, items)) => items.push(block_json(block)),
            None => content.push(block_json(block)),
        }
    }
    if let Some((t, items)) = list {
        content.push(json!({ "type": t, "content": items }));
    }
    json!({ "type": "doc", "content": content })
}

fn block_json(block: &Block) -> Value {
    let inline = || Value::Array(block.content.iter().map(inline_json).collect());
    let paragraph = || json!({ "type": "paragraph", "content": inline() });
    match &block.kind {
        BlockKind::Paragraph => paragraph(),
        BlockKind::Heading(level) => {
            json!({ "type": "heading", "attrs": { "level": level }, "content": inline() })
        }
        BlockKind::Blockquote => json!({ "type": "blockquote", "content": [paragraph()] }),
        BlockKind::CodeBlock(language) => json!({
            "type": "codeBlock",
            "attrs": { "language": language },
            "content": [{ "type": "text", "text": block.plain_text() }],
        }),
        BlockKind::BulletItem | BlockKind::OrderedItem => {
            json!({ "type": "listItem", "content": [paragraph()] })
        }
        BlockKind::TaskItem { checked } => json!({
            "type": "taskItem",
            "attrs": { "checked": checked },
            "content": [paragraph()],
        }),
        BlockKind::HorizontalRule => json!({ "type": "horizontalRule" }),
        BlockKind::Image(attrs) => json!({
            "type": "image",
            "attrs": {
                "src": attrs.src,
                "id": attrs.id,
                "width": attrs.width.map(|w| format!("{w}px")),
                "height": attrs.height.map(|h| format!("{h}px")),
                "aspectRatio": attrs.aspect_ratio,
            },
        }),
    }
}

fn inline_json(inline: &Inline) -> Value {
    match inline {
        Inline::Text { text, marks } => {
            let mut node = Map::new();
            node.insert("type".into(), "text".into());
            node.insert("text".into(), text.clone().into());
            let marks = marks_json(marks);
            if !marks.is_empty() {
                node.insert("marks".into(), Value::Array(marks));
            }
            Value::Object(node)
        }
        Inline::HardBreak => json!({ "type": "hardBreak" }),
        Inline::Mention { id, label } => json!({
            "type": "mention",
            "attrs": { "id": id, "label": label },
        }),
    }
}

fn marks_json(marks: &Marks) -> Vec<Value> {
    let mut out = Vec::new();
    for (on, name) in [
        (marks.bold, "bold"),
        (marks.italic, "italic"),
        (marks.underline, "underline"),
        (marks.strike, "strike"),
        (marks.code, "code"),
    ] {
        if on {
            out.push(json!({ "type": name }));
        }
    }
    if let Some(href) = &marks.link {
        out.push(json!({ "type": "link", "attrs": { "href": href } }));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::parse_html;

    #[test]
    fn test_json_shape() {
        let doc = parse_html("<h2>Hi</h2><ul><li><p><em>a</em></p></li><li><p>b</p></li></ul>").unwrap();
        assert_eq!(
            to_json(&doc),
            json!({
                "type": "doc",
                "content": [
                    { "type": "heading", "attrs": { "level": 2 }, "content": [{ "type": "text", "text": "Hi" }] },
                    { "type": "bulletList", "content": [
                        { "type": "listItem", "content": [{ "type": "paragraph", "content": [
                            { "type": "text", "text": "a", "marks": [{ "type": "italic" }] }
                        ] }] },
                        { "type": "listItem", "content": [{ "type": "paragraph", "content": [
                            { "type": "text", "text": "b" }
                        ] }] },
                    ] },
                ],
            })
        );
    }
}
