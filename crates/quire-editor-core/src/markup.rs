//! HTML markup: strict parser and canonical renderer.
//!
//! The parser accepts the subset of HTML the renderer produces plus a few
//! common aliases (`<b>`, `<i>`, `<del>`, bare inline text at the top level).
//! Anything it does not understand is an error rather than a guess, so a
//! malformed value never replaces a valid document.

use markdown_weaver_escape::{escape_html, escape_html_body_text};
use smol_str::SmolStr;

use crate::error::MarkupError;
use crate::schema::{Block, BlockKind, Document, ImageAttrs, Inline, MAX_HEADING_LEVEL, Marks};

/// Markup for an empty document.
pub const EMPTY_DOCUMENT: &str = "<p></p>";

const VOID_ELEMENTS: &[&str] = &["br", "hr", "img"];
const BLOCK_ELEMENTS: &[&str] = &[
    "p",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "blockquote",
    "pre",
    "ul",
    "ol",
    "li",
    "hr",
    "img",
];

// === Tokenizer ===

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open {
        name: SmolStr,
        attrs: Vec<(SmolStr, String)>,
        self_closing: bool,
    },
    Close(SmolStr),
    Text(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, MarkupError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut text_start = 0;

    while i < bytes.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }
        if i > text_start {
            tokens.push(Token::Text(decode_entities(&input[text_start..i])));
        }
        if input[i..].starts_with("<!--") {
            let end = input[i + 4..]
                .find("-->")
                .ok_or(MarkupError::MalformedTag(i))?;
            i += 4 + end + 3;
        } else {
            let (token, next) = read_tag(input, i)?;
            tokens.push(token);
            i = next;
        }
        text_start = i;
    }
    if text_start < input.len() {
        tokens.push(Token::Text(decode_entities(&input[text_start..])));
    }
    Ok(tokens)
}

/// Read one tag starting at the `<` at `start`. Returns the token and the
/// byte offset just past the closing `>`.
fn read_tag(input: &str, start: usize) -> Result<(Token, usize), MarkupError> {
    let bytes = input.as_bytes();
    let closing = bytes.get(start + 1) == Some(&b'/');
    let body_start = start + 1 + usize::from(closing);

    let mut end = body_start;
    let mut quote: Option<u8> = None;
    while end < bytes.len() {
        let b = bytes[end];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => break,
            None => {}
        }
        end += 1;
    }
    if end >= bytes.len() {
        return Err(MarkupError::MalformedTag(start));
    }

    let body = input[body_start..end].trim();
    let (body, self_closing) = match body.strip_suffix('/') {
        Some(body) => (body.trim_end(), true),
        None => (body, false),
    };
    let name_end = body
        .find(|c: char| c.is_ascii_whitespace())
        .unwrap_or(body.len());
    let name = &body[..name_end];
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(MarkupError::MalformedTag(start));
    }
    let name = SmolStr::new(name.to_ascii_lowercase());

    let token = if closing {
        if name_end != body.len() || self_closing {
            return Err(MarkupError::MalformedTag(start));
        }
        Token::Close(name)
    } else {
        let attrs = read_attrs(&body[name_end..]).ok_or(MarkupError::MalformedTag(start))?;
        let self_closing = self_closing || VOID_ELEMENTS.contains(&name.as_str());
        Token::Open {
            name,
            attrs,
            self_closing,
        }
    };
    Ok((token, end + 1))
}

fn read_attrs(mut rest: &str) -> Option<Vec<(SmolStr, String)>> {
    let mut attrs = Vec::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return Some(attrs);
        }
        let name_end = rest
            .find(|c: char| c.is_ascii_whitespace() || c == '=')
            .unwrap_or(rest.len());
        let name = SmolStr::new(rest[..name_end].to_ascii_lowercase());
        if name.is_empty() {
            return None;
        }
        rest = rest[name_end..].trim_start();
        let value = if let Some(after_eq) = rest.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            let (raw, remainder) = match after_eq.chars().next() {
                Some(q @ ('"' | '\'')) => {
                    let close = after_eq[1..].find(q)?;
                    (&after_eq[1..1 + close], &after_eq[close + 2..])
                }
                Some(_) => {
                    let end = after_eq
                        .find(|c: char| c.is_ascii_whitespace())
                        .unwrap_or(after_eq.len());
                    (&after_eq[..end], &after_eq[end..])
                }
                None => return None,
            };
            rest = remainder;
            decode_entities(raw)
        } else {
            String::new()
        };
        attrs.push((name, value));
    }
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest.find(';').and_then(|semi| {
            let entity = &rest[1..semi];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" | "#39" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, semi))
        });
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

// === Parser ===

/// Parse markup into a document.
pub fn parse_html(input: &str) -> Result<Document, MarkupError> {
    let mut parser = Parser {
        tokens: tokenize(input)?,
        pos: 0,
    };
    let blocks = parser.blocks(None)?;
    Ok(Document::from_blocks(blocks))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

fn attr<'a>(attrs: &'a [(SmolStr, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

fn is_block_element(name: &str) -> bool {
    BLOCK_ELEMENTS.contains(&name)
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    /// Parse blocks until `</until>` (or the end of input at the top level).
    fn blocks(&mut self, until: Option<&str>) -> Result<Vec<Block>, MarkupError> {
        let mut blocks = Vec::new();
        while let Some(token) = self.peek() {
            match token {
                Token::Text(text) if text.trim().is_empty() => self.pos += 1,
                Token::Close(name) => {
                    let name = name.clone();
                    self.pos += 1;
                    return match until {
                        Some(expected) if expected == name => Ok(blocks),
                        Some(expected) => Err(MarkupError::Mismatched {
                            expected: expected.into(),
                            found: name,
                        }),
                        None => Err(MarkupError::UnexpectedClose(name)),
                    };
                }
                Token::Open { name, .. } if is_block_element(name) => {
                    let block = self.block()?;
                    blocks.extend(block);
                }
                _ => {
                    let content = self.inline_run()?;
                    blocks.push(Block::paragraph(content));
                }
            }
        }
        match until {
            Some(name) => Err(MarkupError::Unclosed(name.into())),
            None => Ok(blocks),
        }
    }

    fn block(&mut self) -> Result<Vec<Block>, MarkupError> {
        let Some(Token::Open {
            name,
            attrs,
            self_closing,
        }) = self.next()
        else {
            return Ok(Vec::new());
        };
        let block = match name.as_str() {
            "p" => Block::paragraph(self.textblock_content(&name, self_closing)?),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = name[1..].parse::<u8>().unwrap_or(1).min(MAX_HEADING_LEVEL);
                let content = self.textblock_content(&name, self_closing)?;
                Block::new(BlockKind::Heading(level), content)
            }
            "blockquote" => {
                let inner = if self_closing {
                    Vec::new()
                } else {
                    self.blocks(Some("blockquote"))?
                };
                return Ok(inner
                    .into_iter()
                    .map(|mut b| {
                        if b.kind == BlockKind::Paragraph {
                            b.kind = BlockKind::Blockquote;
                        }
                        b
                    })
                    .collect());
            }
            "pre" => self.code_block(self_closing)?,
            "ul" | "ol" => {
                let kind = match (name.as_str(), attr(&attrs, "data-type")) {
                    (_, Some("taskList")) => BlockKind::TaskItem { checked: false },
                    ("ol", _) => BlockKind::OrderedItem,
                    _ => BlockKind::BulletItem,
                };
                return if self_closing {
                    Ok(Vec::new())
                } else {
                    self.list(&name, kind)
                };
            }
            "li" => return Err(MarkupError::Misplaced(name)),
            "hr" => Block::new(BlockKind::HorizontalRule, Vec::new()),
            "img" => Block::image(image_attrs(&attrs)),
            _ => return Err(MarkupError::UnknownElement(name)),
        };
        Ok(vec![block])
    }

    fn textblock_content(&mut self, name: &str, self_closing: bool) -> Result<Vec<Inline>, MarkupError> {
        if self_closing {
            Ok(Vec::new())
        } else {
            self.inlines(name, &Marks::default())
        }
    }

    fn code_block(&mut self, self_closing: bool) -> Result<Block, MarkupError> {
        if self_closing {
            return Ok(Block::new(BlockKind::CodeBlock(None), Vec::new()));
        }
        let mut language = None;
        let mut text = String::new();
        let mut in_code = false;
        loop {
            match self.next() {
                None => return Err(MarkupError::Unclosed("pre".into())),
                Some(Token::Text(t)) => text.push_str(&t),
                Some(Token::Open { name, attrs, .. }) if name == "code" && !in_code => {
                    in_code = true;
                    language = attr(&attrs, "class")
                        .and_then(|c| c.split_whitespace().find_map(|c| c.strip_prefix("language-")))
                        .map(SmolStr::new);
                }
                Some(Token::Close(name)) if name == "code" && in_code => in_code = false,
                Some(Token::Close(name)) if name == "pre" && !in_code => break,
                Some(Token::Open { name, .. }) => return Err(MarkupError::Misplaced(name)),
                Some(Token::Close(name)) => {
                    return Err(MarkupError::Mismatched {
                        expected: if in_code { "code" } else { "pre" }.into(),
                        found: name,
                    });
                }
            }
        }
        Ok(Block::new(
            BlockKind::CodeBlock(language),
            vec![Inline::text(text)],
        ))
    }

    fn list(&mut self, list_name: &str, item_kind: BlockKind) -> Result<Vec<Block>, MarkupError> {
        let mut items = Vec::new();
        loop {
            match self.next() {
                None => return Err(MarkupError::Unclosed(list_name.into())),
                Some(Token::Text(t)) if t.trim().is_empty() => {}
                Some(Token::Close(name)) if name == list_name => return Ok(items),
                Some(Token::Open {
                    name,
                    attrs,
                    self_closing,
                }) if name == "li" => {
                    let kind = match item_kind {
                        BlockKind::TaskItem { .. } => BlockKind::TaskItem {
                            checked: attr(&attrs, "data-checked") == Some("true"),
                        },
                        ref other => other.clone(),
                    };
                    let mut inner = if self_closing {
                        Vec::new()
                    } else {
                        self.blocks(Some("li"))?
                    };
                    match inner.first_mut() {
                        Some(first) if first.kind == BlockKind::Paragraph => first.kind = kind,
                        _ => inner.insert(0, Block::new(kind, Vec::new())),
                    }
                    items.extend(inner);
                }
                Some(Token::Text(_)) => return Err(MarkupError::Misplaced("#text".into())),
                Some(Token::Open { name, .. }) => return Err(MarkupError::Misplaced(name)),
                Some(Token::Close(found)) => {
                    return Err(MarkupError::Mismatched {
                        expected: list_name.into(),
                        found,
                    });
                }
            }
        }
    }

    /// Bare inline content at block level, up to the next block element or close tag.
    fn inline_run(&mut self) -> Result<Vec<Inline>, MarkupError> {
        let mut out = Vec::new();
        let marks = Marks::default();
        while let Some(token) = self.peek() {
            match token {
                Token::Text(_) => {
                    if let Some(Token::Text(text)) = self.next() {
                        out.push(Inline::marked(text, marks.clone()));
                    }
                }
                Token::Open { name, .. } if !is_block_element(name) => {
                    if let Some(Token::Open {
                        name,
                        attrs,
                        self_closing,
                    }) = self.next()
                    {
                        self.inline_element(name, &attrs, self_closing, &marks, &mut out)?;
                    }
                }
                _ => break,
            }
        }
        Ok(out)
    }

    /// Inline content up to `</close>`.
    fn inlines(&mut self, close: &str, marks: &Marks) -> Result<Vec<Inline>, MarkupError> {
        let mut out = Vec::new();
        loop {
            match self.next() {
                None => return Err(MarkupError::Unclosed(close.into())),
                Some(Token::Text(text)) => out.push(Inline::marked(text, marks.clone())),
                Some(Token::Close(name)) if name == close => return Ok(out),
                Some(Token::Close(found)) => {
                    return Err(MarkupError::Mismatched {
                        expected: close.into(),
                        found,
                    });
                }
                Some(Token::Open {
                    name,
                    attrs,
                    self_closing,
                }) => self.inline_element(name, &attrs, self_closing, marks, &mut out)?,
            }
        }
    }

    fn inline_element(
        &mut self,
        name: SmolStr,
        attrs: &[(SmolStr, String)],
        self_closing: bool,
        marks: &Marks,
        out: &mut Vec<Inline>,
    ) -> Result<(), MarkupError> {
        let mut inner = marks.clone();
        match name.as_str() {
            "br" => {
                out.push(Inline::HardBreak);
                return Ok(());
            }
            "strong" | "b" => inner.bold = true,
            "em" | "i" => inner.italic = true,
            "u" => inner.underline = true,
            "s" | "del" | "strike" => inner.strike = true,
            "code" => inner.code = true,
            "a" => inner.link = Some(attr(attrs, "href").unwrap_or_default().to_string()),
            "span" => {
                if let Some(id) = attr(attrs, "data-id") {
                    let text = if self_closing {
                        Vec::new()
                    } else {
                        self.inlines(&name, marks)?
                    };
                    let label = attr(attrs, "data-label")
                        .map(str::to_string)
                        .unwrap_or_else(|| {
                            let text: String = text.iter().map(Inline::plain_text).collect();
                            text.trim_start_matches('@').to_string()
                        });
                    out.push(Inline::Mention {
                        id: id.into(),
                        label,
                    });
                    return Ok(());
                }
            }
            other if is_block_element(other) => return Err(MarkupError::Misplaced(name)),
            _ => return Err(MarkupError::UnknownElement(name)),
        }
        if !self_closing {
            out.extend(self.inlines(&name, &inner)?);
        }
        Ok(())
    }
}

fn parse_px(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.ends_with('%') || value == "auto" {
        return None;
    }
    value.trim_end_matches("px").parse::<f64>().ok()
}

fn image_attrs(attrs: &[(SmolStr, String)]) -> ImageAttrs {
    ImageAttrs {
        src: attr(attrs, "src").filter(|s| !s.is_empty()).map(str::to_string),
        id: attr(attrs, "data-id")
            .or_else(|| attr(attrs, "id"))
            .filter(|s| !s.is_empty())
            .map(SmolStr::new),
        width: attr(attrs, "width").and_then(parse_px),
        height: attr(attrs, "height").and_then(parse_px),
        aspect_ratio: attr(attrs, "data-aspect-ratio")
            .or_else(|| attr(attrs, "aspectratio"))
            .and_then(|v| v.parse().ok()),
    }
}

// === Renderer ===

/// Render a document as canonical markup.
pub fn render_html(doc: &Document) -> String {
    render_blocks(doc.blocks())
}

/// Render a run of blocks, grouping adjacent list items into lists.
pub fn render_blocks(blocks: &[Block]) -> String {
    let mut out = String::new();
    let mut open_list: Option<&'static str> = None;

    for block in blocks {
        let list = match block.kind {
            BlockKind::BulletItem => Some("ul"),
            BlockKind::OrderedItem => Some("ol"),
            BlockKind::TaskItem { .. } => Some("ul data-type=\"taskList\""),
            _ => None,
        };
        if open_list != list {
            if let Some(prev) = open_list {
                close_list(&mut out, prev);
            }
            if let Some(next) = list {
                out.push('<');
                out.push_str(next);
                out.push('>');
            }
            open_list = list;
        }
        render_block(&mut out, block);
    }
    if let Some(prev) = open_list {
        close_list(&mut out, prev);
    }
    out
}

fn close_list(out: &mut String, open: &str) {
    let name = open.split_whitespace().next().unwrap_or(open);
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn render_block(out: &mut String, block: &Block) {
    match &block.kind {
        BlockKind::Paragraph => wrap(out, "p", &block.content),
        BlockKind::Heading(level) => wrap(out, &format!("h{level}"), &block.content),
        BlockKind::Blockquote => {
            out.push_str("<blockquote>");
            wrap(out, "p", &block.content);
            out.push_str("</blockquote>");
        }
        BlockKind::CodeBlock(language) => {
            out.push_str("<pre>");
            match language {
                Some(lang) => {
                    out.push_str("<code class=\"language-");
                    push_escaped_attr(out, lang);
                    out.push_str("\">");
                }
                None => out.push_str("<code>"),
            }
            push_escaped(out, &block.plain_text());
            out.push_str("</code></pre>");
        }
        BlockKind::BulletItem | BlockKind::OrderedItem => {
            out.push_str("<li>");
            wrap(out, "p", &block.content);
            out.push_str("</li>");
        }
        BlockKind::TaskItem { checked } => {
            out.push_str("<li data-type=\"taskItem\" data-checked=\"");
            out.push_str(if *checked { "true" } else { "false" });
            out.push_str("\">");
            wrap(out, "p", &block.content);
            out.push_str("</li>");
        }
        BlockKind::HorizontalRule => out.push_str("<hr>"),
        BlockKind::Image(attrs) => render_image(out, attrs),
    }
}

fn render_image(out: &mut String, attrs: &ImageAttrs) {
    out.push_str("<img");
    let mut push_attr = |name: &str, value: &str| {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        push_escaped_attr(out, value);
        out.push('"');
    };
    if let Some(src) = &attrs.src {
        push_attr("src", src);
    }
    if let Some(id) = &attrs.id {
        push_attr("data-id", id);
    }
    if let Some(width) = attrs.width {
        push_attr("width", &format!("{width}px"));
    }
    if let Some(height) = attrs.height {
        push_attr("height", &format!("{height}px"));
    }
    if let Some(ratio) = attrs.aspect_ratio {
        push_attr("data-aspect-ratio", &ratio.to_string());
    }
    out.push('>');
}

fn wrap(out: &mut String, tag: &str, content: &[Inline]) {
    out.push('<');
    out.push_str(tag);
    out.push('>');
    render_inlines(out, content);
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

/// Render inline content. Each text run carries its own mark tags.
pub fn render_inlines(out: &mut String, content: &[Inline]) {
    for inline in content {
        match inline {
            Inline::Text { text, marks } => {
                let mut closers: Vec<&str> = Vec::new();
                if let Some(href) = &marks.link {
                    out.push_str("<a href=\"");
                    push_escaped_attr(out, href);
                    out.push_str("\">");
                    closers.push("</a>");
                }
                for (on, open, close) in [
                    (marks.bold, "<strong>", "</strong>"),
                    (marks.italic, "<em>", "</em>"),
                    (marks.underline, "<u>", "</u>"),
                    (marks.strike, "<s>", "</s>"),
                    (marks.code, "<code>", "</code>"),
                ] {
                    if on {
                        out.push_str(open);
                        closers.push(close);
                    }
                }
                push_escaped(out, text);
                for close in closers.iter().rev() {
                    out.push_str(close);
                }
            }
            Inline::HardBreak => out.push_str("<br>"),
            Inline::Mention { id, label } => {
                out.push_str("<span data-type=\"mention\" data-id=\"");
                push_escaped_attr(out, id);
                out.push_str("\" data-label=\"");
                push_escaped_attr(out, label);
                out.push_str("\">@");
                push_escaped(out, label);
                out.push_str("</span>");
            }
        }
    }
}

// Writing into a String cannot fail.
fn push_escaped(out: &mut String, text: &str) {
    let _ = escape_html_body_text(out, text);
}

fn push_escaped_attr(out: &mut String, text: &str) {
    let _ = escape_html(out, text);
}
