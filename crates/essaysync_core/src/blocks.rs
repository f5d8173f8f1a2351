use comrak::nodes::{AstNode, ListType, NodeValue};
use comrak::{Arena, Options, parse_document};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::warn;

/// Notion rejects rich-text objects whose content exceeds this many characters.
pub const RICH_TEXT_LIMIT: usize = 2000;

/// Notion caps every array in a block payload (rich text, children, table rows).
pub const MAX_ARRAY_ITEMS: usize = 100;

const NOTION_LANGUAGES: &[&str] = &[
    "bash",
    "c",
    "c#",
    "c++",
    "css",
    "diff",
    "docker",
    "elixir",
    "go",
    "graphql",
    "haskell",
    "html",
    "java",
    "javascript",
    "json",
    "kotlin",
    "latex",
    "lua",
    "makefile",
    "markdown",
    "mermaid",
    "php",
    "plain text",
    "powershell",
    "python",
    "r",
    "ruby",
    "rust",
    "scala",
    "shell",
    "sql",
    "swift",
    "typescript",
    "xml",
    "yaml",
];

/// One structured content unit sent to Notion as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Block(Value);

impl Block {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn block_type(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

pub fn markdown_to_blocks(markdown: &str) -> Vec<Block> {
    let arena = Arena::new();
    let mut options = Options::default();
    options.extension.strikethrough = true;
    options.extension.table = true;
    options.extension.autolink = true;
    options.extension.tasklist = true;

    let root = parse_document(&arena, markdown, &options);
    let mut blocks = Vec::new();
    for child in root.children() {
        convert_block(child, &mut blocks);
    }
    blocks
}

fn convert_block<'a>(node: &'a AstNode<'a>, out: &mut Vec<Block>) {
    let value = node.data.borrow().value.clone();
    match value {
        NodeValue::Paragraph => {
            if let Some(url) = standalone_image_url(node) {
                out.push(block("image", json!({ "type": "external", "external": { "url": url } })));
                return;
            }
            let rich_text = inline_rich_text(node);
            if !rich_text.is_empty() {
                out.extend(text_blocks("paragraph", rich_text, Vec::new(), Map::new()));
            }
        }
        NodeValue::Heading(heading) => {
            let kind = match heading.level {
                1 => "heading_1",
                2 => "heading_2",
                _ => "heading_3",
            };
            out.extend(text_blocks(kind, inline_rich_text(node), Vec::new(), Map::new()));
        }
        NodeValue::List(list) => {
            for item in node.children() {
                out.extend(list_item_blocks(item, list.list_type));
            }
        }
        NodeValue::BlockQuote => {
            let mut segments = Vec::new();
            let mut children = Vec::new();
            for child in node.children() {
                if matches!(child.data.borrow().value, NodeValue::Paragraph) {
                    if !segments.is_empty() {
                        push_segment(&mut segments, "\n", Marks::default(), None);
                    }
                    collect_inline(child, Marks::default(), None, &mut segments);
                } else {
                    convert_block(child, &mut children);
                }
            }
            out.extend(text_blocks("quote", render_segments(&segments), children, Map::new()));
        }
        NodeValue::CodeBlock(code) => {
            let mut segments = Vec::new();
            push_segment(
                &mut segments,
                code.literal.trim_end_matches('\n'),
                Marks::default(),
                None,
            );
            let mut fields = Map::new();
            fields.insert(
                "language".to_string(),
                Value::String(normalize_language(&code.info).to_string()),
            );
            out.extend(text_blocks("code", render_segments(&segments), Vec::new(), fields));
        }
        NodeValue::ThematicBreak => out.push(block("divider", json!({}))),
        NodeValue::Table(_) => out.push(table_block(node)),
        // raw HTML, including marker comments, has no block equivalent
        _ => {}
    }
}

fn list_item_blocks<'a>(item: &'a AstNode<'a>, list_type: ListType) -> Vec<Block> {
    let checked = match &item.data.borrow().value {
        NodeValue::TaskItem(task) => Some(task.symbol.is_some()),
        _ => None,
    };

    let mut segments = Vec::new();
    let mut children = Vec::new();
    let mut seen_paragraph = false;
    for child in item.children() {
        if !seen_paragraph && matches!(child.data.borrow().value, NodeValue::Paragraph) {
            collect_inline(child, Marks::default(), None, &mut segments);
            seen_paragraph = true;
        } else {
            convert_block(child, &mut children);
        }
    }
    let rich_text = render_segments(&segments);

    if let Some(checked) = checked {
        let mut fields = Map::new();
        fields.insert("checked".to_string(), Value::Bool(checked));
        return text_blocks("to_do", rich_text, children, fields);
    }

    let kind = match list_type {
        ListType::Ordered => "numbered_list_item",
        _ => "bulleted_list_item",
    };
    text_blocks(kind, rich_text, children, Map::new())
}

fn table_block<'a>(node: &'a AstNode<'a>) -> Block {
    let mut rows: Vec<Vec<Value>> = Vec::new();
    for row in node.children() {
        let mut cells = Vec::new();
        for cell in row.children() {
            let rich_text = truncate_items(inline_rich_text(cell), "table_row", "cells");
            cells.push(Value::Array(rich_text));
        }
        rows.push(cells);
    }
    let rows = truncate_items(rows, "table", "children");
    let width = rows.iter().map(Vec::len).max().unwrap_or(0).max(1);
    let children: Vec<Value> = rows
        .into_iter()
        .map(|mut cells| {
            cells.resize(width, Value::Array(Vec::new()));
            json!({
                "object": "block",
                "type": "table_row",
                "table_row": { "cells": cells },
            })
        })
        .collect();

    block(
        "table",
        json!({
            "table_width": width,
            "has_column_header": true,
            "has_row_header": false,
            "children": children,
        }),
    )
}

fn standalone_image_url<'a>(paragraph: &'a AstNode<'a>) -> Option<String> {
    let mut children = paragraph.children();
    let first = children.next()?;
    if children.next().is_some() {
        return None;
    }
    match &first.data.borrow().value {
        NodeValue::Image(link) if is_external_url(&link.url) => Some(link.url.clone()),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Marks {
    bold: bool,
    italic: bool,
    strikethrough: bool,
    code: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    content: String,
    marks: Marks,
    link: Option<String>,
}

fn inline_rich_text<'a>(node: &'a AstNode<'a>) -> Vec<Value> {
    let mut segments = Vec::new();
    collect_inline(node, Marks::default(), None, &mut segments);
    render_segments(&segments)
}

fn collect_inline<'a>(
    node: &'a AstNode<'a>,
    marks: Marks,
    link: Option<&str>,
    out: &mut Vec<Segment>,
) {
    for child in node.children() {
        let value = child.data.borrow().value.clone();
        match value {
            NodeValue::Text(text) => push_segment(out, &text, marks, link),
            NodeValue::Code(code) => push_segment(
                out,
                &code.literal,
                Marks {
                    code: true,
                    ..marks
                },
                link,
            ),
            NodeValue::Emph => collect_inline(
                child,
                Marks {
                    italic: true,
                    ..marks
                },
                link,
                out,
            ),
            NodeValue::Strong => collect_inline(
                child,
                Marks {
                    bold: true,
                    ..marks
                },
                link,
                out,
            ),
            NodeValue::Strikethrough => collect_inline(
                child,
                Marks {
                    strikethrough: true,
                    ..marks
                },
                link,
                out,
            ),
            NodeValue::Link(target) | NodeValue::Image(target) => {
                let url = Some(target.url.as_str()).filter(|url| is_external_url(url));
                collect_inline(child, marks, url.or(link), out);
            }
            NodeValue::SoftBreak => push_segment(out, " ", marks, link),
            NodeValue::LineBreak => push_segment(out, "\n", marks, link),
            NodeValue::HtmlInline(_) => {}
            _ => collect_inline(child, marks, link, out),
        }
    }
}

fn push_segment(out: &mut Vec<Segment>, text: &str, marks: Marks, link: Option<&str>) {
    if text.is_empty() {
        return;
    }
    if let Some(last) = out.last_mut()
        && last.marks == marks
        && last.link.as_deref() == link
    {
        last.content.push_str(text);
        return;
    }
    out.push(Segment {
        content: text.to_string(),
        marks,
        link: link.map(ToString::to_string),
    });
}

fn render_segments(segments: &[Segment]) -> Vec<Value> {
    let mut out = Vec::new();
    for segment in segments {
        for piece in split_at_char_limit(&segment.content, RICH_TEXT_LIMIT) {
            let link = segment
                .link
                .as_ref()
                .map(|url| json!({ "url": url }))
                .unwrap_or(Value::Null);
            out.push(json!({
                "type": "text",
                "text": { "content": piece, "link": link },
                "annotations": {
                    "bold": segment.marks.bold,
                    "italic": segment.marks.italic,
                    "strikethrough": segment.marks.strikethrough,
                    "underline": false,
                    "code": segment.marks.code,
                    "color": "default",
                },
            }));
        }
    }
    out
}

fn split_at_char_limit(text: &str, limit: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (index, _) in text.char_indices() {
        if count == limit {
            pieces.push(&text[start..index]);
            start = index;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn normalize_language(info: &str) -> &'static str {
    let tag = info
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    let canonical = match tag.as_str() {
        "rs" => "rust",
        "js" | "jsx" | "mjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "py" => "python",
        "rb" => "ruby",
        "sh" | "zsh" | "console" => "shell",
        "yml" => "yaml",
        "md" => "markdown",
        "cpp" | "cc" => "c++",
        "cs" | "csharp" => "c#",
        "golang" => "go",
        "dockerfile" => "docker",
        "ps1" => "powershell",
        "kt" => "kotlin",
        "tex" => "latex",
        "text" | "txt" | "" => "plain text",
        other => other,
    };
    NOTION_LANGUAGES
        .iter()
        .copied()
        .find(|language| *language == canonical)
        .unwrap_or("plain text")
}

fn is_external_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://") || url.starts_with("mailto:")
}

fn block(kind: &str, body: Value) -> Block {
    let mut object = Map::new();
    object.insert("object".to_string(), Value::String("block".to_string()));
    object.insert("type".to_string(), Value::String(kind.to_string()));
    object.insert(kind.to_string(), body);
    Block(Value::Object(object))
}

/// Build `kind` blocks whose `rich_text` is spread over as many consecutive
/// blocks as the array limit needs. `fields` go on every block, children on
/// the last.
fn text_blocks(
    kind: &str,
    rich_text: Vec<Value>,
    children: Vec<Block>,
    fields: Map<String, Value>,
) -> Vec<Block> {
    let mut chunks: Vec<Vec<Value>> = rich_text
        .chunks(MAX_ARRAY_ITEMS)
        .map(<[Value]>::to_vec)
        .collect();
    if chunks.is_empty() {
        chunks.push(Vec::new());
    }
    let last = chunks.len() - 1;
    let mut children = Some(truncate_items(children, kind, "children"));

    chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            let mut body = fields.clone();
            body.insert("rich_text".to_string(), Value::Array(chunk));
            if index == last
                && let Some(children) = children.take()
                && !children.is_empty()
            {
                body.insert("children".to_string(), blocks_to_value(children));
            }
            block(kind, Value::Object(body))
        })
        .collect()
}

fn truncate_items<T>(mut items: Vec<T>, kind: &str, field: &str) -> Vec<T> {
    if items.len() > MAX_ARRAY_ITEMS {
        warn!(
            kind,
            field,
            dropped = items.len() - MAX_ARRAY_ITEMS,
            "truncating to Notion's array limit"
        );
        items.truncate(MAX_ARRAY_ITEMS);
    }
    items
}

fn blocks_to_value(blocks: Vec<Block>) -> Value {
    Value::Array(blocks.into_iter().map(Block::into_value).collect())
}
