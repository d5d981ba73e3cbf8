//! Rich-text blocks for the prose parts of a message.
//!
//! The block grammar is the subset assistants actually produce: headings,
//! paragraphs, lists, quotes, rules, fenced code and pipe tables. Every kind
//! maps to one fixed entry in [`StyleKind::style`].

use serde::Serialize;

use super::escape_html;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleKind {
    Paragraph,
    Strong,
    Emphasis,
    Code,
    CodeBlock,
    BulletList,
    OrderedList,
    ListItem,
    Heading1,
    Heading2,
    Heading3,
    Rule,
    Blockquote,
    TableWrapper,
    Table,
    TableHead,
    TableBody,
    TableRow,
    TableHeader,
    TableCell,
    ChartFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Style {
    pub tag: &'static str,
    pub css: &'static str,
}

impl StyleKind {
    pub const ALL: [StyleKind; 21] = [
        StyleKind::Paragraph,
        StyleKind::Strong,
        StyleKind::Emphasis,
        StyleKind::Code,
        StyleKind::CodeBlock,
        StyleKind::BulletList,
        StyleKind::OrderedList,
        StyleKind::ListItem,
        StyleKind::Heading1,
        StyleKind::Heading2,
        StyleKind::Heading3,
        StyleKind::Rule,
        StyleKind::Blockquote,
        StyleKind::TableWrapper,
        StyleKind::Table,
        StyleKind::TableHead,
        StyleKind::TableBody,
        StyleKind::TableRow,
        StyleKind::TableHeader,
        StyleKind::TableCell,
        StyleKind::ChartFrame,
    ];

    pub fn style(self) -> Style {
        let (tag, css) = match self {
            StyleKind::Paragraph => ("p", "margin: 0 0 12px 0"),
            StyleKind::Strong => ("strong", "color: var(--accent-hover); font-weight: 600"),
            StyleKind::Emphasis => ("em", "font-style: italic"),
            StyleKind::Code =>
                (
                    "code",
                    "background: var(--bg-tertiary); padding: 2px 6px; border-radius: 4px; font-size: 13px; font-family: var(--font-mono); color: var(--success)",
                ),
            StyleKind::CodeBlock =>
                (
                    "pre",
                    "background: var(--bg-tertiary); padding: 16px; border-radius: 8px; overflow: auto; margin: 12px 0; font-size: 13px; font-family: var(--font-mono); border: 1px solid var(--border)",
                ),
            StyleKind::BulletList => ("ul", "margin: 8px 0; padding-left: 20px; list-style: disc"),
            StyleKind::OrderedList => ("ol", "margin: 8px 0; padding-left: 20px"),
            StyleKind::ListItem => ("li", "margin-bottom: 4px"),
            StyleKind::Heading1 =>
                (
                    "h1",
                    "font-size: 20px; font-weight: 700; color: var(--text-primary); margin: 16px 0 8px 0; border-bottom: 1px solid var(--border); padding-bottom: 8px",
                ),
            StyleKind::Heading2 =>
                ("h2", "font-size: 17px; font-weight: 600; color: var(--text-primary); margin: 14px 0 6px 0"),
            StyleKind::Heading3 =>
                ("h3", "font-size: 15px; font-weight: 600; color: var(--accent); margin: 12px 0 4px 0"),
            StyleKind::Rule => ("hr", "border: none; border-top: 1px solid var(--border); margin: 16px 0"),
            StyleKind::Blockquote =>
                (
                    "blockquote",
                    "border-left: 3px solid var(--accent); padding-left: 16px; margin: 12px 0; color: var(--text-secondary); font-style: italic",
                ),
            StyleKind::TableWrapper =>
                ("div", "overflow-x: auto; margin: 12px 0; border-radius: 8px; border: 1px solid var(--border)"),
            StyleKind::Table =>
                ("table", "width: 100%; border-collapse: collapse; font-size: 13px; min-width: 400px"),
            StyleKind::TableHead =>
                ("thead", "background: var(--bg-tertiary); border-bottom: 2px solid var(--accent)"),
            StyleKind::TableBody => ("tbody", ""),
            StyleKind::TableRow => ("tr", "border-bottom: 1px solid var(--border)"),
            StyleKind::TableHeader =>
                (
                    "th",
                    "padding: 10px 14px; text-align: left; font-weight: 600; color: var(--accent); font-size: 12px; text-transform: uppercase; letter-spacing: 0.5px; white-space: nowrap",
                ),
            StyleKind::TableCell => ("td", "padding: 9px 14px; color: var(--text-primary); white-space: nowrap"),
            StyleKind::ChartFrame =>
                (
                    "div",
                    "background: var(--bg-tertiary); border-radius: 12px; border: 1px solid var(--border); padding: 20px; margin: 12px 0; position: relative",
                ),
        };
        Style { tag, css }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "text", rename_all = "snake_case")]
pub enum Inline {
    Text(String),
    Strong(String),
    Emphasis(String),
    Code(String),
}

pub type InlineRun = Vec<Inline>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Heading {
        level: u8,
        content: InlineRun,
    },
    Paragraph {
        content: InlineRun,
    },
    BulletList {
        items: Vec<InlineRun>,
    },
    OrderedList {
        items: Vec<InlineRun>,
    },
    Blockquote {
        content: InlineRun,
    },
    Rule,
    CodeBlock {
        language: Option<String>,
        code: String,
    },
    Table {
        header: Vec<InlineRun>,
        rows: Vec<Vec<InlineRun>>,
    },
}

impl Block {
    pub fn style_kind(&self) -> StyleKind {
        match self {
            Block::Heading { level: 1, .. } => StyleKind::Heading1,
            Block::Heading { level: 2, .. } => StyleKind::Heading2,
            Block::Heading { .. } => StyleKind::Heading3,
            Block::Paragraph { .. } => StyleKind::Paragraph,
            Block::BulletList { .. } => StyleKind::BulletList,
            Block::OrderedList { .. } => StyleKind::OrderedList,
            Block::Blockquote { .. } => StyleKind::Blockquote,
            Block::Rule => StyleKind::Rule,
            Block::CodeBlock { .. } => StyleKind::CodeBlock,
            Block::Table { .. } => StyleKind::TableWrapper,
        }
    }

    pub fn write_html(&self, out: &mut String) {
        match self {
            Block::Heading { content, .. } | Block::Paragraph { content } | Block::Blockquote { content } => {
                write_element(out, self.style_kind(), |out| write_inlines(out, content));
            }
            Block::BulletList { items } | Block::OrderedList { items } => {
                write_element(out, self.style_kind(), |out| {
                    for item in items {
                        write_element(out, StyleKind::ListItem, |out| write_inlines(out, item));
                    }
                });
            }
            Block::Rule => {
                let style = StyleKind::Rule.style();
                out.push_str(&format!("<{} style=\"{}\">", style.tag, style.css));
            }
            Block::CodeBlock { code, .. } => {
                write_element(out, StyleKind::CodeBlock, |out| {
                    out.push_str("<code>");
                    out.push_str(&escape_html(code));
                    out.push_str("</code>");
                });
            }
            Block::Table { header, rows } => {
                write_element(out, StyleKind::TableWrapper, |out| {
                    write_element(out, StyleKind::Table, |out| {
                        write_element(out, StyleKind::TableHead, |out| {
                            write_row(out, StyleKind::TableHeader, header);
                        });
                        write_element(out, StyleKind::TableBody, |out| {
                            for row in rows {
                                write_row(out, StyleKind::TableCell, row);
                            }
                        });
                    });
                });
            }
        }
    }
}

pub(super) fn write_element(out: &mut String, kind: StyleKind, body: impl FnOnce(&mut String)) {
    let style = kind.style();
    if style.css.is_empty() {
        out.push_str(&format!("<{}>", style.tag));
    } else {
        out.push_str(&format!("<{} style=\"{}\">", style.tag, style.css));
    }
    body(out);
    out.push_str(&format!("</{}>", style.tag));
}

fn write_row(out: &mut String, cell: StyleKind, cells: &[InlineRun]) {
    write_element(out, StyleKind::TableRow, |out| {
        for c in cells {
            write_element(out, cell, |out| write_inlines(out, c));
        }
    });
}

fn write_inlines(out: &mut String, run: &[Inline]) {
    for inline in run {
        match inline {
            Inline::Text(t) => out.push_str(&escape_html(t)),
            Inline::Strong(t) => write_element(out, StyleKind::Strong, |out| out.push_str(&escape_html(t))),
            Inline::Emphasis(t) => write_element(out, StyleKind::Emphasis, |out| out.push_str(&escape_html(t))),
            Inline::Code(t) => write_element(out, StyleKind::Code, |out| out.push_str(&escape_html(t))),
        }
    }
}

/// Parse `**strong**`, `*emphasis*` and `` `code` `` spans; unclosed markers stay literal.
pub fn parse_inline(text: &str) -> InlineRun {
    let mut spans = Vec::new();
    let mut current = String::new();
    let mut rest = text;

    while !rest.is_empty() {
        if let Some((inline, consumed)) = delimited(rest) {
            if !current.is_empty() {
                spans.push(Inline::Text(std::mem::take(&mut current)));
            }
            spans.push(inline);
            rest = &rest[consumed..];
            continue;
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            current.push(c);
        }
        rest = chars.as_str();
    }

    if !current.is_empty() {
        spans.push(Inline::Text(current));
    }
    spans
}

/// A closed span at the start of `text`, with the number of bytes it spans.
fn delimited(text: &str) -> Option<(Inline, usize)> {
    let (marker, wrap): (&str, fn(String) -> Inline) = if text.starts_with("**") {
        ("**", Inline::Strong)
    } else if text.starts_with('`') {
        ("`", Inline::Code)
    } else if text.starts_with('*') {
        ("*", Inline::Emphasis)
    } else {
        return None;
    };

    let after = &text[marker.len()..];
    if marker != "`" && after.starts_with(char::is_whitespace) {
        return None;
    }
    let end = after.find(marker)?;
    if end == 0 {
        return None;
    }
    Some((wrap(after[..end].to_string()), marker.len() * 2 + end))
}

fn heading(line: &str) -> Option<Block> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let text = line[hashes..].strip_prefix(' ')?;
    Some(Block::Heading {
        level: hashes.min(3) as u8,
        content: parse_inline(text.trim()),
    })
}

fn is_rule(line: &str) -> bool {
    let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    compact.len() >= 3 &&
        ['-', '*', '_'].iter().any(|m| compact.chars().all(|c| c == *m))
}

fn bullet_item(line: &str) -> Option<&str> {
    ["- ", "* ", "+ "].iter().find_map(|p| line.strip_prefix(p))
}

fn ordered_item(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") "))
}

fn table_cells(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner
        .split('|')
        .map(|c| c.trim().to_string())
        .collect()
}

fn is_table_separator(line: &str) -> bool {
    let cells = table_cells(line);
    !cells.is_empty() &&
        cells
            .iter()
            .all(|c| !c.is_empty() && c.contains('-') && c.chars().all(|ch| matches!(ch, '-' | ':')))
}

fn flush_paragraph(lines: &mut Vec<&str>, blocks: &mut Vec<Block>) {
    if !lines.is_empty() {
        let text = lines.join(" ");
        blocks.push(Block::Paragraph { content: parse_inline(text.trim()) });
        lines.clear();
    }
}

pub fn parse_blocks(text: &str) -> Vec<Block> {
    let lines: Vec<&str> = text.lines().collect();
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i].trim_end();
        let trimmed = line.trim_start();

        if trimmed.is_empty() {
            flush_paragraph(&mut paragraph, &mut blocks);
            i += 1;
            continue;
        }

        if let Some(info) = trimmed.strip_prefix("```") {
            flush_paragraph(&mut paragraph, &mut blocks);
            let language = Some(info.trim().to_string()).filter(|l| !l.is_empty());
            let mut code = Vec::new();
            i += 1;
            while i < lines.len() && !lines[i].trim_start().starts_with("```") {
                code.push(lines[i]);
                i += 1;
            }
            // skip the closing fence, if any
            i += 1;
            blocks.push(Block::CodeBlock { language, code: code.join("\n") });
            continue;
        }

        if let Some(block) = heading(trimmed) {
            flush_paragraph(&mut paragraph, &mut blocks);
            blocks.push(block);
            i += 1;
            continue;
        }

        if is_rule(trimmed) {
            flush_paragraph(&mut paragraph, &mut blocks);
            blocks.push(Block::Rule);
            i += 1;
            continue;
        }

        if trimmed.starts_with('>') {
            flush_paragraph(&mut paragraph, &mut blocks);
            let mut quoted = Vec::new();
            while i < lines.len() {
                let Some(q) = lines[i].trim_start().strip_prefix('>') else {
                    break;
                };
                quoted.push(q.trim());
                i += 1;
            }
            blocks.push(Block::Blockquote { content: parse_inline(quoted.join(" ").trim()) });
            continue;
        }

        if bullet_item(trimmed).is_some() {
            flush_paragraph(&mut paragraph, &mut blocks);
            let mut items = Vec::new();
            while i < lines.len() {
                let Some(item) = bullet_item(lines[i].trim_start()) else {
                    break;
                };
                items.push(parse_inline(item.trim()));
                i += 1;
            }
            blocks.push(Block::BulletList { items });
            continue;
        }

        if ordered_item(trimmed).is_some() {
            flush_paragraph(&mut paragraph, &mut blocks);
            let mut items = Vec::new();
            while i < lines.len() {
                let Some(item) = ordered_item(lines[i].trim_start()) else {
                    break;
                };
                items.push(parse_inline(item.trim()));
                i += 1;
            }
            blocks.push(Block::OrderedList { items });
            continue;
        }

        if trimmed.starts_with('|') && i + 1 < lines.len() && is_table_separator(lines[i + 1]) {
            flush_paragraph(&mut paragraph, &mut blocks);
            let header = table_cells(trimmed)
                .iter()
                .map(|c| parse_inline(c))
                .collect();
            i += 2;
            let mut rows = Vec::new();
            while i < lines.len() && lines[i].trim_start().starts_with('|') {
                rows.push(
                    table_cells(lines[i])
                        .iter()
                        .map(|c| parse_inline(c))
                        .collect()
                );
                i += 1;
            }
            blocks.push(Block::Table { header, rows });
            continue;
        }

        paragraph.push(trimmed);
        i += 1;
    }

    flush_paragraph(&mut paragraph, &mut blocks);
    blocks
}
