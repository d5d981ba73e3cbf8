//! Presentation pipeline: message text in, ordered display blocks out.

pub mod chart;
pub mod markdown;

use serde::Serialize;

use crate::chart::codec::{ self, Segment };
use self::chart::ChartWidget;
use self::markdown::{ Block, StyleKind };

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RenderedBlock {
    Text {
        blocks: Vec<Block>,
    },
    Chart(ChartWidget),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderedMessage {
    pub blocks: Vec<RenderedBlock>,
}

impl RenderedMessage {
    pub fn charts(&self) -> impl Iterator<Item = &ChartWidget> {
        self.blocks.iter().filter_map(|b| match b {
            RenderedBlock::Chart(widget) => Some(widget),
            RenderedBlock::Text { .. } => None,
        })
    }

    /// HTML fragment with inline styles; each chart becomes a `<canvas>`
    /// carrying its configuration in `data-chart`.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            match block {
                RenderedBlock::Text { blocks } => {
                    for b in blocks {
                        b.write_html(&mut out);
                    }
                }
                RenderedBlock::Chart(widget) => {
                    let frame = StyleKind::ChartFrame.style();
                    out.push_str(
                        &format!(
                            "<{} style=\"{}; height: {}px\"><canvas data-chart=\"{}\"></canvas></{}>",
                            frame.tag,
                            frame.css,
                            widget.height,
                            escape_html(&widget.config.to_string()),
                            frame.tag
                        )
                    );
                }
            }
        }
        out
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Decodes `content` and renders its segments in order. Whitespace-only
/// text between charts produces no block.
pub fn render_message(content: &str) -> RenderedMessage {
    let decoded = codec::decode(content);
    let blocks = decoded.segments
        .iter()
        .filter_map(|segment| match segment {
            Segment::Text(text) if text.trim().is_empty() => None,
            Segment::Text(text) => Some(RenderedBlock::Text { blocks: markdown::parse_blocks(text) }),
            Segment::Directive(index) =>
                decoded.directive(*index).map(|d| RenderedBlock::Chart(ChartWidget::new(d.clone()))),
        })
        .collect();
    RenderedMessage { blocks }
}
