//! Splits assistant text into ordered prose and chart segments.
//!
//! `decode` is total: it never fails and never drops text. A fenced chart
//! block whose payload does not validate stays in the surrounding text
//! verbatim, so it renders as plain text instead of disappearing.

use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::ChartDirective;

pub const CHART_FENCE_TAG: &str = "chart";

static CHART_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```chart[ \t]*\r?\n(.*?)```").expect("Invalid chart block regex")
});

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Segment {
    Text(String),
    /// Index into [`DecodedMessage::directives`].
    Directive(usize),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedMessage {
    pub segments: Vec<Segment>,
    pub directives: Vec<ChartDirective>,
}

impl DecodedMessage {
    pub fn directive(&self, index: usize) -> Option<&ChartDirective> {
        self.directives.get(index)
    }

    pub fn has_directives(&self) -> bool {
        !self.directives.is_empty()
    }

    /// Concatenation of the text segments.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Text(t) => Some(t.as_str()),
                Segment::Directive(_) => None,
            })
            .collect()
    }
}

fn flush(pending: &mut String, segments: &mut Vec<Segment>) {
    if !pending.is_empty() {
        segments.push(Segment::Text(std::mem::take(pending)));
    }
}

pub fn decode(content: &str) -> DecodedMessage {
    let mut decoded = DecodedMessage::default();
    let mut pending = String::new();
    let mut cursor = 0;

    for caps in CHART_BLOCK.captures_iter(content) {
        let Some(block) = caps.get(0) else {
            continue;
        };
        let body = caps.get(1).map_or("", |m| m.as_str());

        match ChartDirective::from_json(body.trim()) {
            Ok(directive) => {
                pending.push_str(&content[cursor..block.start()]);
                flush(&mut pending, &mut decoded.segments);
                decoded.segments.push(Segment::Directive(decoded.directives.len()));
                decoded.directives.push(directive);
            }
            Err(e) => {
                warn!("Keeping chart block as text: {}", e);
                pending.push_str(&content[cursor..block.end()]);
            }
        }
        cursor = block.end();
    }

    pending.push_str(&content[cursor..]);
    flush(&mut pending, &mut decoded.segments);
    decoded
}

/// Renders a directive as the fenced block an agent is expected to emit.
pub fn encode(directive: &ChartDirective) -> Result<String, serde_json::Error> {
    let body = serde_json::to_string(directive)?;
    Ok(format!("```{}\n{}\n```", CHART_FENCE_TAG, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::ChartKind;

    const BAR: &str = r#"{"type":"bar","labels":["Jan","Feb"],"datasets":[{"label":"R$","data":[100,200]}]}"#;
    const SHORT: &str = r#"{"type":"bar","labels":["Jan","Feb"],"datasets":[{"label":"R$","data":[100]}]}"#;

    fn fenced(body: &str) -> String {
        format!("```chart\n{}\n```", body)
    }

    #[test]
    fn prose_chart_prose_splits_into_three_segments() {
        let input = format!("Vendas:\n{}\nFim.", fenced(BAR));
        let decoded = decode(&input);

        assert_eq!(
            decoded.segments,
            vec![
                Segment::Text("Vendas:\n".into()),
                Segment::Directive(0),
                Segment::Text("\nFim.".into())
            ]
        );
        let chart = decoded.directive(0).unwrap();
        assert_eq!(chart.kind, ChartKind::Bar);
        assert_eq!(chart.labels.len(), 2);
        assert_eq!(chart.datasets[0].data, vec![100.0, 200.0]);
    }

    #[test]
    fn length_mismatch_degrades_to_verbatim_text() {
        let input = format!("Vendas:\n{}\nFim.", fenced(SHORT));
        let decoded = decode(&input);
        assert_eq!(decoded.segments, vec![Segment::Text(input.clone())]);
        assert!(!decoded.has_directives());
    }

    #[test]
    fn plain_text_is_a_single_segment() {
        let decoded = decode("Nenhum gráfico aqui.");
        assert_eq!(decoded.segments, vec![Segment::Text("Nenhum gráfico aqui.".into())]);
        assert!(decode("").segments.is_empty());
    }

    #[test]
    fn multiple_charts_keep_their_order() {
        let pie = r#"{"type":"pie","labels":["A","B"],"datasets":[{"label":"x","data":[1,2]}]}"#;
        let input = format!("{}\nentre\n{}", fenced(BAR), fenced(pie));
        let decoded = decode(&input);
        assert_eq!(
            decoded.segments,
            vec![Segment::Directive(0), Segment::Text("\nentre\n".into()), Segment::Directive(1)]
        );
        assert_eq!(decoded.directives[0].kind, ChartKind::Bar);
        assert_eq!(decoded.directives[1].kind, ChartKind::Pie);
    }

    #[test]
    fn valid_and_invalid_blocks_mix() {
        let input = format!("a{}b{}c", fenced(SHORT), fenced(BAR));
        let decoded = decode(&input);
        assert_eq!(decoded.directives.len(), 1);
        assert_eq!(decoded.text(), format!("a{}bc", fenced(SHORT)));
        assert_eq!(decoded.segments.len(), 3);
    }

    #[test]
    fn adversarial_inputs_never_lose_text() {
        let cases = [
            "```chart\n{\"type\":\"bar\"".to_string(),
            "```chart\n```".to_string(),
            "```chart\nnot json at all\n```".to_string(),
            "```chart{}```".to_string(),
            "```json\n{\"type\":\"bar\"}\n```".to_string(),
            "%%CHART_0%% literal placeholder".to_string(),
            "```chart\n```chart\n```".to_string(),
            "````chart\n\u{1F4CA}\n````".to_string(),
        ];
        for input in cases {
            let decoded = decode(&input);
            assert_eq!(decoded.text(), input, "text lost for {:?}", input);
            assert!(!decoded.has_directives());
        }
    }

    #[test]
    fn removed_text_is_exactly_the_valid_blocks() {
        let block = fenced(BAR);
        let input = format!("início {} meio {} fim", block, block);
        let decoded = decode(&input);
        assert_eq!(decoded.text(), input.replace(&block, ""));
        assert_eq!(decoded.directives.len(), 2);
    }

    #[test]
    fn crlf_fence_is_accepted() {
        let input = format!("x\r\n```chart\r\n{}\r\n```", BAR);
        let decoded = decode(&input);
        assert_eq!(decoded.directives.len(), 1);
        assert_eq!(decoded.text(), "x\r\n");
    }

    #[test]
    fn encoded_block_decodes_back() {
        let directive = ChartDirective::from_json(BAR).unwrap();
        let block = encode(&directive).unwrap();
        let decoded = decode(&block);
        assert_eq!(decoded.segments, vec![Segment::Directive(0)]);
        assert_eq!(decoded.directives[0], directive);
    }
}
