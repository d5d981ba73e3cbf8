//! Chart directives embedded in assistant text.
//!
//! A directive is decoded from the JSON body of a fenced ```` ```chart ````
//! block. Decoding is schema-validated: the result is either a fully checked
//! [`ChartDirective`] or a [`DirectiveError`], never a loose JSON value.

pub mod codec;

use serde::{ Deserialize, Serialize };
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChartKind {
    #[serde(rename = "bar")]
    Bar,
    #[serde(rename = "line")]
    Line,
    #[serde(rename = "pie")]
    Pie,
    #[serde(rename = "doughnut")]
    Doughnut,
    #[serde(rename = "horizontalBar")]
    HorizontalBar,
}

impl ChartKind {
    /// Pie and doughnut charts color categories, not series.
    pub fn is_proportional(&self) -> bool {
        matches!(self, ChartKind::Pie | ChartKind::Doughnut)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub label: String,
    pub data: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartOptions {
    #[serde(default)]
    pub currency: bool,
    #[serde(default)]
    pub percentage: bool,
    #[serde(default)]
    pub stacked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_legend: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartDirective {
    #[serde(rename = "type")]
    pub kind: ChartKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub labels: Vec<String>,
    pub datasets: Vec<Dataset>,
    #[serde(default)]
    pub options: ChartOptions,
}

#[derive(Debug, Error)]
pub enum DirectiveError {
    #[error("malformed chart payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("chart has no datasets")]
    NoDatasets,

    #[error("dataset '{label}' has {values} values for {labels} labels")]
    LengthMismatch {
        label: String,
        values: usize,
        labels: usize,
    },
}

impl ChartDirective {
    /// Parses and validates a directive payload.
    pub fn from_json(raw: &str) -> Result<Self, DirectiveError> {
        let directive: ChartDirective = serde_json::from_str(raw)?;
        directive.validate()?;
        Ok(directive)
    }

    fn validate(&self) -> Result<(), DirectiveError> {
        if self.datasets.is_empty() {
            return Err(DirectiveError::NoDatasets);
        }
        let labels = self.labels.len();
        for ds in &self.datasets {
            if ds.data.len() != labels {
                return Err(DirectiveError::LengthMismatch {
                    label: ds.label.clone(),
                    values: ds.data.len(),
                    labels,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_payload_decodes() {
        let raw = r##"{
            "type": "horizontalBar",
            "title": "Receita por canal",
            "labels": ["Loja", "Site"],
            "datasets": [{"label": "2024", "data": [1500.5, 2300], "color": "#000000"}],
            "options": {"currency": true, "stacked": true, "showLegend": false}
        }"##;
        let d = ChartDirective::from_json(raw).unwrap();
        assert_eq!(d.kind, ChartKind::HorizontalBar);
        assert_eq!(d.title.as_deref(), Some("Receita por canal"));
        assert_eq!(d.datasets[0].data, vec![1500.5, 2300.0]);
        assert_eq!(d.datasets[0].color.as_deref(), Some("#000000"));
        assert!(d.options.currency && d.options.stacked && !d.options.percentage);
        assert_eq!(d.options.show_legend, Some(false));
    }

    #[test]
    fn options_are_optional() {
        let d = ChartDirective::from_json(
            r#"{"type":"pie","labels":["A"],"datasets":[{"label":"x","data":[1]}]}"#
        ).unwrap();
        assert_eq!(d.options, ChartOptions::default());
        assert!(d.kind.is_proportional());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = ChartDirective::from_json(
            r#"{"type":"radar","labels":["A"],"datasets":[{"label":"x","data":[1]}]}"#
        ).unwrap_err();
        assert!(matches!(err, DirectiveError::Malformed(_)));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let err = ChartDirective::from_json(
            r#"{"type":"bar","labels":["Jan","Feb"],"datasets":[{"label":"R$","data":[100]}]}"#
        ).unwrap_err();
        match err {
            DirectiveError::LengthMismatch { values, labels, .. } => {
                assert_eq!((values, labels), (1, 2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_datasets_are_rejected() {
        let err = ChartDirective::from_json(r#"{"type":"bar","labels":[],"datasets":[]}"#).unwrap_err();
        assert!(matches!(err, DirectiveError::NoDatasets));
    }

    #[test]
    fn non_numeric_values_are_rejected() {
        assert!(
            ChartDirective::from_json(
                r#"{"type":"line","labels":["A"],"datasets":[{"label":"x","data":["1"]}]}"#
            ).is_err()
        );
    }
}
