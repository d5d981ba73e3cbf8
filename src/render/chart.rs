//! Chart widgets: display configuration, value formatting and the slot
//! registry that owns live chart instances.

use std::collections::HashMap;

use log::debug;
use serde::Serialize;
use serde_json::{ json, Value };

use crate::chart::{ ChartDirective, ChartKind, ChartOptions };

pub const PALETTE: [&str; 10] = [
    "#6366F1",
    "#34D399",
    "#FBBF24",
    "#F87171",
    "#818CF8",
    "#2DD4BF",
    "#FB923C",
    "#A78BFA",
    "#38BDF8",
    "#F472B6",
];

/// Hex alpha suffix for translucent fills.
const FILL_ALPHA: &str = "40";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueFormat {
    Currency,
    Percentage,
    Plain,
}

impl ValueFormat {
    /// Currency wins over percentage when both hints are set.
    pub fn for_options(options: &ChartOptions) -> Self {
        if options.currency {
            ValueFormat::Currency
        } else if options.percentage {
            ValueFormat::Percentage
        } else {
            ValueFormat::Plain
        }
    }

    pub fn format(self, value: f64) -> String {
        match self {
            ValueFormat::Currency => format!("R$ {}", group_pt_br(value, 0)),
            ValueFormat::Percentage => format!("{:.1}%", value),
            ValueFormat::Plain => group_pt_br(value, 3),
        }
    }
}

pub fn format_value(value: f64, options: &ChartOptions) -> String {
    ValueFormat::for_options(options).format(value)
}

/// pt-BR notation: `.` groups thousands, `,` separates up to `max_decimals`
/// fraction digits, trailing zeros dropped.
fn group_pt_br(value: f64, max_decimals: usize) -> String {
    let fixed = format!("{:.*}", max_decimals, value.abs());
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i, f.trim_end_matches('0')),
        None => (fixed.as_str(), ""),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    if !frac_part.is_empty() {
        grouped.push(',');
        grouped.push_str(frac_part);
    }

    let is_zero = fixed.chars().all(|c| c == '0' || c == '.');
    if value.is_sign_negative() && !is_zero {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

fn palette_color(index: usize) -> &'static str {
    PALETTE[index % PALETTE.len()]
}

/// Color of series `index`; an explicit dataset color wins.
pub fn series_color(directive: &ChartDirective, index: usize) -> String {
    directive.datasets
        .get(index)
        .and_then(|ds| ds.color.clone())
        .unwrap_or_else(|| palette_color(index).to_string())
}

pub fn legend_visible(directive: &ChartDirective) -> bool {
    directive.options.show_legend != Some(false) &&
        (directive.datasets.len() > 1 || directive.kind.is_proportional())
}

pub fn chart_height(kind: ChartKind) -> u32 {
    if kind.is_proportional() { 280 } else { 300 }
}

fn dataset_config(directive: &ChartDirective, index: usize) -> Value {
    let ds = &directive.datasets[index];

    if directive.kind.is_proportional() {
        let colors: Vec<&str> = (0..ds.data.len()).map(palette_color).collect();
        return json!({
            "label": ds.label,
            "data": ds.data,
            "backgroundColor": colors,
            "borderColor": colors,
            "borderWidth": 2,
            "hoverOffset": 8,
        });
    }

    let color = series_color(directive, index);
    let is_line = directive.kind == ChartKind::Line;
    let is_bar = matches!(directive.kind, ChartKind::Bar | ChartKind::HorizontalBar);
    json!({
        "label": ds.label,
        "data": ds.data,
        "backgroundColor": if is_line { format!("{}{}", color, FILL_ALPHA) } else { color.clone() },
        "borderColor": color,
        "borderWidth": if is_line { 3 } else { 0 },
        "borderRadius": if is_bar { 6 } else { 0 },
        "fill": is_line,
        "tension": 0.4,
        "pointRadius": if is_line { 4 } else { 0 },
        "pointHoverRadius": if is_line { 7 } else { 0 },
        "pointBackgroundColor": color,
    })
}

/// Chart.js-compatible configuration for a directive.
pub fn chart_config(directive: &ChartDirective) -> Value {
    let proportional = directive.kind.is_proportional();
    let horizontal = directive.kind == ChartKind::HorizontalBar;
    let chart_type = match directive.kind {
        ChartKind::Bar | ChartKind::HorizontalBar => "bar",
        ChartKind::Line => "line",
        ChartKind::Pie => "pie",
        ChartKind::Doughnut => "doughnut",
    };
    let datasets: Vec<Value> = (0..directive.datasets.len())
        .map(|i| dataset_config(directive, i))
        .collect();

    let value_format = ValueFormat::for_options(&directive.options);
    let scales = if proportional {
        json!({})
    } else {
        let stacked = directive.options.stacked;
        let mut scales = json!({
            "x": { "stacked": stacked },
            "y": { "stacked": stacked },
        });
        // ticks on the value axis follow the value format
        let value_axis = if horizontal { "x" } else { "y" };
        scales[value_axis]["ticks"] = json!({ "format": value_format });
        scales
    };

    json!({
        "type": chart_type,
        "data": {
            "labels": directive.labels,
            "datasets": datasets,
        },
        "options": {
            "responsive": true,
            "maintainAspectRatio": false,
            "indexAxis": if horizontal { "y" } else { "x" },
            "plugins": {
                "legend": {
                    "display": legend_visible(directive),
                    "position": if proportional { "bottom" } else { "top" },
                },
                "title": {
                    "display": directive.title.is_some(),
                    "text": directive.title.clone().unwrap_or_default(),
                },
                "tooltip": { "format": value_format },
            },
            "scales": scales,
        },
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartWidget {
    pub directive: ChartDirective,
    pub config: Value,
    pub height: u32,
    pub value_format: ValueFormat,
    /// Per dataset, the values as tooltips and axis ticks show them.
    pub formatted: Vec<Vec<String>>,
}

impl ChartWidget {
    pub fn new(directive: ChartDirective) -> Self {
        let value_format = ValueFormat::for_options(&directive.options);
        let formatted = directive.datasets
            .iter()
            .map(|ds| ds.data.iter().map(|v| value_format.format(*v)).collect())
            .collect();
        Self {
            config: chart_config(&directive),
            height: chart_height(directive.kind),
            value_format,
            formatted,
            directive,
        }
    }
}

/// Something that can host live charts, such as a canvas layer.
pub trait ChartSurface {
    type Handle;

    fn attach(&mut self, slot: usize, widget: &ChartWidget) -> Self::Handle;
    fn release(&mut self, handle: Self::Handle);
}

/// Live chart instances keyed by slot.
///
/// A slot holds at most one handle. Rendering into an occupied slot releases
/// the old handle before the new one is attached, and dropping the registry
/// releases whatever is still attached.
pub struct ChartSlots<S: ChartSurface> {
    surface: S,
    handles: HashMap<usize, S::Handle>,
}

impl<S: ChartSurface> ChartSlots<S> {
    pub fn new(surface: S) -> Self {
        Self { surface, handles: HashMap::new() }
    }

    pub fn render(&mut self, slot: usize, widget: &ChartWidget) {
        if let Some(previous) = self.handles.remove(&slot) {
            debug!("Releasing chart in slot {} before re-render", slot);
            self.surface.release(previous);
        }
        let handle = self.surface.attach(slot, widget);
        self.handles.insert(slot, handle);
    }

    pub fn clear(&mut self, slot: usize) -> bool {
        match self.handles.remove(&slot) {
            Some(handle) => {
                self.surface.release(handle);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }
}

impl<S: ChartSurface> Drop for ChartSlots<S> {
    fn drop(&mut self) {
        for (_, handle) in self.handles.drain() {
            self.surface.release(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn directive(raw: &str) -> ChartDirective {
        ChartDirective::from_json(raw).unwrap()
    }

    #[test]
    fn plain_values_use_pt_br_grouping() {
        let opts = ChartOptions::default();
        assert_eq!(format_value(1234567.0, &opts), "1.234.567");
        assert_eq!(format_value(1234.5, &opts), "1.234,5");
        assert_eq!(format_value(0.125, &opts), "0,125");
        assert_eq!(format_value(999.0, &opts), "999");
        assert_eq!(format_value(-1500.25, &opts), "-1.500,25");
    }

    #[test]
    fn currency_rounds_to_whole_reais() {
        let opts = ChartOptions { currency: true, ..Default::default() };
        assert_eq!(format_value(1500.4, &opts), "R$ 1.500");
        assert_eq!(format_value(1234567.8, &opts), "R$ 1.234.568");
        assert_eq!(format_value(-0.2, &opts), "R$ 0");
    }

    #[test]
    fn percentage_has_one_decimal() {
        let opts = ChartOptions { percentage: true, ..Default::default() };
        assert_eq!(format_value(12.345, &opts), "12.3%");
        assert_eq!(format_value(50.0, &opts), "50.0%");
    }

    #[test]
    fn currency_wins_over_percentage() {
        let opts = ChartOptions { currency: true, percentage: true, ..Default::default() };
        assert_eq!(ValueFormat::for_options(&opts), ValueFormat::Currency);
    }

    #[test]
    fn series_colors_cycle_and_respect_overrides() {
        let datasets: Vec<String> = (0..12)
            .map(|i| {
                if i == 1 {
                    format!(r##"{{"label":"s{}","data":[1],"color":"#123456"}}"##, i)
                } else {
                    format!(r#"{{"label":"s{}","data":[1]}}"#, i)
                }
            })
            .collect();
        let d = directive(
            &format!(r#"{{"type":"line","labels":["a"],"datasets":[{}]}}"#, datasets.join(","))
        );
        assert_eq!(series_color(&d, 0), PALETTE[0]);
        assert_eq!(series_color(&d, 1), "#123456");
        assert_eq!(series_color(&d, 10), PALETTE[0]);

        let config = chart_config(&d);
        assert_eq!(config["data"]["datasets"][1]["backgroundColor"], "#12345640");
        assert_eq!(config["data"]["datasets"][0]["fill"], true);
        assert_eq!(config["data"]["datasets"][0]["borderWidth"], 3);
    }

    #[test]
    fn pie_colors_each_category() {
        let d = directive(
            r#"{"type":"doughnut","labels":["a","b","c"],"datasets":[{"label":"x","data":[1,2,3]}]}"#
        );
        let config = chart_config(&d);
        assert_eq!(config["type"], "doughnut");
        assert_eq!(config["data"]["datasets"][0]["backgroundColor"], json!([PALETTE[0], PALETTE[1], PALETTE[2]]));
        assert_eq!(config["options"]["plugins"]["legend"]["display"], true);
        assert_eq!(config["options"]["plugins"]["legend"]["position"], "bottom");
        assert_eq!(config["options"]["scales"], json!({}));
        assert_eq!(chart_height(d.kind), 280);
    }

    #[test]
    fn horizontal_bar_is_a_bar_on_the_y_axis() {
        let d = directive(
            r#"{"type":"horizontalBar","title":"Canais","labels":["a"],"datasets":[{"label":"x","data":[1]}],"options":{"stacked":true}}"#
        );
        let config = chart_config(&d);
        assert_eq!(config["type"], "bar");
        assert_eq!(config["options"]["indexAxis"], "y");
        assert_eq!(config["data"]["datasets"][0]["borderRadius"], 6);
        assert_eq!(config["options"]["scales"]["y"]["stacked"], true);
        assert_eq!(config["options"]["plugins"]["title"]["text"], "Canais");
        assert_eq!(chart_height(d.kind), 300);
    }

    #[test]
    fn value_format_reaches_the_value_axis() {
        let plain = chart_config(
            &directive(r#"{"type":"bar","labels":["a"],"datasets":[{"label":"x","data":[1]}]}"#)
        );
        assert_eq!(plain["options"]["scales"]["y"]["ticks"]["format"], "plain");
        assert!(plain["options"]["scales"]["x"].get("ticks").is_none());

        let currency = chart_config(
            &directive(
                r#"{"type":"horizontalBar","labels":["a"],"datasets":[{"label":"x","data":[1]}],"options":{"currency":true}}"#
            )
        );
        assert_eq!(currency["options"]["scales"]["x"]["ticks"]["format"], "currency");
        assert_eq!(currency["options"]["plugins"]["tooltip"]["format"], "currency");

        let share = chart_config(
            &directive(
                r#"{"type":"pie","labels":["a"],"datasets":[{"label":"x","data":[1]}],"options":{"percentage":true}}"#
            )
        );
        assert_eq!(share["options"]["plugins"]["tooltip"]["format"], "percentage");
    }

    #[test]
    fn legend_rules() {
        let single = directive(r#"{"type":"bar","labels":["a"],"datasets":[{"label":"x","data":[1]}]}"#);
        assert!(!legend_visible(&single));

        let multi = directive(
            r#"{"type":"bar","labels":["a"],"datasets":[{"label":"x","data":[1]},{"label":"y","data":[2]}]}"#
        );
        assert!(legend_visible(&multi));

        let hidden = directive(
            r#"{"type":"pie","labels":["a"],"datasets":[{"label":"x","data":[1]}],"options":{"showLegend":false}}"#
        );
        assert!(!legend_visible(&hidden));
    }

    #[test]
    fn widget_precomputes_formatted_values() {
        let d = directive(
            r#"{"type":"bar","labels":["Jan","Feb"],"datasets":[{"label":"R$","data":[100,2000]}],"options":{"currency":true}}"#
        );
        let widget = ChartWidget::new(d);
        assert_eq!(widget.formatted, vec![vec!["R$ 100".to_string(), "R$ 2.000".to_string()]]);
        assert_eq!(widget.value_format, ValueFormat::Currency);
    }

    #[derive(Default)]
    struct Log {
        attached: Vec<usize>,
        released: Vec<u32>,
        next: u32,
    }

    struct FakeSurface(Rc<RefCell<Log>>);

    impl ChartSurface for FakeSurface {
        type Handle = u32;

        fn attach(&mut self, slot: usize, _widget: &ChartWidget) -> u32 {
            let mut log = self.0.borrow_mut();
            log.attached.push(slot);
            log.next += 1;
            log.next
        }

        fn release(&mut self, handle: u32) {
            self.0.borrow_mut().released.push(handle);
        }
    }

    #[test]
    fn rerender_releases_previous_instance_first() {
        let log = Rc::new(RefCell::new(Log::default()));
        let widget = ChartWidget::new(
            directive(r#"{"type":"bar","labels":["a"],"datasets":[{"label":"x","data":[1]}]}"#)
        );
        let mut slots = ChartSlots::new(FakeSurface(log.clone()));

        slots.render(0, &widget);
        slots.render(0, &widget);
        slots.render(1, &widget);
        assert_eq!(slots.len(), 2);
        assert_eq!(log.borrow().released, vec![1]);

        assert!(slots.clear(1));
        assert!(!slots.clear(1));
        drop(slots);

        let log = log.borrow();
        assert_eq!(log.attached, vec![0, 0, 1]);
        let mut released = log.released.clone();
        released.sort();
        assert_eq!(released, vec![1, 2, 3]);
    }
}
