//! Plotly figure export for an axis plan.

use chrono::{TimeZone, Utc};
use serde_json::{json, Map, Value as JsonValue};

use crate::axes::{AxisPlan, Side};
use crate::merge::{Axis, CombinedFrame};

/// Nominal plot width used to turn pixel offsets into paper fractions.
pub const FIGURE_WIDTH_PX: u32 = 1280;
pub const FIGURE_HEIGHT_PX: u32 = 760;

const PLOTLY_CDN: &str = "https://cdn.plot.ly/plotly-2.27.0.min.js";

fn x_values(frame: &CombinedFrame) -> Vec<JsonValue> {
    frame
        .axis_values
        .iter()
        .map(|&v| match frame.axis {
            Axis::Timestamp => {
                let secs = v.floor();
                let millis = ((v - secs) * 1000.0).round().min(999.0) as u32;
                Utc.timestamp_opt(secs as i64, millis * 1_000_000)
                    .single()
                    .map_or(JsonValue::Null, |t| json!(t.to_rfc3339()))
            }
            _ => json!(v),
        })
        .collect()
}

fn layout_key(axis_id: &str) -> String {
    axis_id.replacen('y', "yaxis", 1)
}

/// Figure JSON (`data` + `layout`) with one line per trace of the plan.
pub fn plotly_figure(frame: &CombinedFrame, plan: &AxisPlan) -> JsonValue {
    let x = x_values(frame);
    let data: Vec<JsonValue> = plan
        .traces
        .iter()
        .filter_map(|trace| {
            let column = frame.column(&trace.column.source, &trace.column.metric)?;
            Some(json!({
                "type": "scatter",
                "mode": "lines",
                "name": trace.name,
                "x": x,
                "y": column.values,
                "yaxis": trace.axis_id,
                "connectgaps": true,
            }))
        })
        .collect();

    let width = FIGURE_WIDTH_PX as f64;
    let extra = |side: Side| {
        plan.axes
            .iter()
            .filter(|a| a.side == side)
            .map(|a| a.offset_px)
            .max()
            .unwrap_or(0) as f64
    };
    let (left_extra, right_extra) = (extra(Side::Left), extra(Side::Right));
    let domain = [left_extra / width, 1.0 - right_extra / width];

    let mut layout = Map::new();
    layout.insert("hovermode".into(), json!("x"));
    layout.insert("height".into(), json!(FIGURE_HEIGHT_PX));
    layout.insert(
        "xaxis".into(),
        json!({ "title": { "text": frame.axis.name() }, "domain": domain }),
    );
    for spec in &plan.axes {
        let mut axis = Map::new();
        axis.insert("title".into(), json!({ "text": spec.title }));
        axis.insert(
            "side".into(),
            json!(match spec.side {
                Side::Left => "left",
                Side::Right => "right",
            }),
        );
        if let Some(base) = &spec.overlaying {
            axis.insert("overlaying".into(), json!(base));
        }
        if spec.inverted {
            axis.insert("autorange".into(), json!("reversed"));
        }
        if spec.offset_px > 0 {
            let position = match spec.side {
                Side::Left => (left_extra - spec.offset_px as f64) / width,
                Side::Right => 1.0 - (right_extra - spec.offset_px as f64) / width,
            };
            axis.insert("anchor".into(), json!("free"));
            axis.insert("position".into(), json!(position));
        }
        layout.insert(layout_key(&spec.id), JsonValue::Object(axis));
    }

    json!({ "data": data, "layout": layout })
}

fn escape_html(text: &str) -> String {
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

/// Standalone page rendering `figure` with Plotly from its CDN.
pub fn html_page(title: &str, figure: &JsonValue) -> String {
    // `<` only appears inside JSON strings, where `\u003c` decodes to the same text.
    let figure = figure.to_string().replace('<', "\\u003c");
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<script src="{cdn}"></script>
</head>
<body>
<div id="chart"></div>
<script>
const figure = {figure};
Plotly.newPlot("chart", figure.data, figure.layout);
</script>
</body>
</html>
"#,
        title = escape_html(title),
        cdn = PLOTLY_CDN,
        figure = figure,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axes::assign_axes;
    use crate::merge::FrameColumn;
    use crate::profile::FieldRole;
    use crate::series::ColumnKey;

    fn frame() -> CombinedFrame {
        let col = |source: &str, metric: &str, role, values: Vec<Option<f64>>| FrameColumn {
            key: ColumnKey::new(source, metric),
            role,
            units: String::new(),
            values,
        };
        CombinedFrame {
            axis: Axis::RelTime,
            axis_values: vec![0.0, 1.0],
            columns: vec![
                col("a", "speed", FieldRole::Speed, vec![Some(2.0), Some(4.0)]),
                col("a", "pace", FieldRole::Pace, vec![Some(500.0), Some(250.0)]),
                col("b", "speed", FieldRole::Speed, vec![Some(5.0), None]),
                col("b", "pace", FieldRole::Pace, vec![Some(200.0), None]),
            ],
            warnings: Vec::new(),
        }
    }

    #[test]
    fn figure_layout_follows_plan() {
        let f = frame();
        let plan = assign_axes(&f, &["speed".to_string(), "pace".to_string()], 60);
        let fig = plotly_figure(&f, &plan);

        let data = fig["data"].as_array().unwrap();
        assert_eq!(data.len(), 4);
        assert_eq!(data[1]["name"], "b.speed");
        assert_eq!(data[1]["y"], json!([5.0, null]));
        assert_eq!(data[3]["yaxis"], "y2");

        let layout = &fig["layout"];
        assert_eq!(layout["yaxis"]["side"], "left");
        assert!(layout["yaxis"].get("autorange").is_none());
        assert_eq!(layout["yaxis2"]["overlaying"], "y");
        assert_eq!(layout["yaxis2"]["side"], "right");
        assert_eq!(layout["yaxis2"]["autorange"], "reversed");
        assert_eq!(layout["xaxis"]["domain"], json!([0.0, 1.0]));
    }

    #[test]
    fn html_embeds_figure() {
        let page = html_page("run", &json!({ "data": [], "layout": {} }));
        assert!(page.contains("<title>run</title>"));
        assert!(page.contains(r#"{"data":[],"layout":{}}"#));
    }

    #[test]
    fn html_escapes_markup_in_names() {
        let figure = json!({ "data": [{ "name": "a.</script><b>" }], "layout": {} });
        let page = html_page("<pace> & speed", &figure);
        assert!(page.contains("<title>&lt;pace&gt; &amp; speed</title>"));
        assert_eq!(page.matches("</script>").count(), 2);
        assert!(page.contains(r#""name":"a.\u003c/script>\u003cb>""#));

        let embedded = page
            .split("const figure = ")
            .nth(1)
            .and_then(|rest| rest.split(";\n").next())
            .unwrap();
        let parsed: JsonValue = serde_json::from_str(embedded).unwrap();
        assert_eq!(parsed, figure);
    }
}
