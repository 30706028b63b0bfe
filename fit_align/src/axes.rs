//! Chart axis assignment for selected metrics.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::merge::{CombinedFrame, FrameColumn};
use crate::series::ColumnKey;
use crate::Warning;

/// Most metrics charted at once.
pub const MAX_CONCURRENT_AXES: usize = 2;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AxisSpec {
    /// Chart axis identifier: `y`, `y2`, `y3`, ...
    pub id: String,
    pub metric: String,
    pub title: String,
    pub side: Side,
    /// Axis this one is drawn over; `None` for the primary axis.
    pub overlaying: Option<String>,
    pub offset_px: u32,
    pub inverted: bool,
}

/// One line on the chart: a single source's column for a metric.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Trace {
    pub name: String,
    pub column: ColumnKey,
    pub axis_id: String,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct AxisPlan {
    pub axes: Vec<AxisSpec>,
    pub traces: Vec<Trace>,
    pub warnings: Vec<Warning>,
}

impl AxisPlan {
    pub fn axis(&self, id: &str) -> Option<&AxisSpec> {
        self.axes.iter().find(|a| a.id == id)
    }

    pub fn metrics(&self) -> Vec<&str> {
        self.axes.iter().map(|a| a.metric.as_str()).collect()
    }
}

/// Side and pixel offset of the `index`-th axis. Axes alternate left/right, and each
/// extra pair moves one `step_px` further out.
pub fn placement(index: usize, step_px: u32) -> (Side, u32) {
    let side = if index % 2 == 0 { Side::Left } else { Side::Right };
    (side, (index / 2) as u32 * step_px)
}

fn axis_id(index: usize) -> String {
    if index == 0 {
        "y".to_string()
    } else {
        format!("y{}", index + 1)
    }
}

/// Columns grouped by metric name, groups and members in frame order.
pub fn group_by_metric(frame: &CombinedFrame) -> Vec<(&str, Vec<&FrameColumn>)> {
    let mut groups: Vec<(&str, Vec<&FrameColumn>)> = Vec::new();
    for column in &frame.columns {
        let metric = column.key.metric.as_str();
        match groups.iter_mut().find(|(m, _)| *m == metric) {
            Some((_, members)) => members.push(column),
            None => groups.push((metric, vec![column])),
        }
    }
    groups
}

/// Place the selected metrics on chart axes, in selection order.
///
/// Selections beyond [`MAX_CONCURRENT_AXES`] are dropped with a warning.
pub fn assign_axes(frame: &CombinedFrame, selected: &[String], offset_step_px: u32) -> AxisPlan {
    let mut warnings = Vec::new();
    let mut wanted: Vec<String> = Vec::with_capacity(selected.len());
    for metric in selected {
        if !wanted.contains(metric) {
            wanted.push(metric.clone());
        }
    }
    if wanted.len() > MAX_CONCURRENT_AXES {
        let kept: Vec<String> = wanted[..MAX_CONCURRENT_AXES].to_vec();
        warnings.push(Warning::AxisCapExceeded {
            selected: wanted.clone(),
            kept: kept.clone(),
        });
        wanted = kept;
    }

    let groups = group_by_metric(frame);
    let mut axes = Vec::new();
    let mut traces = Vec::new();
    for metric in wanted {
        let Some((_, columns)) = groups.iter().find(|(m, _)| *m == metric) else {
            warnings.push(Warning::UnknownMetric { metric });
            continue;
        };
        let index = axes.len();
        let id = axis_id(index);
        let (side, offset_px) = placement(index, offset_step_px);
        let units = columns.iter().map(|c| c.units.as_str()).find(|u| !u.is_empty());
        axes.push(AxisSpec {
            id: id.clone(),
            title: match units {
                Some(u) => format!("{} ({})", metric, u),
                None => metric.clone(),
            },
            metric,
            side,
            overlaying: (index > 0).then(|| "y".to_string()),
            offset_px,
            inverted: columns.iter().any(|c| c.role.is_rate_like()),
        });
        traces.extend(columns.iter().map(|c| Trace {
            name: c.key.to_string(),
            column: c.key.clone(),
            axis_id: id.clone(),
        }));
    }
    debug!(axes = axes.len(), traces = traces.len(), "assigned chart axes");

    AxisPlan {
        axes,
        traces,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::Axis;
    use crate::profile::FieldRole;

    fn column(source: &str, metric: &str, role: FieldRole, units: &str) -> FrameColumn {
        FrameColumn {
            key: ColumnKey::new(source, metric),
            role,
            units: units.to_string(),
            values: vec![Some(1.0)],
        }
    }

    fn frame() -> CombinedFrame {
        CombinedFrame {
            axis: Axis::RelTime,
            axis_values: vec![0.0],
            columns: vec![
                column("a", "speed", FieldRole::Speed, "m/s"),
                column("a", "heart_rate", FieldRole::Measurement, "bpm"),
                column("a", "pace", FieldRole::Pace, "s/km"),
                column("b", "speed", FieldRole::Speed, "m/s"),
                column("b", "heart_rate", FieldRole::Measurement, "bpm"),
                column("b", "pace", FieldRole::Pace, "s/km"),
            ],
            warnings: Vec::new(),
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn placement_alternates_and_steps_out() {
        assert_eq!(placement(0, 60), (Side::Left, 0));
        assert_eq!(placement(1, 60), (Side::Right, 0));
        assert_eq!(placement(2, 60), (Side::Left, 60));
        assert_eq!(placement(3, 60), (Side::Right, 60));
        assert_eq!(placement(4, 60), (Side::Left, 120));
    }

    #[test]
    fn primary_and_inverted_overlay() {
        let plan = assign_axes(&frame(), &names(&["speed", "pace"]), 60);
        assert!(plan.warnings.is_empty());
        let y = plan.axis("y").unwrap();
        assert_eq!(y.metric, "speed");
        assert_eq!(y.title, "speed (m/s)");
        assert_eq!(y.side, Side::Left);
        assert_eq!(y.overlaying, None);
        assert!(!y.inverted);
        let y2 = plan.axis("y2").unwrap();
        assert_eq!(y2.metric, "pace");
        assert_eq!(y2.side, Side::Right);
        assert_eq!(y2.overlaying.as_deref(), Some("y"));
        assert!(y2.inverted);

        let traces: Vec<(&str, &str)> = plan
            .traces
            .iter()
            .map(|t| (t.name.as_str(), t.axis_id.as_str()))
            .collect();
        assert_eq!(
            traces,
            [("a.speed", "y"), ("b.speed", "y"), ("a.pace", "y2"), ("b.pace", "y2")]
        );
    }

    #[test]
    fn cap_truncates_in_selection_order() {
        let plan = assign_axes(&frame(), &names(&["heart_rate", "pace", "speed"]), 60);
        assert_eq!(plan.metrics(), ["heart_rate", "pace"]);
        assert_eq!(
            plan.warnings,
            vec![Warning::AxisCapExceeded {
                selected: names(&["heart_rate", "pace", "speed"]),
                kept: names(&["heart_rate", "pace"]),
            }]
        );
        assert_eq!(plan.traces.len(), 4);
    }

    #[test]
    fn unknown_and_repeated_metrics() {
        let plan = assign_axes(&frame(), &names(&["speed", "speed", "power"]), 60);
        assert_eq!(plan.metrics(), ["speed"]);
        assert_eq!(
            plan.warnings,
            vec![Warning::UnknownMetric {
                metric: "power".into()
            }]
        );
    }

    #[test]
    fn deterministic() {
        let f = frame();
        let selection = names(&["pace", "heart_rate"]);
        assert_eq!(assign_axes(&f, &selection, 40), assign_axes(&f, &selection, 40));
    }
}
