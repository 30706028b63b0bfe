use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, ValueHint};
use fit_align::figure::{html_page, plotly_figure};
use fit_align::decode::open_paths;
use fit_align::{
    discover_fields, render_report, Axis, AxisPlan, CombinedFrame, Params, RecordSource, Session,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Overlay workout recordings on a shared axis", long_about = None)]
struct Cli {
    /// FIT/GPX files to ingest
    #[arg(short, long, required = true, num_args = 1.., value_hint = ValueHint::FilePath)]
    files: Vec<PathBuf>,

    /// List the fields found in all files and exit
    #[arg(short, long, action = ArgAction::SetTrue)]
    list_fields: bool,

    /// Allow several files to be aligned on wall-clock timestamps
    #[arg(long, action = ArgAction::SetTrue)]
    force: bool,

    /// Shared x-axis: distance, timestamp or rel_time
    #[arg(long, default_value = "rel_time")]
    axis: Axis,

    /// Metrics to chart (comma separated)
    #[arg(long, default_value = "speed")]
    metrics: String,

    /// Output CSV path for the combined frame (`-` for stdout)
    #[arg(short, long, default_value = "combined.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Write a standalone Plotly chart page
    #[arg(long, value_hint = ValueHint::FilePath)]
    html: Option<PathBuf>,

    /// JSON file with alignment parameters
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Decimal places for rounded values
    #[arg(long)]
    precision: Option<u32>,

    /// Verbose field report and debug logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let params = load_params(&cli)?;
    if cli.list_fields {
        let sources = open_paths(&cli.files)?;
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        for line in field_report(&sources, &params, cli.verbose)? {
            writeln!(handle, "{}", line)?;
        }
        return Ok(());
    }

    let session = Session::open_paths(&cli.files, params)?;
    for warning in session.warnings() {
        warn!("{}", warning);
    }
    handle_chart(&cli, &session)
}

/// Field listing from a single discovery pass; no per-source tables are built.
fn field_report<S: RecordSource>(
    sources: &[S],
    params: &Params,
    verbose: bool,
) -> Result<Vec<String>> {
    let profile = discover_fields(sources, params.precision)?;
    Ok(render_report(&profile, verbose))
}

fn load_params(cli: &Cli) -> Result<Params> {
    let mut params = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("{} is not a valid config", path.display()))?
        }
        None => Params::default(),
    };
    if let Some(precision) = cli.precision {
        params.precision = precision;
    }
    if cli.force {
        params.force_calendar_join = true;
    }
    Ok(params)
}

fn parse_metric_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn handle_chart(cli: &Cli, session: &Session) -> Result<()> {
    let axis = cli.axis;
    let frame = session.combine(axis)?;
    for warning in &frame.warnings {
        warn!("{}", warning);
    }
    info!(
        "Combined {} recordings on {}: {} rows, {} numeric columns",
        session.tables().len(),
        axis,
        frame.len(),
        frame.columns.len()
    );

    let metrics = parse_metric_list(&cli.metrics);
    if metrics.is_empty() {
        return Err(anyhow!("no metrics selected"));
    }
    let plan = session.plan(&frame, &metrics);
    for warning in &plan.warnings {
        warn!("{}", warning);
    }

    if cli.output.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut writer = csv::Writer::from_writer(stdout.lock());
        write_frame_rows(&frame, &mut writer)?;
    } else {
        let file = File::create(&cli.output)
            .with_context(|| format!("failed to create {}", cli.output.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        write_frame_rows(&frame, &mut writer)?;
        info!("Wrote combined CSV: {}", cli.output.display());
    }

    if let Some(path) = &cli.html {
        write_html(&frame, &plan, path)?;
        info!("Wrote chart: {}", path.display());
    }
    Ok(())
}

fn write_frame_rows<W: Write>(frame: &CombinedFrame, writer: &mut csv::Writer<W>) -> Result<()> {
    let mut header = vec![frame.axis.name().to_string()];
    header.extend(frame.columns.iter().map(|c| c.key.to_string()));
    writer.write_record(&header)?;
    for (i, x) in frame.axis_values.iter().enumerate() {
        let mut row = Vec::with_capacity(header.len());
        row.push(x.to_string());
        row.extend(
            frame
                .columns
                .iter()
                .map(|c| c.values[i].map(|v| v.to_string()).unwrap_or_default()),
        );
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_html(frame: &CombinedFrame, plan: &AxisPlan, path: &Path) -> Result<()> {
    let figure = plotly_figure(frame, plan);
    let title = plan.metrics().join(" / ");
    fs::write(path, html_page(&title, &figure))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_list_parsing() {
        assert_eq!(
            parse_metric_list(" speed, ,heart_rate,"),
            vec!["speed".to_string(), "heart_rate".to_string()]
        );
        assert!(parse_metric_list("").is_empty());
    }

    #[test]
    fn cli_flags() {
        let cli = Cli::try_parse_from([
            "fit-align",
            "--files",
            "a.fit",
            "b.fit",
            "--axis",
            "rel_time",
            "--force",
            "-l",
        ])
        .unwrap();
        assert_eq!(cli.files.len(), 2);
        assert!(cli.list_fields);
        assert_eq!(cli.axis, Axis::RelTime);
        let params = load_params(&cli).unwrap();
        assert!(params.force_calendar_join);
        assert_eq!(params.precision, 2);
    }

    #[test]
    fn field_listing_reads_each_source_once() {
        use fit_align::source::Records;
        use fit_align::{AlignError, FieldValue, MemorySource, Record};
        use std::cell::Cell;

        struct Counted {
            inner: MemorySource,
            opens: Cell<usize>,
        }

        impl RecordSource for Counted {
            fn id(&self) -> &str {
                self.inner.id()
            }

            fn open(&self) -> std::result::Result<Records<'_>, AlignError> {
                self.opens.set(self.opens.get() + 1);
                self.inner.open()
            }
        }

        let sources = [Counted {
            inner: MemorySource::new(
                "a.fit",
                vec![Record::sample().with("heart_rate", FieldValue::number(120.0, "bpm"))],
            ),
            opens: Cell::new(0),
        }];
        let lines = field_report(&sources, &Params::default(), false).unwrap();
        assert_eq!(lines, ["Field #0. 'heart_rate' (bpm) - appears in 100.0% of the data"]);
        assert_eq!(sources[0].opens.get(), 1);
    }

    #[test]
    fn axis_flag_rejects_unknown_names() {
        let cli = Cli::try_parse_from(["fit-align", "-f", "a.fit", "--axis", "distance"]).unwrap();
        assert_eq!(cli.axis, Axis::Distance);
        let err = Cli::try_parse_from(["fit-align", "-f", "a.fit", "--axis", "elevation"])
            .unwrap_err()
            .to_string();
        assert!(err.contains("unknown axis 'elevation'"), "{}", err);
    }

    #[test]
    fn csv_rows_leave_nulls_blank() {
        use fit_align::{ColumnKey, FieldRole, FrameColumn};
        let frame = CombinedFrame {
            axis: Axis::RelTime,
            axis_values: vec![0.0, 1.0],
            columns: vec![FrameColumn {
                key: ColumnKey::new("b.fit", "speed"),
                role: FieldRole::Speed,
                units: "m/s".into(),
                values: vec![Some(5.0), None],
            }],
            warnings: Vec::new(),
        };
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_frame_rows(&frame, &mut writer).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text, "rel_time,b.fit.speed\n0,5\n1,\n");
    }
}
