use std::collections::BTreeSet;
use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use rack_uptime::{
    build_time_axis, compute_uptime, parse_table, parse_value, Cell, ColumnResult, Params, Table,
    TableDiagnostics, UptimeReport,
};
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod chart;

use chart::{render_chart_guard, ChartKind};

#[derive(Parser, Debug)]
#[command(author, version, about = "Rack vacuum uptime analysis CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute time-weighted uptime/downtime per rack column
    Analyze(AnalyzeArgs),
    /// Report how the loader and normalizer see each input table
    Inspect(InspectArgs),
}

/// Options shared by every subcommand that interprets a table.
#[derive(Args, Debug, Clone, Default)]
struct ParamArgs {
    /// JSON file with analysis parameters; flags below override it
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Readings strictly below this value count as downtime
    #[arg(long, allow_negative_numbers = true)]
    threshold: Option<f64>,

    /// Columns considered from the left, time column included
    #[arg(long)]
    max_columns: Option<usize>,

    /// Minutes credited to the first retained row
    #[arg(long)]
    first_row_minutes: Option<f64>,

    /// chrono format string for text timestamps (auto-detected by default)
    #[arg(long)]
    time_format: Option<String>,
}

#[derive(Parser, Debug)]
struct AnalyzeArgs {
    /// CSV or spreadsheet files (xlsx, xlsm, xlsb, xls, ods)
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "uptime.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Optional JSON report path
    #[arg(long, value_hint = ValueHint::FilePath)]
    json: Option<PathBuf>,

    /// Output PNG chart path (defaults next to CSV)
    #[arg(long, value_hint = ValueHint::FilePath)]
    png: Option<PathBuf>,

    /// Output SVG chart path
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// Disable chart generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,

    /// Do not print the text summary
    #[arg(short, long, action = ArgAction::SetTrue)]
    quiet: bool,

    #[command(flatten)]
    params: ParamArgs,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Profile major stages with timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// Files to inspect
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output report path (`-` for stdout)
    #[arg(short, long, default_value = "uptime_diagnostics.txt", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    #[command(flatten)]
    params: ParamArgs,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

struct AnalyzedFile {
    path: PathBuf,
    report: UptimeReport,
}

impl AnalyzedFile {
    fn name(&self) -> String {
        file_label(&self.path)
    }
}

#[derive(Serialize)]
struct JsonFileReport<'a> {
    file: String,
    columns: &'a [ColumnResult],
    diagnostics: &'a TableDiagnostics,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Analyze(args) => args.verbose,
        Command::Inspect(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Analyze(args) => handle_analyze(args),
        Command::Inspect(args) => handle_inspect(args),
    }
}

fn handle_analyze(args: AnalyzeArgs) -> Result<()> {
    if args.inputs.is_empty() {
        return Err(anyhow!("no input files supplied"));
    }
    let params = resolve_params(&args.params)?;
    debug!("Analysis parameters: {:?}", params);

    // Every input must succeed before anything is written.
    let t_compute = Instant::now();
    let mut analyzed = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        let table = load_table(path)?;
        let report = compute_uptime(&table, &params)
            .with_context(|| format!("failed to analyze {}", path.display()))?;
        log_diagnostics(path, &report.diagnostics);
        analyzed.push(AnalyzedFile {
            path: path.clone(),
            report,
        });
    }
    if args.profile || args.verbose {
        info!(
            "Load+compute stage: {:.1} ms ({} files)",
            t_compute.elapsed().as_secs_f64() * 1000.0,
            analyzed.len()
        );
    }

    let csv_to_stdout = args.output.as_os_str() == "-";
    if !args.quiet && !csv_to_stdout {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        for file in &analyzed {
            handle.write_all(format_summary(&file.name(), &file.report.columns).as_bytes())?;
        }
        handle.flush()?;
    }

    if csv_to_stdout {
        write_results_stdout(&analyzed)?;
    } else {
        write_results_csv(&analyzed, &args.output)?;
        info!("Wrote results CSV: {}", args.output.display());
    }

    if let Some(json_path) = args.json.as_ref() {
        write_json_report(&analyzed, json_path)?;
        info!("Wrote JSON report: {}", json_path.display());
    }

    if !args.no_plot {
        let t_plot = Instant::now();
        let png_base = match args.png.as_ref() {
            Some(path) => Some(path.clone()),
            None if !csv_to_stdout => {
                let mut png_path = args.output.clone();
                png_path.set_extension("png");
                Some(png_path)
            }
            None => None,
        };
        let multi = analyzed.len() > 1;
        for file in &analyzed {
            if let Some(base) = png_base.as_ref() {
                render_file_chart(file, &chart_path(base, &file.path, multi), ChartKind::Png);
            }
            if let Some(base) = args.svg.as_ref() {
                render_file_chart(file, &chart_path(base, &file.path, multi), ChartKind::Svg);
            }
        }
        if args.profile || args.verbose {
            info!(
                "Plot stage: {:.1} ms",
                t_plot.elapsed().as_secs_f64() * 1000.0
            );
        }
    }

    Ok(())
}

fn render_file_chart(file: &AnalyzedFile, path: &Path, kind: ChartKind) {
    if file.report.columns.is_empty() {
        warn!("No value columns in {}; skipping chart", file.path.display());
        return;
    }
    let title = format!("Uptime and downtime per rack: {}", file.name());
    match render_chart_guard(&title, &file.report.columns, path, kind) {
        Ok(()) => info!("Wrote chart: {}", path.display()),
        Err(err) => warn!("Skipping chart render ({}): {}", path.display(), err),
    }
}

/// Chart path for one input; with several inputs the file stem is appended.
fn chart_path(base: &Path, input: &Path, multi: bool) -> PathBuf {
    if !multi {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("uptime");
    let ext = base.extension().and_then(|s| s.to_str()).unwrap_or("png");
    let input_stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("input");
    base.with_file_name(format!("{}_{}.{}", stem, input_stem, ext))
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn load_table(path: &Path) -> Result<Table> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let hint = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("csv");
    parse_table(&data, hint).with_context(|| format!("failed to parse {}", path.display()))
}

fn resolve_params(args: &ParamArgs) -> Result<Params> {
    let mut params = match args.config.as_ref() {
        Some(path) => load_params(path)?,
        None => Params::default(),
    };
    if let Some(threshold) = args.threshold {
        params.threshold = threshold;
    }
    if let Some(max_columns) = args.max_columns {
        params.max_columns = max_columns;
    }
    if let Some(minutes) = args.first_row_minutes {
        params.first_row_minutes = minutes;
    }
    if let Some(fmt) = args.time_format.as_ref() {
        params.time_format = Some(fmt.clone());
    }
    params.validate()?;
    Ok(params)
}

fn load_params(path: &Path) -> Result<Params> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let params: Params = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid parameter file", path.display()))?;
    Ok(params)
}

fn log_diagnostics(path: &Path, diag: &TableDiagnostics) {
    info!(
        "{}: {} rows read, span {:.1} min",
        path.display(),
        diag.rows_read,
        diag.span_minutes
    );
    let dropped = diag.rows_missing_time + diag.rows_bad_time;
    if dropped > 0 {
        warn!(
            "{}: dropped {} row(s) without a usable timestamp ({} missing, {} unparseable)",
            path.display(),
            dropped,
            diag.rows_missing_time,
            diag.rows_bad_time
        );
    }
    if diag.duplicate_rows_dropped > 0 {
        info!(
            "{}: ignored {} row(s) repeating an earlier timestamp",
            path.display(),
            diag.duplicate_rows_dropped
        );
    }
    if diag.columns_dropped > 0 {
        warn!(
            "{}: ignored {} column(s) beyond the column limit",
            path.display(),
            diag.columns_dropped
        );
    }
}

fn format_summary(file: &str, columns: &[ColumnResult]) -> String {
    let mut out = format!("{}\n", file);
    if columns.is_empty() {
        out.push_str("  (no value columns)\n");
    }
    for r in columns {
        out.push_str(&format!("  {}:\n", r.column_id));
        out.push_str(&format!(
            "    Downtime: {:6.2}% ({:.1} minutes)\n",
            r.downtime_pct, r.downtime_minutes
        ));
        out.push_str(&format!(
            "    Uptime:   {:6.2}% ({:.1} minutes)\n",
            r.uptime_pct, r.uptime_minutes
        ));
        if r.unknown_minutes > 0.0 {
            out.push_str(&format!(
                "    Unreadable: {:.1} minutes not classified\n",
                r.unknown_minutes
            ));
        }
    }
    out
}

fn write_results_stdout(analyzed: &[AnalyzedFile]) -> Result<()> {
    let stdout = io::stdout();
    let handle = stdout.lock();
    let mut writer = csv::Writer::from_writer(handle);
    write_result_rows(analyzed, &mut writer)
}

fn write_results_csv(analyzed: &[AnalyzedFile], path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_result_rows(analyzed, &mut writer)
}

fn write_result_rows<W: Write>(analyzed: &[AnalyzedFile], writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "file",
        "column",
        "uptime_pct",
        "downtime_pct",
        "uptime_min",
        "downtime_min",
        "unknown_min",
    ])?;

    for file in analyzed {
        let name = file.name();
        for r in &file.report.columns {
            writer.write_record([
                name.clone(),
                r.column_id.clone(),
                format!("{:.3}", r.uptime_pct),
                format!("{:.3}", r.downtime_pct),
                format!("{:.3}", r.uptime_minutes),
                format!("{:.3}", r.downtime_minutes),
                format!("{:.3}", r.unknown_minutes),
            ])?;
        }
    }

    writer.flush()?;
    Ok(())
}

fn write_json_report(analyzed: &[AnalyzedFile], path: &Path) -> Result<()> {
    let reports: Vec<JsonFileReport> = analyzed
        .iter()
        .map(|file| JsonFileReport {
            file: file.name(),
            columns: &file.report.columns,
            diagnostics: &file.report.diagnostics,
        })
        .collect();
    let text = serde_json::to_string_pretty(&reports)?;
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[derive(Default, Clone)]
struct ColumnStats {
    parsed: usize,
    unparseable: usize,
    empty: usize,
    min: Option<f64>,
    max: Option<f64>,
}

impl ColumnStats {
    fn record(&mut self, cell: &Cell) {
        if cell.is_empty() {
            self.empty += 1;
            return;
        }
        match parse_value(cell) {
            Some(v) => {
                self.parsed += 1;
                self.min = Some(self.min.map_or(v, |m| m.min(v)));
                self.max = Some(self.max.map_or(v, |m| m.max(v)));
            }
            None => self.unparseable += 1,
        }
    }
}

fn handle_inspect(args: InspectArgs) -> Result<()> {
    let params = resolve_params(&args.params)?;
    let mut report = String::new();
    for path in &args.inputs {
        let table = load_table(path)?;
        report.push_str(&inspect_table(path, &table, &params));
        report.push('\n');
    }

    if args.output.as_os_str() == "-" {
        io::stdout().write_all(report.as_bytes())?;
    } else {
        fs::write(&args.output, report)
            .with_context(|| format!("failed to write {}", args.output.display()))?;
        info!("Diagnostic report written: {}", args.output.display());
    }
    Ok(())
}

fn inspect_table(path: &Path, table: &Table, params: &Params) -> String {
    let mut out = String::new();
    out.push_str(&format!("FILE: {}\n", path.display()));
    out.push_str(&format!("  columns: {}\n", table.width()));
    for (idx, header) in table.headers.iter().enumerate() {
        let role = if idx == 0 {
            "time"
        } else if idx < params.max_columns {
            "value"
        } else {
            "ignored"
        };
        out.push_str(&format!("    [{}] {} ({})\n", idx, header, role));
    }
    out.push_str(&format!("  rows: {}\n", table.rows.len()));

    if table.width() < 2 {
        out.push_str("  error: a time column and at least one value column are required\n");
        return out;
    }

    let axis = match build_time_axis(table, params) {
        Ok(axis) => axis,
        Err(err) => {
            out.push_str(&format!("  error: {}\n", err));
            return out;
        }
    };
    let diag = &axis.diagnostics;
    out.push_str(&format!("  rows_missing_time: {}\n", diag.rows_missing_time));
    out.push_str(&format!("  rows_bad_time: {}\n", diag.rows_bad_time));
    out.push_str(&format!(
        "  duplicate_timestamps: {}\n",
        diag.duplicate_rows_dropped
    ));
    out.push_str(&format!("  retained_rows: {}\n", axis.len()));
    if let (Some(first), Some(last)) = (axis.entries.first(), axis.entries.last()) {
        out.push_str(&format!("  first_timestamp: {}\n", first.1));
        out.push_str(&format!("  last_timestamp: {}\n", last.1));
        out.push_str(&format!("  timespan_min: {:.1}\n", diag.span_minutes));
    }

    let value_columns = table.width().min(params.max_columns);
    let mut gaps: BTreeSet<i64> = BTreeSet::new();
    for &(_, _, minutes) in axis.entries.iter().skip(1) {
        gaps.insert((minutes * 60.0).round() as i64);
    }
    if !gaps.is_empty() {
        let shown: Vec<String> = gaps.iter().take(5).map(|s| format!("{}s", s)).collect();
        out.push_str(&format!(
            "  sampling_intervals: {}{}\n",
            shown.join(", "),
            if gaps.len() > 5 { ", ..." } else { "" }
        ));
    }

    out.push_str("  value_columns:\n");
    for col in 1..value_columns {
        let mut stats = ColumnStats::default();
        for &(row, _, _) in &axis.entries {
            stats.record(table.cell(row, col));
        }
        out.push_str(&format!(
            "    - {}: parsed={}, unparseable={}, empty={}, min={}, max={}\n",
            table.headers[col],
            stats.parsed,
            stats.unparseable,
            stats.empty,
            stats.min.map_or("n/a".into(), |v| format!("{:.3}", v)),
            stats.max.map_or("n/a".into(), |v| format!("{:.3}", v))
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, up: f64, down: f64, unknown: f64) -> ColumnResult {
        let total = up + down;
        ColumnResult {
            column_id: id.into(),
            uptime_minutes: up,
            downtime_minutes: down,
            unknown_minutes: unknown,
            uptime_pct: 100.0 * up / total,
            downtime_pct: 100.0 * down / total,
        }
    }

    #[test]
    fn summary_lists_both_states() {
        let text = format_summary("bct.xlsx", &[result("Rack 1", 1.0, 6.0, 0.0)]);
        assert!(text.starts_with("bct.xlsx\n"));
        assert!(text.contains("  Rack 1:\n"));
        assert!(text.contains("Downtime:  85.71% (6.0 minutes)"));
        assert!(text.contains("Uptime:    14.29% (1.0 minutes)"));
        assert!(!text.contains("Unreadable"));
    }

    #[test]
    fn summary_mentions_unreadable_time() {
        let text = format_summary("bct.csv", &[result("Rack 2", 3.0, 1.0, 2.5)]);
        assert!(text.contains("Unreadable: 2.5 minutes not classified"));
    }

    #[test]
    fn chart_paths_get_input_suffix_when_several() {
        let base = Path::new("out/uptime.png");
        assert_eq!(
            chart_path(base, Path::new("data/a.xlsx"), false),
            PathBuf::from("out/uptime.png")
        );
        assert_eq!(
            chart_path(base, Path::new("data/a.xlsx"), true),
            PathBuf::from("out/uptime_a.png")
        );
    }

    #[test]
    fn config_file_is_overridden_by_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"threshold": -3.0, "max_columns": 3}}"#).unwrap();
        let args = ParamArgs {
            config: Some(file.path().to_path_buf()),
            max_columns: Some(4),
            ..ParamArgs::default()
        };
        let params = resolve_params(&args).unwrap();
        assert_eq!(params.threshold, -3.0);
        assert_eq!(params.max_columns, 4);
        assert_eq!(params.first_row_minutes, 1.0);
    }

    #[test]
    fn invalid_override_is_rejected() {
        let args = ParamArgs {
            max_columns: Some(1),
            ..ParamArgs::default()
        };
        assert!(resolve_params(&args).is_err());
    }

    #[test]
    fn results_csv_has_one_row_per_column() {
        let analyzed = vec![AnalyzedFile {
            path: PathBuf::from("dir/bct.csv"),
            report: UptimeReport {
                columns: vec![
                    result("Rack 1", 1.0, 6.0, 0.0),
                    result("Rack 2", 2.0, 2.0, 1.0),
                ],
                diagnostics: TableDiagnostics::default(),
            },
        }];
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_result_rows(&analyzed, &mut writer).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "file,column,uptime_pct,downtime_pct,uptime_min,downtime_min,unknown_min"
        );
        assert_eq!(
            lines[1],
            "bct.csv,Rack 1,14.286,85.714,1.000,6.000,0.000"
        );
        assert!(lines[2].starts_with("bct.csv,Rack 2,50.000,50.000"));
    }

    #[test]
    fn analyze_writes_csv_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bct.csv");
        fs::write(
            &input,
            "time,Rack 1\n2024-05-01 08:00,-10\n2024-05-01 08:01,-2\n2024-05-01 08:06,-10\n",
        )
        .unwrap();
        let output = dir.path().join("result.csv");
        let json = dir.path().join("result.json");
        let args = AnalyzeArgs {
            inputs: vec![input],
            output: output.clone(),
            json: Some(json.clone()),
            png: None,
            svg: None,
            no_plot: true,
            quiet: true,
            params: ParamArgs::default(),
            verbose: false,
            profile: false,
        };
        handle_analyze(args).unwrap();

        let csv_text = fs::read_to_string(&output).unwrap();
        assert!(csv_text.contains("bct.csv,Rack 1,14.286,85.714,1.000,6.000,0.000"));
        let report: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(report[0]["file"], "bct.csv");
        assert_eq!(report[0]["columns"][0]["downtime_minutes"], 6.0);
        assert_eq!(report[0]["diagnostics"]["rows_read"], 3);
    }

    #[test]
    fn analyze_fails_without_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.csv");
        let bad = dir.path().join("bad.csv");
        fs::write(&good, "time,Rack\n2024-05-01 08:00,1\n").unwrap();
        fs::write(&bad, "time\n2024-05-01 08:00\n").unwrap();
        let output = dir.path().join("result.csv");
        let args = AnalyzeArgs {
            inputs: vec![good, bad],
            output: output.clone(),
            json: None,
            png: None,
            svg: None,
            no_plot: true,
            quiet: true,
            params: ParamArgs::default(),
            verbose: false,
            profile: false,
        };
        let err = handle_analyze(args).unwrap_err();
        assert!(format!("{:#}", err).contains("bad.csv"));
        assert!(!output.exists());
    }

    #[test]
    fn inspect_reports_columns_and_dropped_rows() {
        let table = parse_table(
            b"time,Rack 1,Rack 2\n2024-05-01 08:00,-10,N/A\n,1,1\n2024-05-01 08:05,\"-3,5\",\n2024-05-01 08:05,0,0\n",
            "csv",
        )
        .unwrap();
        let text = inspect_table(Path::new("bct.csv"), &table, &Params::default());
        assert!(text.contains("[0] time (time)"));
        assert!(text.contains("[2] Rack 2 (value)"));
        assert!(text.contains("rows_missing_time: 1"));
        assert!(text.contains("duplicate_timestamps: 1"));
        assert!(text.contains("sampling_intervals: 300s"));
        assert!(text.contains(
            "- Rack 1: parsed=2, unparseable=0, empty=0, min=-10.000, max=-3.500"
        ));
        assert!(text.contains("- Rack 2: parsed=0, unparseable=1, empty=1"));
    }

    #[test]
    fn inspect_reports_unparseable_time_column() {
        let table = parse_table(b"when,Rack\nmonday,1\n", "csv").unwrap();
        let text = inspect_table(Path::new("x.csv"), &table, &Params::default());
        assert!(text.contains("error: time column 'when'"));
    }
}
