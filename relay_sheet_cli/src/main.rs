use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand, ValueEnum, ValueHint};
use plotters::coord::Shift;
use plotters::prelude::*;
use relay_sheet::format::{
    format_hms, format_pace, format_race_local_friendly, parse_pace, parse_race_local, parse_utc,
};
use relay_sheet::replica::{LocalReplica, QueuedWrite};
use relay_sheet::store::{import_leg_ops, pace_edit_ops, seed_snapshot, MemoryStore, SheetStore};
use relay_sheet::{derive_sheet, validate, LegImportRow, SheetView, Snapshot, WriteOp};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay planning sheet CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose logging
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a freshly seeded sheet snapshot
    Seed(SeedArgs),
    /// Derive the sheet and print it as CSV or JSON
    Table(TableArgs),
    /// Bulk-import leg course facts from CSV
    ImportLegs(ImportLegsArgs),
    /// Edit one leg's estimated pace (cascades on first-rotation legs)
    SetPace(SetPaceArgs),
    /// Record or clear one leg's actual start time
    SetStart(SetStartArgs),
    /// Set or clear the race start and finish anchors
    Config(ConfigArgs),
    /// Replay a queued offline edit file against a snapshot
    Sync(SyncArgs),
    /// Render schedule charts from a snapshot
    Chart(ChartArgs),
}

#[derive(Parser, Debug)]
struct SeedArgs {
    /// Snapshot path to create
    #[arg(short, long, default_value = "sheet.json", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Overwrite an existing snapshot
    #[arg(long, action = ArgAction::SetTrue)]
    force: bool,
}

#[derive(Parser, Debug)]
struct TableArgs {
    /// Sheet snapshot to derive
    #[arg(value_hint = ValueHint::FilePath)]
    snapshot: PathBuf,

    /// Output path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Emit the full derived view as JSON instead of CSV
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Parser, Debug)]
struct ImportLegsArgs {
    /// Sheet snapshot to update
    #[arg(value_hint = ValueHint::FilePath)]
    snapshot: PathBuf,

    /// CSV of leg facts (leg, mileage_mi, elev_gain_ft, elev_loss_ft,
    /// net_elev_diff_ft, exchange_label, exchange_url)
    #[arg(value_hint = ValueHint::FilePath)]
    csv: PathBuf,
}

#[derive(Parser, Debug)]
struct SetPaceArgs {
    /// Sheet snapshot to update
    #[arg(value_hint = ValueHint::FilePath)]
    snapshot: PathBuf,

    /// Leg number (1..=36)
    #[arg(long)]
    leg: u8,

    /// Pace as `MM:SS` or seconds per mile; omit to clear
    #[arg(long)]
    pace: Option<String>,
}

#[derive(Parser, Debug)]
struct SetStartArgs {
    /// Sheet snapshot to update
    #[arg(value_hint = ValueHint::FilePath)]
    snapshot: PathBuf,

    /// Leg number (1..=36)
    #[arg(long)]
    leg: u8,

    /// Start as race-local `YYYY-MM-DDTHH:MM`, RFC 3339, or `now`; omit to clear
    #[arg(long)]
    at: Option<String>,
}

#[derive(Parser, Debug)]
struct ConfigArgs {
    /// Sheet snapshot to update
    #[arg(value_hint = ValueHint::FilePath)]
    snapshot: PathBuf,

    /// Race start (race-local `YYYY-MM-DDTHH:MM` or RFC 3339)
    #[arg(long)]
    race_start: Option<String>,

    /// Finish time (race-local `YYYY-MM-DDTHH:MM` or RFC 3339)
    #[arg(long)]
    finish: Option<String>,

    /// Clear the race start
    #[arg(long, action = ArgAction::SetTrue)]
    clear_race_start: bool,

    /// Clear the finish time
    #[arg(long, action = ArgAction::SetTrue)]
    clear_finish: bool,
}

#[derive(Parser, Debug)]
struct SyncArgs {
    /// Sheet snapshot to replay into
    #[arg(value_hint = ValueHint::FilePath)]
    snapshot: PathBuf,

    /// Queued offline edits (JSON list of pending writes)
    #[arg(value_hint = ValueHint::FilePath)]
    queue: PathBuf,
}

#[derive(Parser, Debug)]
struct ChartArgs {
    /// Sheet snapshot to chart
    #[arg(value_hint = ValueHint::FilePath)]
    snapshot: PathBuf,

    /// Chart flavor
    #[arg(long, value_enum, default_value_t = ChartKind::Durations)]
    kind: ChartKind,

    /// Output PNG figure path
    #[arg(long, value_hint = ValueHint::FilePath)]
    png: Option<PathBuf>,

    /// Output SVG figure path
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ChartKind {
    /// Estimated vs actual leg durations
    Durations,
    /// Drift of actual starts against the pre-race plan
    Drift,
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

    match cli.command {
        Command::Seed(args) => handle_seed(args),
        Command::Table(args) => handle_table(args),
        Command::ImportLegs(args) => handle_import_legs(args),
        Command::SetPace(args) => handle_set_pace(args),
        Command::SetStart(args) => handle_set_start(args),
        Command::Config(args) => handle_config(args),
        Command::Sync(args) => handle_sync(args),
        Command::Chart(args) => handle_chart(args),
    }
}

fn load_snapshot(path: &Path) -> Result<Snapshot> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let snapshot: Snapshot = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    validate(&snapshot).with_context(|| format!("malformed snapshot {}", path.display()))?;
    Ok(snapshot)
}

fn save_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn handle_seed(args: SeedArgs) -> Result<()> {
    if args.output.exists() && !args.force {
        return Err(anyhow!(
            "{} already exists (use --force to overwrite)",
            args.output.display()
        ));
    }
    save_snapshot(&args.output, &seed_snapshot())?;
    info!("seeded sheet at {}", args.output.display());
    Ok(())
}

fn handle_table(args: TableArgs) -> Result<()> {
    let snapshot = load_snapshot(&args.snapshot)?;
    let view = derive_sheet(&snapshot);

    if args.json {
        if args.output.as_path() == Path::new("-") {
            serde_json::to_writer_pretty(io::stdout().lock(), &view)?;
            println!();
        } else {
            let file = fs::File::create(&args.output)
                .with_context(|| format!("failed to create {}", args.output.display()))?;
            serde_json::to_writer_pretty(file, &view)?;
        }
        return Ok(());
    }

    if args.output.as_path() == Path::new("-") {
        let mut writer = csv::Writer::from_writer(io::stdout().lock());
        write_table_rows(&view, &mut writer)?;
    } else {
        let mut writer = csv::Writer::from_path(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        write_table_rows(&view, &mut writer)?;
        info!("wrote table to {}", args.output.display());
    }
    Ok(())
}

fn write_table_rows<W: Write>(view: &SheetView, writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "leg",
        "van",
        "runner",
        "name",
        "mileage_mi",
        "elev_gain_ft",
        "elev_loss_ft",
        "net_elev_diff_ft",
        "estimated_pace",
        "estimated_duration",
        "initial_start",
        "updated_start",
        "actual_start",
        "actual_pace",
        "delta_to_plan",
        "estimated_van_stint",
        "actual_van_stint",
        "exchange_label",
        "exchange_url",
        "override",
    ])?;
    for row in &view.rows {
        writer.write_record([
            row.leg.to_string(),
            relay_sheet::van_for_leg(row.leg).to_string(),
            row.runner_number.to_string(),
            row.runner_name.clone(),
            format!("{:.2}", row.mileage_mi),
            row.elev_gain_ft.to_string(),
            row.elev_loss_ft.to_string(),
            row.net_elev_diff_ft.to_string(),
            format_pace(row.effective_pace_spm),
            format_hms(row.estimated_duration_sec),
            format_race_local_friendly(row.initial_estimated_start),
            format_race_local_friendly(row.updated_estimated_start),
            format_race_local_friendly(row.actual_start_time),
            format_pace(row.actual_pace_spm),
            format_hms(row.delta_to_estimate_sec),
            format_hms(row.estimated_van_stint_sec),
            format_hms(row.actual_van_stint_sec),
            row.exchange_label.clone(),
            row.exchange_url.clone(),
            if row.is_override { "yes" } else { "" }.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn handle_import_legs(args: ImportLegsArgs) -> Result<()> {
    let mut snapshot = load_snapshot(&args.snapshot)?;

    let mut reader = csv::Reader::from_path(&args.csv)
        .with_context(|| format!("failed to open {}", args.csv.display()))?;
    let mut rows: Vec<LegImportRow> = Vec::new();
    for record in reader.deserialize() {
        let row: LegImportRow =
            record.with_context(|| format!("invalid row in {}", args.csv.display()))?;
        rows.push(row);
    }
    if rows.is_empty() {
        return Err(anyhow!("{} contained no leg rows", args.csv.display()));
    }

    let ops = import_leg_ops(&rows)?;
    let mut store = MemoryStore::new(snapshot)?;
    for op in &ops {
        store.apply(op)?;
    }
    snapshot = store.load()?;
    save_snapshot(&args.snapshot, &snapshot)?;
    info!("imported {} leg rows into {}", rows.len(), args.snapshot.display());
    Ok(())
}

fn handle_set_pace(args: SetPaceArgs) -> Result<()> {
    let snapshot = load_snapshot(&args.snapshot)?;
    let pace = match args.pace.as_deref() {
        Some(raw) => Some(
            parse_pace(raw).ok_or_else(|| anyhow!("could not parse pace {raw:?}"))?,
        ),
        None => None,
    };

    let ops = pace_edit_ops(&snapshot, args.leg, pace)?;
    let mut store = MemoryStore::new(snapshot)?;
    for op in &ops {
        store.apply(op)?;
    }
    save_snapshot(&args.snapshot, store.snapshot())?;
    info!("updated pace for leg {} ({} writes)", args.leg, ops.len());
    Ok(())
}

fn resolve_instant(raw: &str) -> Result<chrono::DateTime<Utc>> {
    if raw.eq_ignore_ascii_case("now") {
        return Ok(Utc::now());
    }
    parse_race_local(raw)
        .or_else(|| parse_utc(raw))
        .ok_or_else(|| anyhow!("could not parse instant {raw:?}"))
}

fn handle_set_start(args: SetStartArgs) -> Result<()> {
    let snapshot = load_snapshot(&args.snapshot)?;
    let at = match args.at.as_deref() {
        Some(raw) => Some(resolve_instant(raw)?),
        None => None,
    };

    let mut store = MemoryStore::new(snapshot)?;
    store.apply(&WriteOp::ActualStart {
        leg: args.leg,
        actual_start_time: at,
    })?;
    save_snapshot(&args.snapshot, store.snapshot())?;
    match at {
        Some(at) => info!("leg {} started at {}", args.leg, at.to_rfc3339()),
        None => info!("cleared actual start for leg {}", args.leg),
    }
    Ok(())
}

fn handle_config(args: ConfigArgs) -> Result<()> {
    if args.race_start.is_some() && args.clear_race_start {
        return Err(anyhow!("--race-start conflicts with --clear-race-start"));
    }
    if args.finish.is_some() && args.clear_finish {
        return Err(anyhow!("--finish conflicts with --clear-finish"));
    }

    let snapshot = load_snapshot(&args.snapshot)?;
    let mut store = MemoryStore::new(snapshot)?;
    let mut touched = false;

    if args.clear_race_start || args.race_start.is_some() {
        let at = args
            .race_start
            .as_deref()
            .map(resolve_instant)
            .transpose()?;
        store.apply(&WriteOp::RaceStart {
            race_start_time: at,
        })?;
        touched = true;
    }
    if args.clear_finish || args.finish.is_some() {
        let at = args.finish.as_deref().map(resolve_instant).transpose()?;
        store.apply(&WriteOp::FinishTime { finish_time: at })?;
        touched = true;
    }
    if !touched {
        return Err(anyhow!("nothing to do: pass --race-start/--finish or a clear flag"));
    }
    save_snapshot(&args.snapshot, store.snapshot())?;
    info!("updated race config in {}", args.snapshot.display());
    Ok(())
}

fn handle_sync(args: SyncArgs) -> Result<()> {
    let snapshot = load_snapshot(&args.snapshot)?;
    let data = fs::read_to_string(&args.queue)
        .with_context(|| format!("failed to read {}", args.queue.display()))?;
    let queued: Vec<QueuedWrite> = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse {}", args.queue.display()))?;
    if queued.is_empty() {
        info!("queue {} is empty, nothing to replay", args.queue.display());
        return Ok(());
    }

    let mut replica = LocalReplica::new();
    for item in queued {
        replica.apply_local(item.op, item.queued_at)?;
    }

    let mut store = MemoryStore::new(snapshot)?;
    let summary = replica.replay(&mut store);
    save_snapshot(&args.snapshot, store.snapshot())?;
    fs::write(&args.queue, serde_json::to_string_pretty(replica.pending())?)
        .with_context(|| format!("failed to write {}", args.queue.display()))?;

    info!(
        "replayed {} writes into {}",
        summary.applied,
        args.snapshot.display()
    );
    if summary.retained > 0 {
        warn!(
            "{} writes were rejected and retained in {}",
            summary.retained,
            args.queue.display()
        );
    }
    Ok(())
}

fn handle_chart(args: ChartArgs) -> Result<()> {
    let snapshot = load_snapshot(&args.snapshot)?;
    let view = derive_sheet(&snapshot);

    let png = args.png.clone().or_else(|| {
        if args.svg.is_none() {
            Some(PathBuf::from("sheet_chart.png"))
        } else {
            None
        }
    });

    if let Some(path) = png.as_deref() {
        let root = BitMapBackend::new(path, (1280, 720)).into_drawing_area();
        draw_chart(&root, &view, args.kind)?;
        root.present()
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("wrote chart to {}", path.display());
    }
    if let Some(path) = args.svg.as_deref() {
        let root = SVGBackend::new(path, (1280, 720)).into_drawing_area();
        draw_chart(&root, &view, args.kind)?;
        root.present()
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("wrote chart to {}", path.display());
    }
    Ok(())
}

fn draw_chart<DB>(
    root: &DrawingArea<DB, Shift>,
    view: &SheetView,
    kind: ChartKind,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    match kind {
        ChartKind::Durations => draw_durations_chart(root, view),
        ChartKind::Drift => draw_drift_chart(root, view),
    }
}

fn draw_durations_chart<DB>(root: &DrawingArea<DB, Shift>, view: &SheetView) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE).map_err(|e| anyhow!("chart: {e}"))?;

    let estimated: Vec<(i32, f64)> = series_minutes(view, |row| row.estimated_duration_sec);
    let actual: Vec<(i32, f64)> = series_minutes(view, |row| row.actual_duration_sec);
    let y_max = estimated
        .iter()
        .chain(actual.iter())
        .map(|&(_, minutes)| minutes)
        .fold(10.0_f64, f64::max);

    let mut chart = ChartBuilder::on(root)
        .caption("Leg durations", ("sans-serif", 28))
        .margin(12)
        .x_label_area_size(40)
        .y_label_area_size(56)
        .build_cartesian_2d(0..37, 0.0..y_max * 1.1)
        .map_err(|e| anyhow!("chart: {e}"))?;
    chart
        .configure_mesh()
        .x_desc("Leg")
        .y_desc("Duration (min)")
        .draw()
        .map_err(|e| anyhow!("chart: {e}"))?;

    chart
        .draw_series(LineSeries::new(estimated.clone(), &BLUE))
        .map_err(|e| anyhow!("chart: {e}"))?
        .label("Estimated")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 16, y)], BLUE));
    chart
        .draw_series(
            estimated
                .iter()
                .map(|&(x, y)| Circle::new((x, y), 2, BLUE.filled())),
        )
        .map_err(|e| anyhow!("chart: {e}"))?;
    if !actual.is_empty() {
        chart
            .draw_series(LineSeries::new(actual.clone(), &RED))
            .map_err(|e| anyhow!("chart: {e}"))?
            .label("Actual")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 16, y)], RED));
        chart
            .draw_series(
                actual
                    .iter()
                    .map(|&(x, y)| Circle::new((x, y), 2, RED.filled())),
            )
            .map_err(|e| anyhow!("chart: {e}"))?;
    }

    chart
        .configure_series_labels()
        .border_style(BLACK)
        .background_style(WHITE.mix(0.85))
        .draw()
        .map_err(|e| anyhow!("chart: {e}"))?;
    Ok(())
}

fn draw_drift_chart<DB>(root: &DrawingArea<DB, Shift>, view: &SheetView) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE).map_err(|e| anyhow!("chart: {e}"))?;

    let drift: Vec<(i32, f64)> = series_minutes(view, |row| row.delta_to_estimate_sec);
    let y_extent = drift
        .iter()
        .map(|&(_, minutes)| minutes.abs())
        .fold(5.0_f64, f64::max);

    let mut chart = ChartBuilder::on(root)
        .caption("Drift vs pre-race plan", ("sans-serif", 28))
        .margin(12)
        .x_label_area_size(40)
        .y_label_area_size(56)
        .build_cartesian_2d(0..37, -y_extent * 1.1..y_extent * 1.1)
        .map_err(|e| anyhow!("chart: {e}"))?;
    chart
        .configure_mesh()
        .x_desc("Leg")
        .y_desc("Drift (min, late is positive)")
        .draw()
        .map_err(|e| anyhow!("chart: {e}"))?;

    chart
        .draw_series(LineSeries::new(vec![(0, 0.0), (37, 0.0)], &BLACK.mix(0.4)))
        .map_err(|e| anyhow!("chart: {e}"))?;
    if !drift.is_empty() {
        chart
            .draw_series(LineSeries::new(drift.clone(), &RED))
            .map_err(|e| anyhow!("chart: {e}"))?;
        chart
            .draw_series(
                drift
                    .iter()
                    .map(|&(x, y)| Circle::new((x, y), 3, RED.filled())),
            )
            .map_err(|e| anyhow!("chart: {e}"))?;
    }
    Ok(())
}

fn series_minutes<F>(view: &SheetView, field: F) -> Vec<(i32, f64)>
where
    F: Fn(&relay_sheet::DerivedRow) -> Option<i64>,
{
    view.rows
        .iter()
        .filter_map(|row| field(row).map(|sec| (i32::from(row.leg), sec as f64 / 60.0)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_csv_headers_match_row_shape() {
        let data = "leg,mileage_mi,elev_gain_ft,elev_loss_ft,net_elev_diff_ft,exchange_label,exchange_url\n\
                    1,5.44,257,-1368,-1111,Timberline Lodge,https://maps.example/timberline\n";
        let mut reader = csv::Reader::from_reader(data.as_bytes());
        let rows: Vec<LegImportRow> = reader
            .deserialize()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].leg, 1);
        assert_eq!(rows[0].exchange_label, "Timberline Lodge");
    }

    #[test]
    fn instants_resolve_from_both_shapes() {
        assert!(resolve_instant("2026-08-28T06:00").is_ok());
        assert!(resolve_instant("2026-08-28T13:00:00Z").is_ok());
        assert!(resolve_instant("not a time").is_err());
    }
}
