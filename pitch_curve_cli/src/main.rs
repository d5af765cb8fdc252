use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use pitch_curve::{
    assign_pitch_order, detect_events, fetch_event_inputs, velocity_bounds, CentralStat,
    CohortAggregate, CohortEvents, CohortFilter, CohortReport, EventKind, Handedness,
    InMemoryStore, Params, Signal, SignalFamily, StoreRow, Take, TakeId, TimeUnit,
};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Pitching event detection and cohort curve CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect BR/MER/PKH/foot plant events for every take in a cohort
    Events(EventsArgs),
    /// Normalize and aggregate signals for a cohort
    Curves(CurvesArgs),
    /// List the signal catalog
    Signals(SignalsArgs),
}

#[derive(Args, Debug)]
struct CohortArgs {
    /// Sample CSV (take_id,category,segment,frame,x,y,z)
    #[arg(long, value_hint = ValueHint::FilePath)]
    samples: PathBuf,

    /// Take CSV (take_id,handedness,session_date,pitch_velocity_mph)
    #[arg(long, value_hint = ValueHint::FilePath)]
    takes: PathBuf,

    /// Session dates to include (YYYY-MM-DD, repeatable; default all)
    #[arg(long = "date", value_parser = parse_date)]
    dates: Vec<NaiveDate>,

    /// Minimum pitch velocity (mph)
    #[arg(long)]
    min_velocity: Option<f64>,

    /// Maximum pitch velocity (mph)
    #[arg(long)]
    max_velocity: Option<f64>,

    /// Take ids to exclude (comma separated)
    #[arg(long)]
    exclude: Option<String>,

    /// Optional parameter JSON, applied before any per-command flags
    #[arg(long, value_hint = ValueHint::FilePath)]
    params: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Profile major stages with timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Parser, Debug)]
struct EventsArgs {
    #[command(flatten)]
    cohort: CohortArgs,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "events.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Parser, Debug)]
struct CurvesArgs {
    #[command(flatten)]
    cohort: CohortArgs,

    /// Signals to aggregate (keys, comma separated; `kinematic` or `all` for groups)
    #[arg(long = "signal", default_value = "kinematic")]
    signals: Vec<String>,

    /// Central statistic for grouped curves
    #[arg(long, value_enum)]
    stat: Option<StatOpt>,

    /// Report times in milliseconds instead of frames
    #[arg(long, action = ArgAction::SetTrue)]
    ms: bool,

    /// Disable Savitzky–Golay smoothing of grouped curves
    #[arg(long, action = ArgAction::SetTrue)]
    no_smooth: bool,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "curves.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Optional JSON path for the full cohort report
    #[arg(long, value_hint = ValueHint::FilePath)]
    json: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct SignalsArgs {
    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum StatOpt {
    Mean,
    Median,
}

impl From<StatOpt> for CentralStat {
    fn from(value: StatOpt) -> Self {
        match value {
            StatOpt::Mean => CentralStat::Mean,
            StatOpt::Median => CentralStat::Median,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Events(args) => args.cohort.verbose,
        Command::Curves(args) => args.cohort.verbose,
        Command::Signals(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Events(args) => handle_events(args),
        Command::Curves(args) => handle_curves(args),
        Command::Signals(_) => handle_signals(),
    }
}

struct Cohort {
    store: InMemoryStore,
    takes: Vec<Take>,
}

fn load_cohort(args: &CohortArgs) -> Result<Cohort> {
    let t_load = Instant::now();
    let catalog = load_takes(&args.takes)?;
    let store = load_samples(&args.samples)?;

    let filter = CohortFilter {
        dates: if args.dates.is_empty() {
            None
        } else {
            Some(args.dates.iter().copied().collect())
        },
        velocity_min: args.min_velocity,
        velocity_max: args.max_velocity,
        excluded: match args.exclude.as_deref() {
            Some(list) => parse_id_list(list)?,
            None => BTreeSet::new(),
        },
    };
    let takes = filter.select(&catalog);
    if takes.is_empty() {
        warn!(
            "No takes found for this selection ({} in catalog)",
            catalog.len()
        );
    }
    let unknown = takes.iter().filter(|t| t.handedness.is_none()).count();
    if unknown > 0 {
        warn!("{} takes have no recognized handedness and will be skipped", unknown);
    }
    if let Some((lo, hi)) = velocity_bounds(&takes) {
        info!(
            "Cohort: {} takes, velocity {:.1}-{:.1} mph",
            takes.len(),
            lo,
            hi
        );
    } else {
        info!("Cohort: {} takes", takes.len());
    }
    if args.profile || args.verbose {
        info!(
            "Load stage: {:.1} ms ({} samples)",
            t_load.elapsed().as_secs_f64() * 1000.0,
            store.len()
        );
    }
    Ok(Cohort { store, takes })
}

fn handle_events(args: EventsArgs) -> Result<()> {
    let params = resolve_params(args.cohort.params.as_deref())?;
    let cohort = load_cohort(&args.cohort)?;

    let t_detect = Instant::now();
    let handedness: BTreeMap<TakeId, Handedness> = cohort
        .takes
        .iter()
        .filter_map(|t| t.handedness.map(|h| (t.id, h)))
        .collect();
    let inputs = fetch_event_inputs(&cohort.store, &cohort.takes);
    let events = detect_events(&inputs, &handedness, &params);
    if args.cohort.profile || args.cohort.verbose {
        info!(
            "Detect stage: {:.1} ms",
            t_detect.elapsed().as_secs_f64() * 1000.0
        );
    }
    let missing_br = cohort.takes.len() - events.br.len();
    if missing_br > 0 {
        warn!("{} takes have no ball release and are excluded downstream", missing_br);
    }

    with_csv_output(&args.output, |writer| {
        write_event_rows(&cohort.takes, &events, writer)
    })?;
    info!("Wrote events CSV: {}", display_target(&args.output));
    Ok(())
}

fn handle_curves(args: CurvesArgs) -> Result<()> {
    let mut params = resolve_params(args.cohort.params.as_deref())?;
    if let Some(stat) = args.stat {
        params.central = stat.into();
    }
    if args.ms {
        params.time_unit = TimeUnit::Milliseconds;
    }
    if args.no_smooth {
        params.smooth = false;
    }
    params.validate()?;

    let signals = parse_signal_list(&args.signals)?;
    let cohort = load_cohort(&args.cohort)?;

    let t_compute = Instant::now();
    let report = pitch_curve::run_cohort(&cohort.store, &cohort.takes, &signals, &params)?;
    if args.cohort.profile || args.cohort.verbose {
        info!(
            "Compute stage: {:.1} ms ({} signals)",
            t_compute.elapsed().as_secs_f64() * 1000.0,
            report.signals.len()
        );
    }
    info!(
        "Window {}..{} frames ({} takes with BR)",
        report.window.start,
        report.window.end,
        report.events.br.len()
    );
    if !report.window.from_foot_plant {
        warn!("No zero-cross foot plant in cohort; fallback window used");
    }

    let t_csv = Instant::now();
    with_csv_output(&args.output, |writer| write_curve_rows(&report, writer))?;
    if args.cohort.profile || args.cohort.verbose {
        info!(
            "CSV stage: {:.1} ms",
            t_csv.elapsed().as_secs_f64() * 1000.0
        );
    }
    info!("Wrote curve CSV: {}", display_target(&args.output));

    if let Some(path) = args.json.as_ref() {
        let text = serde_json::to_string_pretty(&report)?;
        fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote report JSON: {}", path.display());
    }
    Ok(())
}

fn handle_signals() -> Result<()> {
    let stdout = io::stdout();
    let mut writer = csv::Writer::from_writer(stdout.lock());
    write_signal_rows(&mut writer)
}

#[derive(Debug, Deserialize)]
struct TakeRecord {
    take_id: i64,
    #[serde(default)]
    handedness: String,
    session_date: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pitch_velocity_mph: Option<f64>,
}

fn load_takes(path: &Path) -> Result<Vec<Take>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut takes = Vec::new();
    for (line, record) in reader.deserialize::<TakeRecord>().enumerate() {
        let record =
            record.with_context(|| format!("{}: bad take row {}", path.display(), line + 2))?;
        let session_date = NaiveDate::parse_from_str(&record.session_date, "%Y-%m-%d")
            .with_context(|| {
                format!(
                    "{}: invalid session_date '{}' on row {}",
                    path.display(),
                    record.session_date,
                    line + 2
                )
            })?;
        takes.push(Take {
            id: TakeId(record.take_id),
            handedness: Handedness::parse(&record.handedness),
            session_date,
            pitch_velocity_mph: record.pitch_velocity_mph,
        });
    }
    Ok(takes)
}

fn load_samples(path: &Path) -> Result<InMemoryStore> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let rows = reader
        .deserialize::<StoreRow>()
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(InMemoryStore::from_rows(rows))
}

fn resolve_params(path: Option<&Path>) -> Result<Params> {
    let params = match path {
        Some(path) => load_params(path)?,
        None => Params::default(),
    };
    params.validate()?;
    Ok(params)
}

fn load_params(path: &Path) -> Result<Params> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read params {}", path.display()))?;
    Params::from_json_str(&text).with_context(|| format!("invalid params in {}", path.display()))
}

fn parse_date(input: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}': expected YYYY-MM-DD", input))
}

fn parse_id_list(input: &str) -> Result<BTreeSet<TakeId>> {
    let mut out = BTreeSet::new();
    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let id: i64 = trimmed
            .parse()
            .with_context(|| format!("invalid take id '{}'", trimmed))?;
        out.insert(TakeId(id));
    }
    Ok(out)
}

fn parse_signal_list(inputs: &[String]) -> Result<Vec<Signal>> {
    let mut out: Vec<Signal> = Vec::new();
    let mut push = |signal: Signal| {
        if !out.contains(&signal) {
            out.push(signal);
        }
    };
    for token in inputs.iter().flat_map(|s| s.split(',')) {
        let trimmed = token.trim();
        match trimmed {
            "" => continue,
            "kinematic" => Signal::kinematic_sequence().iter().copied().for_each(&mut push),
            "all" => Signal::all()
                .iter()
                .copied()
                .filter(|s| s.descriptor().family != SignalFamily::EventInput)
                .for_each(&mut push),
            key => push(Signal::from_key(key)?),
        }
    }
    if out.is_empty() {
        return Err(anyhow!("no signals selected"));
    }
    Ok(out)
}

fn display_target(path: &Path) -> String {
    if path.as_os_str() == "-" {
        "stdout".into()
    } else {
        path.display().to_string()
    }
}

fn with_csv_output<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut csv::Writer<Box<dyn Write>>) -> Result<()>,
{
    let sink: Box<dyn Write> = if path.as_os_str() == "-" {
        Box::new(io::stdout().lock())
    } else {
        Box::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )
    };
    let mut writer = csv::Writer::from_writer(sink);
    write(&mut writer)
}

fn fmt_opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn fmt_f64(value: f64) -> String {
    format!("{:.3}", value)
}

fn write_event_rows<W: Write>(
    takes: &[Take],
    events: &CohortEvents,
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    let mut header = vec![
        "take_id".to_string(),
        "handedness".to_string(),
        "session_date".to_string(),
        "pitch".to_string(),
        "velocity_mph".to_string(),
    ];
    header.extend(EventKind::ALL.iter().map(|k| k.code().to_string()));
    header.push("FP_zero_cross_rel".to_string());
    writer.write_record(&header)?;

    let order = assign_pitch_order(takes);
    let fp_rel = events.relative_frames(EventKind::FootPlantZeroCross);
    for take in takes {
        let mut row = vec![
            take.id.to_string(),
            fmt_opt(take.handedness),
            take.session_date.to_string(),
            fmt_opt(order.get(&take.id)),
            fmt_opt(take.pitch_velocity_mph.map(|v| format!("{:.1}", v))),
        ];
        row.extend(
            EventKind::ALL
                .iter()
                .map(|kind| fmt_opt(events.frame(*kind, take.id))),
        );
        row.push(fmt_opt(fp_rel.get(&take.id)));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_aggregate(
    writer: &mut csv::Writer<impl Write>,
    signal: Signal,
    group: &str,
    aggregate: &CohortAggregate,
) -> Result<()> {
    for idx in 0..aggregate.len() {
        writer.write_record([
            signal.key(),
            group.to_string(),
            aggregate.times[idx].to_string(),
            fmt_f64(aggregate.central[idx]),
            fmt_f64(aggregate.low[idx]),
            fmt_f64(aggregate.high[idx]),
            aggregate.counts[idx].to_string(),
        ])?;
    }
    Ok(())
}

fn write_curve_rows<W: Write>(report: &CohortReport, writer: &mut csv::Writer<W>) -> Result<()> {
    let time_column = match report.params.time_unit {
        TimeUnit::Frames => "time_frames",
        TimeUnit::Milliseconds => "time_ms",
    };
    writer.write_record([
        "signal",
        "group",
        time_column,
        "central",
        "p25",
        "p75",
        "takes",
    ])?;
    for signal in &report.signals {
        if signal.cohort.is_empty() {
            warn!("Skipping {}: no take curves in window", signal.signal);
            continue;
        }
        for (date, aggregate) in &signal.by_date {
            write_aggregate(writer, signal.signal, &date.to_string(), aggregate)?;
        }
        write_aggregate(writer, signal.signal, "all", &signal.cohort)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_signal_rows<W: Write>(writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "key",
        "label",
        "family",
        "category",
        "segment_r",
        "segment_l",
        "axis",
        "sign",
    ])?;
    for signal in Signal::all() {
        let desc = signal.descriptor();
        writer.write_record([
            signal.key(),
            desc.label.to_string(),
            format!("{:?}", desc.family),
            desc.category.to_string(),
            desc.segment.resolve(Handedness::Right).to_string(),
            desc.segment.resolve(Handedness::Left).to_string(),
            format!("{:?}", desc.axis),
            format!("{:?}", desc.sign),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
