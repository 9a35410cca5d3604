//! Pulse CLI - Command-line interface for Pulse Analytics
//!
//! Commands:
//! - replay: Feed NDJSON ingest commands through the engine (streaming mode)
//! - report: Build a behavior report for a URL from a session snapshot
//! - metrics: Print heatmap, scroll depth or click map for a URL
//! - validate: Validate ingest commands without recording them
//! - doctor: Diagnose configuration and snapshot files

use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::{info, warn};

use pulse_analytics::sink::{ChannelSink, Emission};
use pulse_analytics::{
    AnalyticsConfig, AnalyticsEngine, EventCollector, EventInput, RecordOutcome, ReportPeriod,
    SessionDescriptor, SessionStore, PRODUCER_NAME, PULSE_VERSION,
};

/// Pulse - behavioral analytics for the marketing site
#[derive(Parser)]
#[command(name = "pulse")]
#[command(author = "Pulse Logistics")]
#[command(version = PULSE_VERSION)]
#[command(about = "Replay behavioral events and build per-URL analytics reports", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed NDJSON ingest commands through the engine and print sink emissions
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Output file path for emissions (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Goal/funnel configuration (JSON); site defaults when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Load a session snapshot before replaying
        #[arg(long)]
        load_sessions: Option<PathBuf>,

        /// Save the session snapshot after replaying
        #[arg(long)]
        save_sessions: Option<PathBuf>,

        /// Flush output after each emission batch (`--flush false` to buffer)
        #[arg(long, action = ArgAction::Set, default_value_t = true)]
        flush: bool,
    },

    /// Build a behavior report for a URL
    Report {
        /// Session snapshot file
        #[arg(short, long)]
        sessions: PathBuf,

        /// Page URL (path) to report on
        #[arg(short, long)]
        url: String,

        /// Only include sessions started in the last N days
        #[arg(long)]
        days: Option<u32>,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Pretty-print JSON
        #[arg(long)]
        pretty: bool,
    },

    /// Print a single metric for a URL
    Metrics {
        /// Session snapshot file
        #[arg(short, long)]
        sessions: PathBuf,

        /// Page URL (path)
        #[arg(short, long)]
        url: String,

        /// Metric to compute
        #[arg(value_enum)]
        kind: MetricKind,

        /// Pretty-print JSON
        #[arg(long)]
        pretty: bool,
    },

    /// Validate ingest commands
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and snapshot files
    Doctor {
        /// Check a configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Check a session snapshot file
        #[arg(long)]
        sessions: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum MetricKind {
    /// Click heatmap points
    Heatmap,
    /// Scroll depth aggregate and histogram
    ScrollDepth,
    /// Clicks per element
    ClickMap,
}

/// One line of replay input.
///
/// `session` is a caller-chosen alias; the engine assigns the real session id.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum IngestCommand {
    Start {
        session: String,
        descriptor: SessionDescriptor,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    Record {
        session: String,
        event: EventInput,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    End {
        session: String,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    Tick {
        session: String,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse_analytics=info,pulse=info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), PulseCliError> {
    match cli.command {
        Commands::Replay {
            input,
            output,
            config,
            load_sessions,
            save_sessions,
            flush,
        } => cmd_replay(
            &input,
            &output,
            config.as_deref(),
            load_sessions.as_deref(),
            save_sessions.as_deref(),
            flush,
        ),

        Commands::Report {
            sessions,
            url,
            days,
            output,
            pretty,
        } => cmd_report(&sessions, &url, days, &output, pretty),

        Commands::Metrics {
            sessions,
            url,
            kind,
            pretty,
        } => cmd_metrics(&sessions, &url, kind, pretty),

        Commands::Validate { input, json } => cmd_validate(&input, json),

        Commands::Doctor {
            config,
            sessions,
            json,
        } => cmd_doctor(config.as_deref(), sessions.as_deref(), json),
    }
}

#[derive(Debug, Default, Serialize)]
struct ReplaySummary {
    lines: usize,
    sessions_started: usize,
    events_recorded: usize,
    events_rejected: usize,
    unknown_session: usize,
    emissions: usize,
}

fn cmd_replay(
    input: &Path,
    output: &Path,
    config: Option<&Path>,
    load_sessions: Option<&Path>,
    save_sessions: Option<&Path>,
    flush: bool,
) -> Result<(), PulseCliError> {
    let config = match config {
        Some(path) => AnalyticsConfig::from_file(path)?,
        None => AnalyticsConfig::site_defaults(),
    };

    let (sink, emissions) = ChannelSink::new();
    let mut engine = AnalyticsEngine::new(config, Arc::new(sink));

    if let Some(path) = load_sessions {
        engine.load_sessions(&fs::read_to_string(path)?)?;
        info!(sessions = engine.store().len(), "session snapshot loaded");
    }

    if is_stdin(input) && atty::is(atty::Stream::Stdin) {
        warn!("reading ingest commands from an interactive terminal; end input with Ctrl-D");
    }

    let reader: Box<dyn BufRead> = if is_stdin(input) {
        Box::new(BufReader::new(io::stdin()))
    } else {
        Box::new(BufReader::new(fs::File::open(input)?))
    };
    let mut writer: Box<dyn Write> = if is_stdin(output) {
        Box::new(io::stdout())
    } else {
        Box::new(fs::File::create(output)?)
    };

    let mut aliases: HashMap<String, String> = HashMap::new();
    let mut summary = ReplaySummary::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        summary.lines += 1;

        let command: IngestCommand = serde_json::from_str(trimmed).map_err(|e| {
            PulseCliError::ParseError(format!("line {}: {}", index + 1, e))
        })?;

        match command {
            IngestCommand::Start {
                session,
                descriptor,
                at,
            } => {
                let id = engine.start_session_at(descriptor, at.unwrap_or_else(Utc::now));
                aliases.insert(session, id);
                summary.sessions_started += 1;
            }
            IngestCommand::Record { session, event, at } => {
                let id = resolve(&aliases, &session);
                match engine.record_at(id, event, at.unwrap_or_else(Utc::now)) {
                    RecordOutcome::Recorded => summary.events_recorded += 1,
                    RecordOutcome::UnknownSession => summary.unknown_session += 1,
                    RecordOutcome::Rejected { rejection } => {
                        warn!(line = index + 1, %rejection, "event rejected");
                        summary.events_rejected += 1;
                    }
                }
            }
            IngestCommand::End { session, at } => {
                engine.end_session_at(resolve(&aliases, &session), at.unwrap_or_else(Utc::now));
            }
            IngestCommand::Tick { session, at } => {
                engine.tick_at(resolve(&aliases, &session), at.unwrap_or_else(Utc::now));
            }
        }

        summary.emissions += write_emissions(&emissions, &mut writer)?;
        if flush {
            writer.flush()?;
        }
    }
    writer.flush()?;

    info!(
        lines = summary.lines,
        sessions = summary.sessions_started,
        recorded = summary.events_recorded,
        rejected = summary.events_rejected,
        unknown_session = summary.unknown_session,
        emissions = summary.emissions,
        "replay finished"
    );

    if let Some(path) = save_sessions {
        fs::write(path, engine.save_sessions()?)?;
    }

    Ok(())
}

/// Map a replay alias to the engine session id; unknown aliases pass through
/// unchanged and are treated as unknown sessions by the engine.
fn resolve<'a>(aliases: &'a HashMap<String, String>, session: &'a str) -> &'a str {
    aliases.get(session).map(String::as_str).unwrap_or(session)
}

fn write_emissions(
    emissions: &Receiver<Emission>,
    writer: &mut dyn Write,
) -> Result<usize, PulseCliError> {
    let mut written = 0;
    for emission in emissions.try_iter() {
        writeln!(writer, "{}", serde_json::to_string(&emission)?)?;
        written += 1;
    }
    Ok(written)
}

fn cmd_report(
    sessions: &Path,
    url: &str,
    days: Option<u32>,
    output: &Path,
    pretty: bool,
) -> Result<(), PulseCliError> {
    let mut engine = AnalyticsEngine::default();
    engine.load_sessions(&read_input(sessions)?)?;

    let now = Utc::now();
    let period = days.map_or_else(ReportPeriod::all_time, |d| ReportPeriod::last_days(d, now));
    let report = engine.generate_report_at(url, period, now);

    let rendered = to_json(&report, pretty)?;
    if is_stdin(output) {
        println!("{}", rendered);
    } else {
        fs::write(output, rendered)?;
    }
    Ok(())
}

fn cmd_metrics(sessions: &Path, url: &str, kind: MetricKind, pretty: bool) -> Result<(), PulseCliError> {
    let mut engine = AnalyticsEngine::default();
    engine.load_sessions(&read_input(sessions)?)?;

    let rendered = match kind {
        MetricKind::Heatmap => to_json(&engine.heatmap(url), pretty)?,
        MetricKind::ScrollDepth => to_json(&engine.scroll_depth(url), pretty)?,
        MetricKind::ClickMap => to_json(&engine.click_map(url), pretty)?,
    };
    println!("{}", rendered);
    Ok(())
}

fn cmd_validate(input: &Path, json: bool) -> Result<(), PulseCliError> {
    let data = read_input(input)?;

    let mut report = ValidationReport::default();
    for (index, line) in data.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        report.total_commands += 1;

        let error = match serde_json::from_str::<IngestCommand>(trimmed) {
            Ok(IngestCommand::Record { event, .. }) => {
                EventCollector::validate(event, Utc::now()).err().map(|r| r.to_string())
            }
            Ok(_) => None,
            Err(e) => Some(e.to_string()),
        };

        match error {
            Some(error) => report.errors.push(ValidationErrorDetail {
                line: index + 1,
                error,
            }),
            None => report.valid_commands += 1,
        }
    }
    report.invalid_commands = report.errors.len();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total commands:   {}", report.total_commands);
        println!("Valid commands:   {}", report.valid_commands);
        println!("Invalid commands: {}", report.invalid_commands);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - line {}: {}", err.line, err.error);
            }
        }
    }

    if report.invalid_commands > 0 {
        Err(PulseCliError::ValidationFailed(report.invalid_commands))
    } else {
        Ok(())
    }
}

fn cmd_doctor(config: Option<&Path>, sessions: Option<&Path>, json: bool) -> Result<(), PulseCliError> {
    let mut checks: Vec<DoctorCheck> = vec![DoctorCheck {
        name: "pulse_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Pulse version {}", PULSE_VERSION),
    }];

    checks.push(match config {
        Some(path) => match AnalyticsConfig::from_file(path) {
            Ok(config) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "{} goals, {} funnels, {} day retention",
                    config.goals.len(),
                    config.funnels.len(),
                    config.retention_days
                ),
            },
            Err(e) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            },
        },
        None => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Warning,
            message: "No config given; site default catalog will be used".to_string(),
        },
    });

    if let Some(path) = sessions {
        let check = if !path.exists() {
            DoctorCheck {
                name: "sessions".to_string(),
                status: CheckStatus::Warning,
                message: "Session snapshot does not exist".to_string(),
            }
        } else {
            match fs::read_to_string(path)
                .map_err(pulse_analytics::AnalyticsError::from)
                .and_then(|json| SessionStore::from_json(&json))
            {
                Ok(store) => DoctorCheck {
                    name: "sessions".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "{} sessions ({} active) across {} URLs",
                        store.len(),
                        store.active_count(),
                        store.urls().len()
                    ),
                },
                Err(e) => DoctorCheck {
                    name: "sessions".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                },
            }
        };
        checks.push(check);
    }

    checks.push(DoctorCheck {
        name: "stdin".to_string(),
        status: CheckStatus::Ok,
        message: if atty::is(atty::Stream::Stdin) {
            "stdin is a TTY (interactive mode)".to_string()
        } else {
            "stdin is a pipe (replay ready)".to_string()
        },
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: PULSE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Pulse Doctor Report");
        println!("===================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(PulseCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn is_stdin(path: &Path) -> bool {
    path.to_string_lossy() == "-"
}

fn read_input(path: &Path) -> Result<String, PulseCliError> {
    if is_stdin(path) {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn to_json<T: Serialize>(value: &T, pretty: bool) -> Result<String, PulseCliError> {
    Ok(if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    })
}

// Error types

#[derive(Debug)]
enum PulseCliError {
    Io(io::Error),
    Analytics(pulse_analytics::AnalyticsError),
    Json(serde_json::Error),
    ValidationFailed(usize),
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for PulseCliError {
    fn from(e: io::Error) -> Self {
        PulseCliError::Io(e)
    }
}

impl From<pulse_analytics::AnalyticsError> for PulseCliError {
    fn from(e: pulse_analytics::AnalyticsError) -> Self {
        PulseCliError::Analytics(e)
    }
}

impl From<serde_json::Error> for PulseCliError {
    fn from(e: serde_json::Error) -> Self {
        PulseCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<PulseCliError> for CliError {
    fn from(e: PulseCliError) -> Self {
        match e {
            PulseCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            PulseCliError::Analytics(e) => CliError {
                code: "ANALYTICS_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'pulse doctor' to check config and snapshot files".to_string()),
            },
            PulseCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            PulseCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} commands failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            PulseCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            PulseCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Each line must be an ingest command with an 'op' field".to_string()),
            },
        }
    }
}

// Report types

#[derive(Default, Serialize)]
struct ValidationReport {
    total_commands: usize,
    valid_commands: usize,
    invalid_commands: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(Serialize)]
struct ValidationErrorDetail {
    line: usize,
    error: String,
}

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replay_flush(args: &[&str]) -> bool {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Replay { flush, .. } => flush,
            _ => panic!("expected replay"),
        }
    }

    #[test]
    fn test_replay_flush_defaults_on() {
        assert!(replay_flush(&["pulse", "replay"]));
    }

    #[test]
    fn test_replay_flush_can_be_disabled() {
        assert!(!replay_flush(&["pulse", "replay", "--flush", "false"]));
        assert!(replay_flush(&["pulse", "replay", "--flush", "true"]));
    }

    #[test]
    fn test_report_accepts_max_days() {
        let cli = Cli::try_parse_from(["pulse", "report", "-s", "s.json", "-u", "/", "--days", "4294967295"]).unwrap();
        match cli.command {
            Commands::Report { days, .. } => assert_eq!(days, Some(u32::MAX)),
            _ => panic!("expected report"),
        }
    }
}
