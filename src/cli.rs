use chrono::{Duration, NaiveDate, NaiveDateTime};
use clap::{Parser, ValueEnum};

/// Command-line surface of the pipeline.
#[derive(Parser, Debug, Default)]
#[command(name = "attempt-stats", about = "Ingest exercise attempts and report usage statistics")]
pub struct Cli {
    /// ISO date/datetime to begin from (default: 24h before now)
    #[arg(long, value_parser = parse_date_time)]
    pub start: Option<NaiveDateTime>,
    /// ISO date/datetime to end with (default: min(start + 24h, now))
    #[arg(long, value_parser = parse_date_time)]
    pub end: Option<NaiveDateTime>,
    /// Truncate stored attempts before fetching new ones
    #[arg(long)]
    pub truncate: bool,
    /// Skip the remote fetch entirely
    #[arg(long)]
    pub no_fetch: bool,
    /// Where to compute the report from; omitted means no report
    #[arg(long, value_enum)]
    pub report_source: Option<ReportSource>,
    /// How to deliver the report
    #[arg(long, value_enum)]
    pub report: Option<ReportKind>,
    /// Recipient address, required with --report email
    #[arg(long)]
    pub email: Option<String>,
    /// Path to the configuration file
    #[arg(long, default_value = "config.toml")]
    pub config: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSource {
    /// Aggregate over the persisted store
    Db,
    /// Aggregate over the batch fetched in this run
    Api,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Email,
    Gsheets,
}

/// User-input problems, raised before any side-effecting step runs.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum OptionsError {
    #[error("fetch disabled, can't build report from api data")]
    ApiSourceWithoutFetch,
    #[error("--report must be specified together with --report-source")]
    SenderNotSpecified,
    #[error("email address must be specified")]
    EmailRequired,
}

/// Validated per-run options with the reporting window resolved.
#[derive(Debug, PartialEq)]
pub struct RunOptions {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub truncate: bool,
    pub no_fetch: bool,
    pub report: Option<ReportTarget>,
}

#[derive(Debug, PartialEq)]
pub struct ReportTarget {
    pub source: ReportSource,
    pub kind: ReportKind,
    /// Present exactly when `kind` is email.
    pub email: Option<String>,
}

impl RunOptions {
    /// Validate flag combinations and default the window. Like the rest of
    /// the pipeline, timestamps are naive local time.
    pub fn from_cli(cli: &Cli, now: NaiveDateTime) -> Result<Self, OptionsError> {
        let report = match cli.report_source {
            None => None,
            Some(source) => {
                if source == ReportSource::Api && cli.no_fetch {
                    return Err(OptionsError::ApiSourceWithoutFetch);
                }
                let kind = cli.report.ok_or(OptionsError::SenderNotSpecified)?;
                let email = if kind == ReportKind::Email {
                    Some(cli.email.clone().ok_or(OptionsError::EmailRequired)?)
                } else {
                    None
                };
                Some(ReportTarget { source, kind, email })
            }
        };

        let start = cli.start.unwrap_or(now - Duration::hours(24));
        let end = cli.end.unwrap_or_else(|| (start + Duration::hours(24)).min(now));
        Ok(Self {
            start,
            end,
            truncate: cli.truncate,
            no_fetch: cli.no_fetch,
            report,
        })
    }
}

/// Accept a bare date (midnight) or a datetime, `T`- or space-separated,
/// seconds and fraction optional.
fn parse_date_time(value: &str) -> Result<NaiveDateTime, String> {
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(ts);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(ts) = date.and_hms_opt(0, 0, 0) {
            return Ok(ts);
        }
    }
    Err(format!("invalid ISO date/datetime {value:?}"))
}
