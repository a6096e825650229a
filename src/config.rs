use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level application configuration.
///
/// Loaded from a TOML file (default `config.toml` next to the binary's
/// working directory) with `ATTEMPT_STATS__*` environment overrides, e.g.
/// `ATTEMPT_STATS__DATABASE__URL`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub ingest: IngestConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub mailer: Option<MailerConfig>,
    #[serde(default)]
    pub gsheets: Option<GsheetsConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote analytics endpoint credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_url")]
    pub base_url: String,
    pub client: String,
    pub client_key: String,
    /// Per-request timeout; no overall pipeline deadline exists.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_ingest_url() -> String {
    "https://b2b.itresume.ru/api/statistics".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// Outbound SMTP relay settings for the email report sender.
#[derive(Debug, Clone, Deserialize)]
pub struct MailerConfig {
    pub server: String,
    pub username: String,
    pub password: String,
    pub sender: String,
}

/// Target worksheet for the spreadsheet report sender. The access token is
/// a pre-issued service credential; the authorization exchange happens
/// outside this process.
#[derive(Debug, Clone, Deserialize)]
pub struct GsheetsConfig {
    pub spreadsheet_key: String,
    pub sheet_name: String,
    pub access_token: String,
    #[serde(default = "default_sheets_url")]
    pub base_url: String,
}

fn default_sheets_url() -> String {
    "https://sheets.googleapis.com".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Directory for daily log files. Unset means stderr only.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    /// How many days of log files to keep; 0 or unset disables cleanup.
    #[serde(default)]
    pub keep_days: Option<u32>,
}

impl AppConfig {
    pub fn load(path: &str) -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("ATTEMPT_STATS")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")
    }
}
