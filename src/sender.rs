use chrono::{Local, NaiveDateTime};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::json;
use tracing::{error, info};

use crate::config::{GsheetsConfig, MailerConfig};
use crate::models::Report;

/// Capability for delivering a built report to an external sink.
///
/// Delivery is fire-and-forget: failures are logged and swallowed, never
/// surfaced to the orchestrator, and re-sending the same report produces a
/// duplicate email / appended row.
#[allow(async_fn_in_trait)]
pub trait ReportSender {
    async fn send(&self, report: &Report);
}

const WINDOW_FORMAT: &str = "%d.%m.%Y %H:%M:%S";
const GENERATED_FORMAT: &str = "%d.%m.%Y %H:%M";

fn fmt_window(ts: NaiveDateTime) -> String {
    ts.format(WINDOW_FORMAT).to_string()
}

/// Renders the report into a plain-text message and hands it to an SMTP
/// relay over TLS.
pub struct EmailReportSender {
    cfg: MailerConfig,
    recipient: String,
}

impl EmailReportSender {
    pub fn new(cfg: MailerConfig, recipient: String) -> Self {
        Self { cfg, recipient }
    }

    fn body(report: &Report, generated_at: NaiveDateTime) -> String {
        format!(
            "Activity statistics for {} - {}\n\
             \n\
             Total operations: {}\n\
             Successful submits: {}\n\
             Failed submits: {}\n\
             Unique users: {}\n\
             Average submits per user: {:.2}\n\
             \n\
             Report generated {}\n",
            fmt_window(report.start),
            fmt_window(report.end),
            report.total_operations,
            report.success_submits,
            report.failure_submits,
            report.unique_users,
            report.avg_submit_per_user,
            generated_at.format(GENERATED_FORMAT),
        )
    }

    async fn try_send(&self, report: &Report) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.cfg.sender.parse()?)
            .to(self.recipient.parse()?)
            .subject("Exercise activity statistics")
            .header(ContentType::TEXT_PLAIN)
            .body(Self::body(report, Local::now().naive_local()))?;

        let transport: AsyncSmtpTransport<Tokio1Executor> =
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.cfg.server)?
                .credentials(Credentials::new(
                    self.cfg.username.clone(),
                    self.cfg.password.clone(),
                ))
                .build();
        transport.send(message).await?;
        Ok(())
    }
}

impl ReportSender for EmailReportSender {
    async fn send(&self, report: &Report) {
        info!(recipient = %self.recipient, "sending report by email");
        match self.try_send(report).await {
            Ok(()) => info!("report email sent"),
            Err(e) => error!(error = %e, "failed to send report email"),
        }
    }
}

/// Appends one row per report to a worksheet through the Sheets
/// `values:append` endpoint, authenticated with a pre-issued service
/// token from configuration.
pub struct SheetsReportSender {
    cfg: GsheetsConfig,
    http: reqwest::Client,
}

impl SheetsReportSender {
    pub fn new(cfg: GsheetsConfig) -> Self {
        Self {
            cfg,
            http: reqwest::Client::new(),
        }
    }

    /// Row layout: generated-at, window bounds, then the metrics in the
    /// worksheet's historical column order.
    fn row(report: &Report, generated_at: NaiveDateTime) -> Vec<serde_json::Value> {
        vec![
            json!(generated_at.format(GENERATED_FORMAT).to_string()),
            json!(fmt_window(report.start)),
            json!(fmt_window(report.end)),
            json!(report.total_operations),
            json!(report.success_submits),
            json!(report.failure_submits),
            json!(report.unique_users),
            json!(report.avg_submit_per_user),
        ]
    }

    async fn try_send(&self, report: &Report) -> anyhow::Result<()> {
        let url = format!(
            "{}/v4/spreadsheets/{}/values/{}:append",
            self.cfg.base_url, self.cfg.spreadsheet_key, self.cfg.sheet_name
        );
        let body = json!({ "values": [Self::row(report, Local::now().naive_local())] });
        self.http
            .post(&url)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .bearer_auth(&self.cfg.access_token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

impl ReportSender for SheetsReportSender {
    async fn send(&self, report: &Report) {
        info!("uploading report to google sheets");
        match self.try_send(report).await {
            Ok(()) => info!("report uploaded"),
            Err(e) => error!(error = %e, "failed to upload report to google sheets"),
        }
    }
}
