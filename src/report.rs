use std::collections::HashMap;

use anyhow::Result;
use chrono::NaiveDateTime;
use tracing::info;

use crate::models::{Attempt, Report};
use crate::store::AttemptStore;

/// Capability for producing the five-metric window aggregate. The two
/// implementations must agree exactly on the same underlying data; tests
/// in `tests/store_db.rs` check the pair against a live database.
#[allow(async_fn_in_trait)]
pub trait ReportBuilder {
    async fn build_report(&self) -> Result<Report>;
}

/// Mean submits per submitting user, rounded to 2 decimal places. A window
/// with no submitting users reports 0.0 rather than dividing by zero; both
/// builder variants route through here so the policy cannot drift.
pub(crate) fn avg_submits_per_user(total_submits: u64, submitting_users: usize) -> f64 {
    if submitting_users == 0 {
        return 0.0;
    }
    let avg = total_submits as f64 / submitting_users as f64;
    (avg * 100.0).round() / 100.0
}

/// Variant A: aggregates an in-memory batch, typically the one just
/// fetched for this exact window.
///
/// This builder does NOT re-filter by `created_at`; whatever attempts it is
/// handed are counted. Callers own the guarantee that the batch already
/// matches `[start, end]`.
pub struct BatchReportBuilder {
    start: NaiveDateTime,
    end: NaiveDateTime,
    attempts: Vec<Attempt>,
}

impl BatchReportBuilder {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime, attempts: Vec<Attempt>) -> Self {
        Self { start, end, attempts }
    }
}

impl ReportBuilder for BatchReportBuilder {
    async fn build_report(&self) -> Result<Report> {
        info!("building report from fetched batch");
        let mut report = Report::empty(self.start, self.end);
        report.total_operations = self.attempts.len() as u64;
        report.unique_users = self
            .attempts
            .iter()
            .map(|a| a.user_id.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len() as u64;
        report.success_submits = self.attempts.iter().filter(|a| a.is_success()).count() as u64;
        report.failure_submits = self.attempts.iter().filter(|a| a.is_failure()).count() as u64;

        let mut by_user: HashMap<&str, u64> = HashMap::new();
        for attempt in self.attempts.iter().filter(|a| a.is_submit()) {
            *by_user.entry(attempt.user_id.as_str()).or_default() += 1;
        }
        let total_submits = by_user.values().sum();
        report.avg_submit_per_user = avg_submits_per_user(total_submits, by_user.len());
        Ok(report)
    }
}

/// Variant B: aggregates over the persisted store, filtering every query by
/// `created_at >= start AND created_at <= end`.
pub struct DbReportBuilder {
    start: NaiveDateTime,
    end: NaiveDateTime,
    store: AttemptStore,
}

impl DbReportBuilder {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime, store: AttemptStore) -> Self {
        Self { start, end, store }
    }
}

impl ReportBuilder for DbReportBuilder {
    async fn build_report(&self) -> Result<Report> {
        info!("building report from database");
        let mut report = Report::empty(self.start, self.end);
        report.total_operations = self.store.count_operations(self.start, self.end).await?;
        report.unique_users = self.store.count_unique_users(self.start, self.end).await?;
        report.success_submits = self
            .store
            .count_success_submits(self.start, self.end)
            .await?;
        report.failure_submits = self
            .store
            .count_failure_submits(self.start, self.end)
            .await?;

        let by_user = self.store.submit_counts_by_user(self.start, self.end).await?;
        let total_submits = by_user.iter().map(|(_, n)| n).sum();
        report.avg_submit_per_user = avg_submits_per_user(total_submits, by_user.len());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttemptType;
    use chrono::NaiveDate;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 12, 25)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn attempt(user: &str, attempt_type: AttemptType, is_correct: Option<bool>, hour: u32) -> Attempt {
        Attempt {
            id: None,
            user_id: user.to_string(),
            created_at: at(hour),
            attempt_type,
            is_correct,
            oauth_consumer_key: String::new(),
            lis_result_sourcedid: String::new(),
            lis_outcome_service_url: String::new(),
        }
    }

    async fn build(attempts: Vec<Attempt>) -> Report {
        BatchReportBuilder::new(at(0), at(23), attempts)
            .build_report()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn two_users_mixed_outcomes() {
        // user A submits twice (one success, one failure), user B only runs
        let report = build(vec![
            attempt("A", AttemptType::Submit, Some(true), 1),
            attempt("A", AttemptType::Submit, Some(false), 2),
            attempt("B", AttemptType::Run, None, 3),
        ])
        .await;
        assert_eq!(report.total_operations, 3);
        assert_eq!(report.unique_users, 2);
        assert_eq!(report.success_submits, 1);
        assert_eq!(report.failure_submits, 1);
        assert_eq!(report.avg_submit_per_user, 2.0);
    }

    #[tokio::test]
    async fn ungraded_submits_count_toward_totals_only() {
        let report = build(vec![
            attempt("A", AttemptType::Submit, None, 1),
            attempt("A", AttemptType::Submit, Some(true), 2),
        ])
        .await;
        assert_eq!(report.total_operations, 2);
        assert_eq!(report.unique_users, 1);
        assert_eq!(report.success_submits, 1);
        assert_eq!(report.failure_submits, 0);
        // the ungraded submit still feeds the average numerator
        assert_eq!(report.avg_submit_per_user, 2.0);
    }

    #[tokio::test]
    async fn no_submitters_reports_zero_average() {
        let report = build(vec![
            attempt("A", AttemptType::Run, None, 1),
            attempt("B", AttemptType::Run, None, 2),
        ])
        .await;
        assert_eq!(report.avg_submit_per_user, 0.0);
        assert_eq!(report.total_operations, 2);
    }

    #[tokio::test]
    async fn empty_batch_is_all_zeroes() {
        let report = build(Vec::new()).await;
        assert_eq!(report, Report::empty(at(0), at(23)));
    }

    #[test]
    fn average_rounds_to_two_decimals() {
        assert_eq!(avg_submits_per_user(5, 3), 1.67);
        assert_eq!(avg_submits_per_user(1, 3), 0.33);
        assert_eq!(avg_submits_per_user(4, 2), 2.0);
        assert_eq!(avg_submits_per_user(0, 0), 0.0);
    }
}
