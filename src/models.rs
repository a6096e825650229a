use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Kind of learner action the source platform recorded.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttemptType {
    /// Non-graded execution of an exercise.
    Run,
    /// Graded submission.
    Submit,
}

impl AttemptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptType::Run => "run",
            AttemptType::Submit => "submit",
        }
    }
}

impl fmt::Display for AttemptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptType {
    type Err = UnknownAttemptType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run" => Ok(AttemptType::Run),
            "submit" => Ok(AttemptType::Submit),
            other => Err(UnknownAttemptType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown attempt type {0:?}")]
pub struct UnknownAttemptType(pub String);

/// One recorded learner action.
///
/// An attempt is transient (`id == None`) until the store persists it and
/// assigns an id from the shared sequence; persisted attempts are never
/// updated in place.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Attempt {
    pub id: Option<i64>,
    pub user_id: String,
    pub created_at: NaiveDateTime,
    pub attempt_type: AttemptType,
    /// Tri-state correctness: `None` means not graded / not applicable.
    pub is_correct: Option<bool>,
    // LTI passback context, carried through verbatim.
    pub oauth_consumer_key: String,
    pub lis_result_sourcedid: String,
    pub lis_outcome_service_url: String,
}

impl Attempt {
    pub fn is_run(&self) -> bool {
        self.attempt_type == AttemptType::Run
    }

    pub fn is_submit(&self) -> bool {
        self.attempt_type == AttemptType::Submit
    }

    /// Submit graded as correct.
    pub fn is_success(&self) -> bool {
        self.is_submit() && self.is_correct == Some(true)
    }

    /// Submit graded as incorrect. Ungraded submits are neither success
    /// nor failure.
    pub fn is_failure(&self) -> bool {
        self.is_submit() && self.is_correct == Some(false)
    }
}

/// Aggregate usage snapshot for one `[start, end]` window (both bounds
/// inclusive). Built, rendered, and discarded within one pipeline run;
/// never persisted.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Report {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub unique_users: u64,
    pub total_operations: u64,
    pub success_submits: u64,
    pub failure_submits: u64,
    pub avg_submit_per_user: f64,
}

impl Report {
    pub fn empty(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            start,
            end,
            unique_users: 0,
            total_operations: 0,
            success_submits: 0,
            failure_submits: 0,
            avg_submit_per_user: 0.0,
        }
    }
}
