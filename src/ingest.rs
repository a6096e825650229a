use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDateTime;
use reqwest::Client;
use serde::Deserialize;
use tracing::{error, info};

use crate::config::IngestConfig;
use crate::models::Attempt;

/// Failure to turn a raw API record into a canonical [`Attempt`].
///
/// Unlike transport failures (degraded to an empty batch), a malformed
/// record is fatal to the whole fetch: it means the source contract
/// changed and silently skipping rows would under-report.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("unparseable created_at {value:?}")]
    BadTimestamp { value: String },
    #[error(transparent)]
    BadAttemptType(#[from] crate::models::UnknownAttemptType),
    #[error("malformed passback_params {value:?}: {reason}")]
    BadPassbackParams { value: String, reason: String },
}

/// Client for the remote learning-analytics endpoint.
pub struct IngestClient {
    base_url: String,
    client: String,
    client_key: String,
    http: Client,
}

impl IngestClient {
    pub fn new(cfg: &IngestConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(secs) = cfg.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            base_url: cfg.base_url.clone(),
            client: cfg.client.clone(),
            client_key: cfg.client_key.clone(),
            http: builder.build()?,
        })
    }

    /// Fetch all attempts whose `created_at` falls in `[start, end]`.
    ///
    /// Best-effort by policy: a transport failure, a non-2xx status, or an
    /// API-reported `errors` payload is logged and yields an empty batch
    /// rather than aborting the run. A record that cannot be transformed is
    /// a hard error.
    pub async fn fetch_attempts(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Attempt>, TransformError> {
        info!(%start, %end, "fetching attempts");
        let start_param = format_window_bound(start);
        let end_param = format_window_bound(end);
        let request = self.http.get(&self.base_url).query(&[
            ("client", self.client.as_str()),
            ("client_key", self.client_key.as_str()),
            ("start", start_param.as_str()),
            ("end", end_param.as_str()),
        ]);

        let body = match request.send().await.and_then(|r| r.error_for_status()) {
            Ok(response) => match response.json::<serde_json::Value>().await {
                Ok(body) => body,
                Err(e) => {
                    error!(error = %e, "failed to decode attempts response");
                    return Ok(Vec::new());
                }
            },
            Err(e) => {
                error!(error = %e, "failed to fetch attempts");
                return Ok(Vec::new());
            }
        };

        parse_response_body(body)
    }
}

/// Window bounds travel as timezone-naive ISO-8601.
fn format_window_bound(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

/// Raw record shape returned by the analytics endpoint.
#[derive(Debug, Deserialize)]
pub struct RawAttempt {
    pub lti_user_id: String,
    #[serde(default)]
    pub passback_params: Option<String>,
    pub is_correct: Option<bool>,
    pub attempt_type: String,
    pub created_at: String,
}

/// Interpret a decoded response body: an object with an `errors` key is an
/// API-level failure (empty batch, logged), an array is transformed
/// record by record.
pub fn parse_response_body(body: serde_json::Value) -> Result<Vec<Attempt>, TransformError> {
    if let Some(errors) = body.get("errors") {
        error!(%errors, "api reported errors while fetching attempts");
        return Ok(Vec::new());
    }
    let raw: Vec<RawAttempt> = match serde_json::from_value(body) {
        Ok(raw) => raw,
        Err(e) => {
            error!(error = %e, "attempts response was neither records nor errors");
            return Ok(Vec::new());
        }
    };
    info!("fetched {} attempts", raw.len());
    raw.into_iter().map(transform).collect()
}

/// Canonicalize one raw record.
pub fn transform(raw: RawAttempt) -> Result<Attempt, TransformError> {
    let created_at = parse_timestamp(&raw.created_at)?;
    let attempt_type = raw.attempt_type.parse()?;
    let passback = match raw.passback_params.as_deref() {
        None => PassbackParams::default(),
        Some(s) => parse_passback_params(s)?,
    };
    Ok(Attempt {
        id: None,
        user_id: raw.lti_user_id,
        created_at,
        attempt_type,
        is_correct: raw.is_correct,
        oauth_consumer_key: passback.oauth_consumer_key,
        lis_result_sourcedid: passback.lis_result_sourcedid,
        lis_outcome_service_url: passback.lis_outcome_service_url,
    })
}

/// The source emits both `2025-12-25T10:13:45.439653` and the
/// space-separated variant, with or without fractional seconds.
fn parse_timestamp(value: &str) -> Result<NaiveDateTime, TransformError> {
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(ts);
        }
    }
    Err(TransformError::BadTimestamp {
        value: value.to_string(),
    })
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PassbackParams {
    pub oauth_consumer_key: String,
    pub lis_result_sourcedid: String,
    pub lis_outcome_service_url: String,
}

/// Parse the string-encoded LTI passback mapping.
///
/// The upstream encodes this field as a Python dict literal of string keys
/// to string values, e.g. `{'oauth_consumer_key': '', 'lis_result_sourcedid':
/// "co:urse"}`. This is an untrusted payload, so rather than a general
/// literal evaluator we accept exactly that shape: single- or double-quoted
/// strings with backslash escapes, colon-separated pairs, comma-delimited.
/// Anything else is rejected. Keys outside the three LTI fields are ignored;
/// an absent or empty mapping yields empty-string defaults.
pub fn parse_passback_params(input: &str) -> Result<PassbackParams, TransformError> {
    let malformed = |reason: &str| TransformError::BadPassbackParams {
        value: input.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(PassbackParams::default());
    }
    let inner = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| malformed("not a braced mapping"))?;

    let mut params = PassbackParams::default();
    let mut chars = inner.chars().peekable();
    loop {
        skip_whitespace(&mut chars);
        if chars.peek().is_none() {
            break;
        }
        let key = parse_quoted(&mut chars).ok_or_else(|| malformed("expected quoted key"))?;
        skip_whitespace(&mut chars);
        if chars.next() != Some(':') {
            return Err(malformed("expected ':' after key"));
        }
        skip_whitespace(&mut chars);
        let value = parse_quoted(&mut chars).ok_or_else(|| malformed("expected quoted value"))?;
        match key.as_str() {
            "oauth_consumer_key" => params.oauth_consumer_key = value,
            "lis_result_sourcedid" => params.lis_result_sourcedid = value,
            "lis_outcome_service_url" => params.lis_outcome_service_url = value,
            _ => {}
        }
        skip_whitespace(&mut chars);
        match chars.next() {
            Some(',') => {}
            None => break,
            Some(_) => return Err(malformed("expected ',' between entries")),
        }
    }
    Ok(params)
}

fn skip_whitespace(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

/// Consume one `'...'` or `"..."` string, honoring backslash escapes.
fn parse_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<String> {
    let quote = match chars.peek() {
        Some(&q @ ('\'' | '"')) => {
            chars.next();
            q
        }
        _ => return None,
    };
    let mut out = String::new();
    loop {
        match chars.next()? {
            '\\' => out.push(chars.next()?),
            c if c == quote => return Some(out),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttemptType;
    use serde_json::json;

    fn raw(created_at: &str, passback: Option<&str>) -> RawAttempt {
        RawAttempt {
            lti_user_id: "b09cb442".to_string(),
            passback_params: passback.map(str::to_string),
            is_correct: None,
            attempt_type: "run".to_string(),
            created_at: created_at.to_string(),
        }
    }

    #[test]
    fn parses_empty_and_absent_passback() {
        assert_eq!(parse_passback_params("").unwrap(), PassbackParams::default());
        assert_eq!(parse_passback_params("{}").unwrap(), PassbackParams::default());
        let a = transform(raw("2025-12-25 10:13:45.439653", None)).unwrap();
        assert_eq!(a.oauth_consumer_key, "");
        assert_eq!(a.lis_result_sourcedid, "");
        assert_eq!(a.lis_outcome_service_url, "");
    }

    #[test]
    fn parses_single_and_double_quoted_passback() {
        let p = parse_passback_params(
            "{'oauth_consumer_key': 'key', \"lis_result_sourcedid\": \"course-v1:X+Y:z\", 'lis_outcome_service_url': 'https://lms/grade'}",
        )
        .unwrap();
        assert_eq!(p.oauth_consumer_key, "key");
        assert_eq!(p.lis_result_sourcedid, "course-v1:X+Y:z");
        assert_eq!(p.lis_outcome_service_url, "https://lms/grade");
    }

    #[test]
    fn passback_ignores_unknown_keys_and_honors_escapes() {
        let p = parse_passback_params("{'extra': 'x', 'oauth_consumer_key': 'a\\'b'}").unwrap();
        assert_eq!(p.oauth_consumer_key, "a'b");
        assert_eq!(p.lis_result_sourcedid, "");
    }

    #[test]
    fn malformed_passback_is_rejected() {
        assert!(parse_passback_params("not a dict").is_err());
        assert!(parse_passback_params("{'k': 1}").is_err());
        assert!(parse_passback_params("{'k' 'v'}").is_err());
        assert!(parse_passback_params("{'unterminated").is_err());
    }

    #[test]
    fn timestamps_accept_t_and_space_separators() {
        let a = transform(raw("2025-12-25T10:13:45.439653", None)).unwrap();
        let b = transform(raw("2025-12-25 10:13:45.439653", None)).unwrap();
        assert_eq!(a.created_at, b.created_at);
        let c = transform(raw("2025-12-25 10:13:45", None)).unwrap();
        assert_eq!(c.created_at.and_utc().timestamp_subsec_micros(), 0);
    }

    #[test]
    fn bad_timestamp_is_a_hard_error() {
        assert!(matches!(
            transform(raw("yesterday", None)),
            Err(TransformError::BadTimestamp { .. })
        ));
    }

    #[test]
    fn errors_payload_yields_empty_batch() {
        let body = json!({ "errors": ["invalid client key"] });
        assert!(parse_response_body(body).unwrap().is_empty());
    }

    #[test]
    fn record_array_is_transformed() {
        let body = json!([
            {
                "lti_user_id": "u1",
                "passback_params": "{'oauth_consumer_key': ''}",
                "is_correct": true,
                "attempt_type": "submit",
                "created_at": "2025-12-25 10:13:45.439653"
            }
        ]);
        let attempts = parse_response_body(body).unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].attempt_type, AttemptType::Submit);
        assert_eq!(attempts[0].is_correct, Some(true));
        assert_eq!(attempts[0].id, None);
    }

    #[test]
    fn unknown_attempt_type_fails_the_fetch() {
        let body = json!([
            {
                "lti_user_id": "u1",
                "is_correct": null,
                "attempt_type": "grade",
                "created_at": "2025-12-25 10:13:45"
            }
        ]);
        assert!(parse_response_body(body).is_err());
    }

    #[test]
    fn window_bounds_serialize_without_timezone() {
        let ts = chrono::NaiveDate::from_ymd_opt(2025, 12, 25)
            .unwrap()
            .and_hms_opt(10, 13, 45)
            .unwrap();
        assert_eq!(format_window_bound(ts), "2025-12-25T10:13:45");
    }
}
