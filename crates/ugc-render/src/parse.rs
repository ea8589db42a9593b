//! Normalization of render provider responses.
//!
//! Providers disagree on field names. Job ids are looked up in this order:
//! `id`, `job_id`, `jobId`, `task_id`, `taskId`, then the same names (minus
//! `job_id`/`jobId`) nested under `data`. The first non-empty string or
//! integer wins.

use serde_json::Value;
use thiserror::Error;

use crate::provider::{ProviderStatus, RenderState};

const JOB_ID_PATHS: &[&[&str]] = &[
    &["id"],
    &["job_id"],
    &["jobId"],
    &["task_id"],
    &["taskId"],
    &["data", "id"],
    &["data", "task_id"],
    &["data", "taskId"],
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobIdParseError {
    #[error("response is not a JSON object")]
    NotAnObject,
    #[error("field `{0}` is empty")]
    Empty(String),
    #[error("none of the known job id fields are present")]
    Missing,
}

fn lookup<'a>(body: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(body, |node, key| node.get(key))
}

/// Extract the provider job id from a create-job response.
pub fn parse_job_id(body: &Value) -> Result<String, JobIdParseError> {
    if !body.is_object() {
        return Err(JobIdParseError::NotAnObject);
    }

    let mut first_empty = None;
    for path in JOB_ID_PATHS {
        match lookup(body, path) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Ok(s.trim().to_string()),
            Some(Value::String(_)) => {
                first_empty.get_or_insert_with(|| path.join("."));
            }
            Some(Value::Number(n)) => return Ok(n.to_string()),
            _ => {}
        }
    }

    Err(first_empty.map_or(JobIdParseError::Missing, JobIdParseError::Empty))
}

/// Map a provider state word onto [`RenderState`]. Unknown words count as
/// pending so polling continues until the ceiling.
pub fn map_state(raw: &str) -> RenderState {
    match raw.trim().to_ascii_lowercase().as_str() {
        "queued" | "pending" | "waiting" | "submitted" | "created" => RenderState::Pending,
        "processing" | "running" | "in_progress" | "generating" | "rendering" => {
            RenderState::Processing
        }
        "completed" | "succeeded" | "success" | "done" | "finished" => RenderState::Completed,
        "failed" | "error" | "cancelled" | "canceled" | "rejected" | "fail" => RenderState::Failed,
        _ => RenderState::Pending,
    }
}

/// Progress as a percentage; accepts either a 0..=1 fraction or 0..=100.
pub fn normalize_progress(raw: f64) -> u8 {
    if !raw.is_finite() || raw <= 0.0 {
        return 0;
    }
    let percent = if raw <= 1.0 { raw * 100.0 } else { raw };
    percent.round().min(100.0) as u8
}

fn first_str(body: &Value, paths: &[&[&str]]) -> Option<String> {
    paths
        .iter()
        .filter_map(|p| lookup(body, p))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Parse a job status response.
pub fn parse_status(body: &Value) -> ProviderStatus {
    let data = body.get("data").filter(|d| d.is_object()).unwrap_or(body);

    let state = first_str(data, &[&["status"], &["state"]])
        .map(|s| map_state(&s))
        .unwrap_or(RenderState::Pending);

    let progress = ["progress", "percent"]
        .iter()
        .filter_map(|k| data.get(*k))
        .find_map(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .map(normalize_progress)
        .unwrap_or(if state == RenderState::Completed { 100 } else { 0 });

    let result_url = first_str(
        data,
        &[
            &["video_url"],
            &["videoUrl"],
            &["result_url"],
            &["resultUrl"],
            &["output", "url"],
            &["output", "video_url"],
        ],
    )
    .or_else(|| {
        ["result_urls", "resultUrls"]
            .iter()
            .filter_map(|k| data.get(*k))
            .filter_map(Value::as_array)
            .flat_map(|arr| arr.iter())
            .filter_map(Value::as_str)
            .next()
            .map(str::to_string)
    });

    let thumbnail_url = first_str(
        data,
        &[&["thumbnail_url"], &["thumbnailUrl"], &["output", "thumbnail_url"]],
    );

    let error_message = first_str(
        data,
        &[&["error_message"], &["errorMessage"], &["error", "message"], &["error"], &["fail_msg"], &["failMsg"]],
    );

    ProviderStatus {
        state,
        progress,
        result_url,
        thumbnail_url,
        error_message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_id_priority() {
        let body = json!({ "task_id": "t-1", "id": "primary", "data": { "id": "nested" } });
        assert_eq!(parse_job_id(&body).unwrap(), "primary");

        let body = json!({ "taskId": "t-2", "data": { "id": "nested" } });
        assert_eq!(parse_job_id(&body).unwrap(), "t-2");

        let body = json!({ "data": { "taskId": "nested-task" } });
        assert_eq!(parse_job_id(&body).unwrap(), "nested-task");
    }

    #[test]
    fn test_job_id_numeric() {
        assert_eq!(parse_job_id(&json!({ "job_id": 42 })).unwrap(), "42");
    }

    #[test]
    fn test_job_id_errors() {
        assert_eq!(parse_job_id(&json!("id")), Err(JobIdParseError::NotAnObject));
        assert_eq!(parse_job_id(&json!({ "status": "ok" })), Err(JobIdParseError::Missing));
        assert_eq!(
            parse_job_id(&json!({ "id": "  " })),
            Err(JobIdParseError::Empty("id".into()))
        );
        assert_eq!(parse_job_id(&json!({ "id": "", "taskId": "t-3" })).unwrap(), "t-3");
    }

    #[test]
    fn test_state_vocabulary() {
        assert_eq!(map_state("QUEUED"), RenderState::Pending);
        assert_eq!(map_state("in_progress"), RenderState::Processing);
        assert_eq!(map_state("succeeded"), RenderState::Completed);
        assert_eq!(map_state("canceled"), RenderState::Failed);
        assert_eq!(map_state("warming_up"), RenderState::Pending);
    }

    #[test]
    fn test_progress_scales() {
        assert_eq!(normalize_progress(0.5), 50);
        assert_eq!(normalize_progress(50.0), 50);
        assert_eq!(normalize_progress(250.0), 100);
        assert_eq!(normalize_progress(-1.0), 0);
        assert_eq!(normalize_progress(f64::NAN), 0);
    }

    #[test]
    fn test_parse_completed_status() {
        let body = json!({
            "data": {
                "state": "success",
                "resultUrls": ["https://cdn.example/out.mp4"],
                "thumbnailUrl": "https://cdn.example/out.jpg"
            }
        });
        let status = parse_status(&body);
        assert_eq!(status.state, RenderState::Completed);
        assert_eq!(status.progress, 100);
        assert_eq!(status.result_url.as_deref(), Some("https://cdn.example/out.mp4"));
        assert_eq!(status.thumbnail_url.as_deref(), Some("https://cdn.example/out.jpg"));
    }

    #[test]
    fn test_parse_failed_status() {
        let body = json!({ "status": "failed", "error": { "message": "upstream error" } });
        let status = parse_status(&body);
        assert_eq!(status.state, RenderState::Failed);
        assert_eq!(status.error_message.as_deref(), Some("upstream error"));
    }
}
