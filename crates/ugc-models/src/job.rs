//! Render job identifiers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::VideoId;

/// Identifier of one render attempt in the job queue.
///
/// Derived from the video id and the attempt number so that a duplicate
/// enqueue for the same attempt maps to the same job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn for_attempt(video_id: &VideoId, attempt: u32) -> Self {
        Self(format!("render-{}-{}", video_id, attempt))
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_is_deterministic_per_attempt() {
        let video_id = VideoId::from("vid-1");
        assert_eq!(JobId::for_attempt(&video_id, 0), JobId::for_attempt(&video_id, 0));
        assert_ne!(JobId::for_attempt(&video_id, 0), JobId::for_attempt(&video_id, 1));
        assert_eq!(JobId::for_attempt(&video_id, 2).as_str(), "render-vid-1-2");
    }
}
