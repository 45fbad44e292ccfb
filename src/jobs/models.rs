//! Data models for processing jobs.

use serde::{Deserialize, Serialize};

/// Status of a processing job.
///
/// The persisted representation is the legacy column encoding shared with the
/// upload service, see [`JobStatus::as_db_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed, // terminal
    Failed,    // terminal
}

impl JobStatus {
    /// Returns true if this is a terminal state (Completed or Failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Column value stored in the jobs table.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "0",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "0" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Human-facing name, used by the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" | "0" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One processing request for an uploaded track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    /// Object key of the raw upload.
    pub source_key: String,
    pub status: JobStatus,
    /// Only set when `status == Failed`.
    pub error_message: Option<String>,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds. Refreshed on every transition and heartbeat.
    pub updated_at: i64,
    pub claimed_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl Job {
    /// The raw upload's file name, i.e. the last segment of the source key.
    pub fn original_filename(&self) -> &str {
        self.source_key
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or(&self.source_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_source(source_key: &str) -> Job {
        Job {
            id: "trk-001".to_string(),
            source_key: source_key.to_string(),
            status: JobStatus::Pending,
            error_message: None,
            created_at: 0,
            updated_at: 0,
            claimed_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn test_db_codes_match_legacy_schema() {
        assert_eq!(JobStatus::Pending.as_db_str(), "0");
        assert_eq!(JobStatus::Processing.as_db_str(), "processing");
        assert_eq!(JobStatus::Completed.as_db_str(), "completed");
        assert_eq!(JobStatus::Failed.as_db_str(), "failed");
    }

    #[test]
    fn test_db_codes_parse_back() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::from_db_str(status.as_db_str()), Some(status));
        }
        assert_eq!(JobStatus::from_db_str("pending"), None);
        assert_eq!(JobStatus::from_db_str(""), None);
    }

    #[test]
    fn test_cli_parse_accepts_names_and_legacy_code() {
        assert_eq!(JobStatus::parse("Pending"), Some(JobStatus::Pending));
        assert_eq!(JobStatus::parse("0"), Some(JobStatus::Pending));
        assert_eq!(JobStatus::parse("FAILED"), Some(JobStatus::Failed));
        assert_eq!(JobStatus::parse("done"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_original_filename() {
        assert_eq!(
            job_with_source("tracks/trk-001.wav").original_filename(),
            "trk-001.wav"
        );
        assert_eq!(job_with_source("trk-001.wav").original_filename(), "trk-001.wav");
        assert_eq!(
            job_with_source("tracks/nested/My Song.flac").original_filename(),
            "My Song.flac"
        );
    }
}
