//! Job model: one record per user request, created by the planner and
//! mutated only by status transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Successful,
    Failed,
    Warning,
}

/// Link to a result artifact or status resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobLink {
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A user request being processed by one or more services
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// The request id doubles as the job id
    pub job_id: String,
    pub username: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Original request URL, echoed for status display
    pub request: String,
    pub is_async: bool,
    pub num_input_granules: u32,
    pub collection_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub links: Vec<JobLink>,
    /// Percent complete, 0-100
    #[serde(default)]
    pub progress: u8,
}

impl Job {
    #[must_use]
    pub fn new(
        job_id: String,
        username: String,
        request: String,
        is_async: bool,
        num_input_granules: u32,
        collection_ids: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            username,
            status: JobStatus::Running,
            message: None,
            request,
            is_async,
            num_input_granules,
            collection_ids,
            created_at: now,
            updated_at: now,
            links: Vec::new(),
            progress: 0,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, JobStatus::Running)
    }

    /// Transition to a terminal or intermediate status
    pub fn set_status(&mut self, status: JobStatus, message: Option<String>) {
        self.status = status;
        if message.is_some() {
            self.message = message;
        }
        self.updated_at = Utc::now();
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Successful => write!(f, "successful"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Warning => write!(f, "warning"),
        }
    }
}
