//! Structured run report surfaced to the user

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::filter::Rejection;
use crate::synthesize::CommitRecord;

/// A planned commit shown in the dry-run preview
#[derive(Debug, Clone)]
pub struct ProposedCommit {
    pub message: String,
    pub files: BTreeSet<String>,
    pub scopes: BTreeSet<String>,
    pub rationale: Option<String>,
}

/// Rejection entry of the report
#[derive(Debug, Clone)]
pub struct RejectionSummary {
    pub files: Vec<String>,
    pub reason: String,
}

impl From<&Rejection> for RejectionSummary {
    fn from(rejection: &Rejection) -> Self {
        Self {
            files: rejection.group.files.iter().cloned().collect(),
            reason: rejection.reason.to_string(),
        }
    }
}

/// Outcome of one pipeline run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: &'static str,
    pub branch: String,
    pub commits: Vec<CommitRecord>,
    pub rejections: Vec<RejectionSummary>,
    pub warnings: Vec<String>,
    pub new_tip: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn commit_count(&self) -> usize {
        self.commits.len()
    }

    pub fn changed_anything(&self) -> bool {
        self.new_tip.is_some() && !self.commits.is_empty()
    }
}
