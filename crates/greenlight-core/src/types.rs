use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ── Workflow ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Approved,
    Rejected,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Approved => "approved",
            WorkflowStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> WorkflowStatus {
        match s {
            "approved" => WorkflowStatus::Approved,
            "rejected" => WorkflowStatus::Rejected,
            _ => WorkflowStatus::Pending,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, WorkflowStatus::Pending)
    }
}

/// Which release form produced the workflow; selects the message templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateType {
    Default,
    AddressOnly,
}

impl TemplateType {
    pub fn as_str(self) -> &'static str {
        match self {
            TemplateType::Default => "default",
            TemplateType::AddressOnly => "address_only",
        }
    }

    pub fn parse(s: &str) -> TemplateType {
        match s {
            "address_only" => TemplateType::AddressOnly,
            _ => TemplateType::Default,
        }
    }
}

/// A release request and its approval lifecycle, as stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    /// Epoch seconds at creation; drives retention.
    pub timestamp: i64,
    pub user_id: i64,
    pub username: String,
    /// The canonical multi-line submission record produced by the form.
    pub submission_data: String,
    pub status: WorkflowStatus,
    pub approver_id: Option<i64>,
    pub approver_username: Option<String>,
    pub approval_time: Option<String>,
    pub approval_comment: Option<String>,
    pub created_at: String,
    pub synced_to_api: bool,
    /// group_id -> message_id of the root approval message in that group.
    pub group_messages: HashMap<i64, i64>,
    pub project: Option<String>,
    pub template_type: TemplateType,
}

// ── Build status ─────────────────────────────────────────────────────────

/// Shared status vocabulary for SSO releases and Jenkins builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BuildStatus {
    Queued,
    Building,
    Success,
    Failure,
    Aborted,
    Unstable,
    Timeout,
    Error,
}

impl BuildStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::Queued => "QUEUED",
            BuildStatus::Building => "BUILDING",
            BuildStatus::Success => "SUCCESS",
            BuildStatus::Failure => "FAILURE",
            BuildStatus::Aborted => "ABORTED",
            BuildStatus::Unstable => "UNSTABLE",
            BuildStatus::Timeout => "TIMEOUT",
            BuildStatus::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> BuildStatus {
        match s {
            "QUEUED" => BuildStatus::Queued,
            "SUCCESS" => BuildStatus::Success,
            "FAILURE" => BuildStatus::Failure,
            "ABORTED" => BuildStatus::Aborted,
            "UNSTABLE" => BuildStatus::Unstable,
            "TIMEOUT" => BuildStatus::Timeout,
            "ERROR" => BuildStatus::Error,
            _ => BuildStatus::Building,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BuildStatus::Success
                | BuildStatus::Failure
                | BuildStatus::Aborted
                | BuildStatus::Unstable
                | BuildStatus::Timeout
                | BuildStatus::Error
        )
    }
}

// ── SSO ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitStatus {
    Pending,
    Success,
    Failed,
}

impl SubmitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmitStatus::Pending => "pending",
            SubmitStatus::Success => "success",
            SubmitStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> SubmitStatus {
        match s {
            "success" => SubmitStatus::Success,
            "failed" => SubmitStatus::Failed,
            _ => SubmitStatus::Pending,
        }
    }
}

/// One release ticket per approved workflow. `submission_id == workflow_id`
/// enforces at-most-one submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsoSubmission {
    pub submission_id: String,
    pub workflow_id: String,
    pub process_instance_id: Option<String>,
    pub order_data: serde_json::Value,
    pub submit_status: SubmitStatus,
    pub submit_time: i64,
    pub submit_response: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

/// One row per release id returned by the ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsoBuild {
    pub build_id: String,
    pub submission_id: String,
    pub workflow_id: String,
    pub release_id: i64,
    pub job_name: String,
    pub build_status: BuildStatus,
    pub build_start_time: Option<i64>,
    pub build_end_time: Option<i64>,
    pub build_detail: Option<serde_json::Value>,
    pub notified: bool,
}

// ── Jenkins ──────────────────────────────────────────────────────────────

/// One row per triggered Jenkins job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JenkinsBuild {
    pub build_id: String,
    pub workflow_id: String,
    /// Shaped `<env-key>/<service-name>`.
    pub job_name: String,
    pub job_url: Option<String>,
    pub build_number: Option<i64>,
    pub build_status: BuildStatus,
    pub build_start_time: Option<i64>,
    pub build_end_time: Option<i64>,
    /// Milliseconds, from Jenkins' `duration`.
    pub build_duration: Option<i64>,
    pub build_parameters: Option<serde_json::Value>,
    pub notified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_status_round_trips() {
        for s in [
            BuildStatus::Queued,
            BuildStatus::Building,
            BuildStatus::Success,
            BuildStatus::Failure,
            BuildStatus::Aborted,
            BuildStatus::Unstable,
            BuildStatus::Timeout,
            BuildStatus::Error,
        ] {
            assert_eq!(BuildStatus::parse(s.as_str()), s);
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(!BuildStatus::Queued.is_terminal());
        assert!(!BuildStatus::Building.is_terminal());
        assert!(BuildStatus::Timeout.is_terminal());
        assert!(BuildStatus::Error.is_terminal());
        assert!(WorkflowStatus::Approved.is_terminal());
        assert!(!WorkflowStatus::Pending.is_terminal());
    }

    #[test]
    fn unknown_status_falls_back_to_building() {
        assert_eq!(BuildStatus::parse("NOT_BUILT"), BuildStatus::Building);
    }
}
