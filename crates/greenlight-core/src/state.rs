//! Workflow state machine: guarded PENDING → APPROVED/REJECTED transitions.
//! The guard is a single conditional UPDATE, so a second click on a stale
//! inline keyboard observes a non-pending row and returns false.

use anyhow::Result;

use crate::db::Db;
use crate::types::WorkflowStatus;

pub fn approve(
    db: &Db,
    workflow_id: &str,
    approver_id: i64,
    approver_username: &str,
    comment: Option<&str>,
) -> Result<bool> {
    db.transition_status(
        workflow_id,
        WorkflowStatus::Approved,
        approver_id,
        approver_username,
        comment.unwrap_or("已通过"),
    )
}

pub fn reject(
    db: &Db,
    workflow_id: &str,
    approver_id: i64,
    approver_username: &str,
    comment: Option<&str>,
) -> Result<bool> {
    db.transition_status(
        workflow_id,
        WorkflowStatus::Rejected,
        approver_id,
        approver_username,
        comment.unwrap_or("已拒绝"),
    )
}
