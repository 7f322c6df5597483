//! Canonical message templates seeded into `message_templates` on first
//! access. Project-scoped rows override these; placeholders are filled by
//! the notifier.

pub const TPL_PENDING: &str = "default";
pub const TPL_APPROVED: &str = "approved_default";
pub const TPL_REJECTED: &str = "rejected_default";
pub const TPL_PENDING_ADDRESS: &str = "address_only";
pub const TPL_APPROVED_ADDRESS: &str = "approved_address_only";
pub const TPL_REJECTED_ADDRESS: &str = "rejected_address_only";

const WORKFLOW_MESSAGE_TEMPLATE: &str = "━━━━━━━━━━━━━━━━━━━━
📋 工作流审批请求
━━━━━━━━━━━━━━━━━━━━

🆔 工作流ID: <code>{workflow_id}</code>
👤 提交人: @{username}
📅 提交时间: {created_at}

━━━━━━━━━━━━━━━━━━━━
📝 申请详情
━━━━━━━━━━━━━━━━━━━━

{submission_data}

━━━━━━━━━━━━━━━━━━━━
⏳ 状态: {status}
━━━━━━━━━━━━━━━━━━━━

@{approver_username} 请审批";

const WORKFLOW_APPROVED_TEMPLATE: &str = "━━━━━━━━━━━━━━━━━━━━
✅ 工作流已通过
━━━━━━━━━━━━━━━━━━━━

🆔 工作流ID: <code>{workflow_id}</code>
👤 提交人: @{username}
✅ 审批人: @{approver_username}
📅 审批时间: {approval_time}

━━━━━━━━━━━━━━━━━━━━
📝 申请详情
━━━━━━━━━━━━━━━━━━━━

{submission_data}";

const WORKFLOW_REJECTED_TEMPLATE: &str = "━━━━━━━━━━━━━━━━━━━━
❌ 工作流已拒绝
━━━━━━━━━━━━━━━━━━━━

🆔 工作流ID: {workflow_id}
👤 提交人: @{username}
❌ 审批人: @{approver_username}
📅 审批时间: {approval_time}

申请发版服务
{submission_data}

💬 审批意见: {approval_comment}";

const WORKFLOW_MESSAGE_TEMPLATE_ADDRESS: &str = "━━━━━━━━━━━━━━━━━━━━
📋 新增地址审批请求
━━━━━━━━━━━━━━━━━━━━

🆔 工作流ID: <code>{workflow_id}</code>
👤 提交人: @{username}
📅 提交时间: {created_at}

━━━━━━━━━━━━━━━━━━━━
📝 申请详情
━━━━━━━━━━━━━━━━━━━━

{submission_data}

━━━━━━━━━━━━━━━━━━━━
⏳ 状态: {status}
━━━━━━━━━━━━━━━━━━━━

@{approver_username} 请审批";

const WORKFLOW_APPROVED_TEMPLATE_ADDRESS: &str = "━━━━━━━━━━━━━━━━━━━━
✅ 新增地址已通过
━━━━━━━━━━━━━━━━━━━━

🆔 工作流ID: <code>{workflow_id}</code>
👤 提交人: @{username}
✅ 审批人: @{approver_username}
📅 审批时间: {approval_time}

━━━━━━━━━━━━━━━━━━━━
📝 申请详情
━━━━━━━━━━━━━━━━━━━━

{submission_data}";

const WORKFLOW_REJECTED_TEMPLATE_ADDRESS: &str = "━━━━━━━━━━━━━━━━━━━━
❌ 新增地址已拒绝
━━━━━━━━━━━━━━━━━━━━

🆔 工作流ID: {workflow_id}
👤 提交人: @{username}
❌ 审批人: @{approver_username}
📅 审批时间: {approval_time}

{submission_data}

💬 审批意见: {approval_comment}";

/// (template_type, content) pairs seeded with a NULL project.
pub const DEFAULT_TEMPLATES: [(&str, &str); 6] = [
    (TPL_PENDING, WORKFLOW_MESSAGE_TEMPLATE),
    (TPL_APPROVED, WORKFLOW_APPROVED_TEMPLATE),
    (TPL_REJECTED, WORKFLOW_REJECTED_TEMPLATE),
    (TPL_PENDING_ADDRESS, WORKFLOW_MESSAGE_TEMPLATE_ADDRESS),
    (TPL_APPROVED_ADDRESS, WORKFLOW_APPROVED_TEMPLATE_ADDRESS),
    (TPL_REJECTED_ADDRESS, WORKFLOW_REJECTED_TEMPLATE_ADDRESS),
];

use crate::types::{TemplateType, WorkflowStatus};

/// Template key for a `(status, template_type)` pair.
pub fn template_key(status: WorkflowStatus, template_type: TemplateType) -> &'static str {
    match (status, template_type) {
        (WorkflowStatus::Pending, TemplateType::Default) => TPL_PENDING,
        (WorkflowStatus::Approved, TemplateType::Default) => TPL_APPROVED,
        (WorkflowStatus::Rejected, TemplateType::Default) => TPL_REJECTED,
        (WorkflowStatus::Pending, TemplateType::AddressOnly) => TPL_PENDING_ADDRESS,
        (WorkflowStatus::Approved, TemplateType::AddressOnly) => TPL_APPROVED_ADDRESS,
        (WorkflowStatus::Rejected, TemplateType::AddressOnly) => TPL_REJECTED_ADDRESS,
    }
}
