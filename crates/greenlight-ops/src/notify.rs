//! Notifier: renders templates, posts the root approval message to every
//! configured group, edits it on terminal transitions, and reply-threads
//! build events beneath it. Every user-controlled value is HTML-escaped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{error, info, warn};

use greenlight_core::config::ConfigService;
use greenlight_core::db::Db;
use greenlight_core::escape::escape;
use greenlight_core::options::ProjectOptions;
use greenlight_core::telegram::{InlineKeyboard, SendOutcome, Telegram};
use greenlight_core::templates::template_key;
use greenlight_core::types::{BuildStatus, JenkinsBuild, SsoBuild, Workflow, WorkflowStatus};

use crate::submission::parse_submission;

const DM_TIMEOUT: Duration = Duration::from_secs(5);

fn status_text(status: WorkflowStatus) -> &'static str {
    match status {
        WorkflowStatus::Pending => "待审批",
        WorkflowStatus::Approved => "已通过",
        WorkflowStatus::Rejected => "已拒绝",
    }
}

/// Pretty, emoji-labelled rendering of the canonical submission record.
/// Falls back to the raw text when the record does not parse.
pub fn pretty_submission(data: &str) -> String {
    let parsed = parse_submission(data);
    let mut lines = Vec::new();
    if let Some(t) = &parsed.apply_time {
        lines.push(format!("🕐 申请时间: {t}"));
    }
    if let Some(p) = &parsed.project {
        lines.push(format!("📦 申请项目: {p}"));
    }
    if let Some(e) = &parsed.environment {
        lines.push(format!("🌍 申请环境: {e}"));
    }
    if let Some(b) = &parsed.branch {
        lines.push(format!("🌿 申请发版分支: {b}"));
    }
    match parsed.services.len() {
        0 => {}
        1 => lines.push(format!("🚀 申请部署服务: {}", parsed.services[0])),
        _ => {
            let items: Vec<String> =
                parsed.services.iter().map(|s| format!("   • {s}")).collect();
            lines.push(format!("🚀 申请部署服务:\n{}", items.join("\n")));
        }
    }
    match parsed.hashes.len() {
        0 => {}
        1 => lines.push(format!("🔑 申请发版hash: <code>{}</code>", parsed.hashes[0])),
        _ if parsed.hashes.len() == parsed.services.len() => {
            let items: Vec<String> = parsed
                .services
                .iter()
                .zip(&parsed.hashes)
                .map(|(s, h)| format!("   • {s}: <code>{h}</code>"))
                .collect();
            lines.push(format!("🔑 申请发版hash:\n{}", items.join("\n")));
        }
        _ => {
            let items: Vec<String> = parsed
                .hashes
                .iter()
                .map(|h| format!("   • <code>{h}</code>"))
                .collect();
            lines.push(format!("🔑 申请发版hash:\n{}", items.join("\n")));
        }
    }
    if !parsed.addresses.is_empty() {
        let items: Vec<String> =
            parsed.addresses.iter().map(|a| format!("   • {a}")).collect();
        lines.push(format!("🔗 申请新增地址:\n{}", items.join("\n")));
    }
    if let Some(c) = &parsed.content {
        lines.push(format!("📝 申请发版服务内容: {c}"));
    }
    if lines.is_empty() {
        return data.to_string();
    }
    lines.join("\n")
}

/// Fill a message template. The submission block is pretty-rendered and
/// escaped before interpolation; the template's own markup stays intact.
pub fn render_template(template: &str, workflow: &Workflow, approver_username: &str) -> String {
    let submission = pretty_submission(&escape(&workflow.submission_data));
    template
        .replace("{workflow_id}", &escape(&workflow.workflow_id))
        .replace("{username}", &escape(&workflow.username))
        .replace("{created_at}", &escape(&workflow.created_at))
        .replace("{submission_data}", &submission)
        .replace("{status}", status_text(workflow.status))
        .replace(
            "{approver_username}",
            &escape(approver_username.trim_start_matches('@')),
        )
        .replace(
            "{approval_time}",
            &escape(workflow.approval_time.as_deref().unwrap_or("N/A")),
        )
        .replace(
            "{approval_comment}",
            &escape(workflow.approval_comment.as_deref().unwrap_or("无")),
        )
}

fn approval_keyboard(workflow_id: &str) -> InlineKeyboard {
    InlineKeyboard::new().row(vec![
        ("✅ 通过".to_string(), format!("approve:{workflow_id}")),
        ("❌ 拒绝".to_string(), format!("reject:{workflow_id}")),
    ])
}

fn group_ids_for(db: &Db, workflow: &Workflow) -> Vec<i64> {
    let Some(project) = workflow.project.as_deref() else {
        return Vec::new();
    };
    ProjectOptions::load(db)
        .ok()
        .and_then(|o| o.project(project).map(|p| p.group_ids.clone()))
        .unwrap_or_default()
}

fn ops_usernames_for(db: &Db, workflow: &Workflow) -> Vec<String> {
    let Some(project) = workflow.project.as_deref() else {
        return Vec::new();
    };
    ProjectOptions::load(db)
        .ok()
        .and_then(|o| o.project(project).map(|p| p.ops_usernames.clone()))
        .unwrap_or_default()
}

// ── Root message ──────────────────────────────────────────────────────────

/// Post the pending-approval message with its approve/reject buttons to
/// every group configured for the workflow's project. Partial success is
/// acceptable; total failure is an error the caller surfaces to the user.
pub async fn post_root(
    tg: &Telegram,
    db: &Db,
    config: &ConfigService,
    workflow: &Workflow,
) -> Result<HashMap<i64, i64>> {
    let group_ids = group_ids_for(db, workflow);
    if group_ids.is_empty() {
        bail!(
            "project {:?} has no group_ids configured",
            workflow.project.as_deref().unwrap_or("<none>")
        );
    }

    let approver = {
        let configured = config.approver_username();
        if configured.is_empty() {
            "审批人".to_string()
        } else {
            configured
        }
    };
    let key = template_key(WorkflowStatus::Pending, workflow.template_type);
    let template = db.get_message_template(key, workflow.project.as_deref());
    let text = render_template(&template, workflow, &approver);
    let keyboard = approval_keyboard(&workflow.workflow_id);

    let mut group_messages = HashMap::new();
    for group_id in group_ids {
        match tg.send_message(group_id, &text, None, Some(&keyboard)).await {
            Ok(message_id) => {
                info!(
                    "approval request {} posted to group {group_id} (message {message_id})",
                    workflow.workflow_id
                );
                group_messages.insert(group_id, message_id);
            }
            Err(e) => error!(
                "failed to post {} to group {group_id}: {e:#}",
                workflow.workflow_id
            ),
        }
    }
    if group_messages.is_empty() {
        bail!("approval request could not be posted to any group");
    }
    Ok(group_messages)
}

/// Rewrite every stored root message with the terminal template. Replacing
/// the text drops the inline buttons.
pub async fn edit_root(tg: &Telegram, db: &Db, workflow: &Workflow) {
    let approver = workflow.approver_username.clone().unwrap_or_default();
    let key = template_key(workflow.status, workflow.template_type);
    let template = db.get_message_template(key, workflow.project.as_deref());
    let text = render_template(&template, workflow, &approver);

    let mut updated = 0usize;
    for (group_id, message_id) in &workflow.group_messages {
        match tg.edit_message_text(*group_id, *message_id, &text, None).await {
            Ok(()) => updated += 1,
            Err(e) => error!(
                "failed to edit root message {message_id} in group {group_id}: {e:#}"
            ),
        }
    }
    info!(
        "root messages updated for {} ({updated}/{} groups)",
        workflow.workflow_id,
        workflow.group_messages.len()
    );
}

/// Thread an event message beneath each root approval message. Without a
/// stored root the event degrades to a plain send in every configured
/// group. Per-group failures are isolated.
pub async fn reply_thread(tg: &Telegram, db: &Db, workflow: &Workflow, text: &str) {
    if workflow.group_messages.is_empty() {
        warn!(
            "no root message recorded for {}, sending unthreaded",
            workflow.workflow_id
        );
        for group_id in group_ids_for(db, workflow) {
            if let Err(e) = tg.send_message(group_id, text, None, None).await {
                error!("failed to notify group {group_id}: {e:#}");
            }
        }
        return;
    }
    for (group_id, root_message_id) in &workflow.group_messages {
        if let Err(e) = tg
            .send_message(*group_id, text, Some(*root_message_id), None)
            .await
        {
            error!("failed to reply in group {group_id}: {e:#}");
        }
    }
}

// ── Submitter DM ──────────────────────────────────────────────────────────

/// Direct-message the submitter the decision, bounded by a hard 5 s
/// deadline. The approval result is already committed; every outcome here
/// is at most a warning.
pub async fn notify_submitter(tg: &Telegram, workflow: &Workflow) {
    let approver = escape(workflow.approver_username.as_deref().unwrap_or("未知用户"));
    let approval_time = escape(workflow.approval_time.as_deref().unwrap_or("N/A"));
    let text = match workflow.status {
        WorkflowStatus::Approved => format!(
            "✅ 您的工作流已通过审批！\n\n🆔 工作流ID: {}\n✅ 审批人: @{approver}\n📅 审批时间: {approval_time}",
            escape(&workflow.workflow_id)
        ),
        WorkflowStatus::Rejected => format!(
            "❌ 您的工作流已被拒绝\n\n🆔 工作流ID: {}\n❌ 审批人: @{approver}\n📅 审批时间: {approval_time}\n💬 审批意见: {}",
            escape(&workflow.workflow_id),
            escape(workflow.approval_comment.as_deref().unwrap_or("无"))
        ),
        WorkflowStatus::Pending => return,
    };
    match tokio::time::timeout(DM_TIMEOUT, tg.send_direct(workflow.user_id, &text)).await {
        Ok(SendOutcome::Delivered) => {
            info!("submitter {} notified for {}", workflow.user_id, workflow.workflow_id);
        }
        Ok(SendOutcome::UserUnreachable) => {
            warn!(
                "submitter {} has not started the bot, decision for {} not delivered",
                workflow.user_id, workflow.workflow_id
            );
        }
        Ok(SendOutcome::Transient(e)) => {
            warn!("submitter DM failed for {}: {e}", workflow.workflow_id);
        }
        Err(_) => {
            warn!(
                "submitter DM timed out after {DM_TIMEOUT:?} for {}",
                workflow.workflow_id
            );
        }
    }
}

// ── SSO events ────────────────────────────────────────────────────────────

pub async fn notify_sso_submitted(
    tg: &Telegram,
    db: &Db,
    workflow: &Workflow,
    process_instance_id: &str,
    services: &[String],
) {
    let service_lines: Vec<String> = services
        .iter()
        .map(|s| format!("  • {}", escape(s)))
        .collect();
    let text = format!(
        "━━━━━━━━━━━━━━━━━━━━\n✅ SSO 工单提交成功\n━━━━━━━━━━━━━━━━━━━━\n\n\
         🆔 工作流ID: <code>{}</code>\n📋 SSO 工单ID: <code>{}</code>\n\n\
         🚀 发布服务:\n{}\n\n⏳ 构建正在进行中，完成后将自动通知...",
        escape(&workflow.workflow_id),
        escape(process_instance_id),
        service_lines.join("\n")
    );
    reply_thread(tg, db, workflow, &text).await;
}

pub async fn notify_sso_failed(tg: &Telegram, db: &Db, workflow: &Workflow, error_message: &str) {
    let text = format!(
        "━━━━━━━━━━━━━━━━━━━━\n❌ SSO 工单提交失败\n━━━━━━━━━━━━━━━━━━━━\n\n\
         🆔 工作流ID: <code>{}</code>\n📅 审批时间: {}\n\n\
         ❌ 错误信息: {}\n\n请检查配置或联系管理员",
        escape(&workflow.workflow_id),
        escape(workflow.approval_time.as_deref().unwrap_or("N/A")),
        escape(error_message)
    );
    reply_thread(tg, db, workflow, &text).await;
}

fn format_duration(start: Option<i64>, end: Option<i64>) -> String {
    match (start, end) {
        (Some(start), Some(end)) if end >= start => {
            let secs = end - start;
            format!("{}分{}秒", secs / 60, secs % 60)
        }
        _ => "未知".to_string(),
    }
}

pub async fn notify_sso_build(tg: &Telegram, db: &Db, workflow: &Workflow, build: &SsoBuild) {
    let job_name = if build.job_name.is_empty() {
        format!("release {}", build.release_id)
    } else {
        build.job_name.clone()
    };
    let text = build_status_message(
        db,
        workflow,
        &job_name,
        None,
        build.build_status,
        format_duration(build.build_start_time, build.build_end_time),
        None,
    );
    reply_thread(tg, db, workflow, &text).await;
}

// ── Jenkins events ────────────────────────────────────────────────────────

pub async fn notify_jenkins_build(tg: &Telegram, db: &Db, workflow: &Workflow, build: &JenkinsBuild) {
    let hash = build
        .build_parameters
        .as_ref()
        .and_then(|p| p["check_commitID"].as_str())
        .map(str::to_string);
    let duration = match build.build_duration {
        Some(ms) => {
            let secs = ms / 1000;
            format!("{}分{}秒", secs / 60, secs % 60)
        }
        None => format_duration(build.build_start_time, build.build_end_time),
    };
    let text = build_status_message(
        db,
        workflow,
        &build.job_name,
        build.build_number,
        build.build_status,
        duration,
        hash.as_deref(),
    );
    reply_thread(tg, db, workflow, &text).await;
}

/// One rendering for every build event: workflow id, service display
/// (`job#number` when the number is known), hash, status, and ops mentions
/// on failure only.
fn build_status_message(
    db: &Db,
    workflow: &Workflow,
    job_name: &str,
    build_number: Option<i64>,
    status: BuildStatus,
    duration: String,
    hash: Option<&str>,
) -> String {
    let service = match build_number {
        Some(n) => format!("{}#{n}", escape(job_name)),
        None => escape(job_name),
    };
    let (banner, verdict) = match status {
        BuildStatus::Success => ("✅ 构建成功", "✅ 构建状态: 成功\n💡 请研发查看服务启动日志"),
        BuildStatus::Failure => ("❌ 构建失败", "❌ 构建状态: 失败\n🔍 请查看日志排查问题"),
        BuildStatus::Aborted => ("⚠️ 构建已终止", "⚠️ 构建状态: 已终止"),
        BuildStatus::Unstable => ("⚠️ 构建不稳定", "⚠️ 构建状态: 不稳定（可能有测试失败）"),
        BuildStatus::Timeout => ("⏰ 构建监控超时", "⏰ 构建状态: 超时，请到 Jenkins 查看进度"),
        _ => ("❓ 构建状态未知", "❓ 构建状态未知"),
    };
    let mut text = format!(
        "━━━━━━━━━━━━━━━━━━━━\n{banner}\n━━━━━━━━━━━━━━━━━━━━\n\n\
         🆔 工作流ID: <code>{}</code>\n📋 服务名称: {service}\n",
        escape(&workflow.workflow_id)
    );
    if let Some(hash) = hash {
        text.push_str(&format!("🔑 发版hash: <code>{}</code>\n", escape(hash)));
    }
    text.push_str(&format!("⏱️ 构建时间: {}\n\n{verdict}", escape(&duration)));

    if matches!(
        status,
        BuildStatus::Failure | BuildStatus::Timeout | BuildStatus::Error
    ) {
        let mentions: Vec<String> = ops_usernames_for(db, workflow)
            .iter()
            .map(|u| format!("@{}", escape(u.trim_start_matches('@'))))
            .collect();
        if !mentions.is_empty() {
            text.push_str(&format!("\n\n{} 请查看错误日志", mentions.join(" ")));
        }
    }
    text
}

// ── Shared helpers for the dispatcher ─────────────────────────────────────

/// Post the root message and persist the `(group, message)` map on the
/// workflow in one step. Used by the dispatcher right after form confirm.
pub async fn post_and_attach(
    tg: &Telegram,
    db: &Arc<Db>,
    config: &ConfigService,
    workflow: &Workflow,
) -> Result<HashMap<i64, i64>> {
    let group_messages = post_root(tg, db, config, workflow).await?;
    db.attach_group_messages(&workflow.workflow_id, &group_messages)?;
    Ok(group_messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenlight_core::types::TemplateType;

    fn workflow() -> Workflow {
        Workflow {
            workflow_id: "WF-20260801-00C0FFEE".into(),
            timestamp: 0,
            user_id: 42,
            username: "alice<script>".into(),
            submission_data: "申请项目: EBPAY\n申请环境: UAT\n申请部署服务: svc-a\n申请发版hash: abc".into(),
            status: WorkflowStatus::Pending,
            approver_id: None,
            approver_username: None,
            approval_time: None,
            approval_comment: None,
            created_at: "2026-08-01 10:00:00".into(),
            synced_to_api: false,
            group_messages: HashMap::new(),
            project: Some("EBPAY".into()),
            template_type: TemplateType::Default,
        }
    }

    #[test]
    fn render_escapes_user_values() {
        let rendered = render_template("{username} -> {workflow_id}", &workflow(), "@boss");
        assert_eq!(rendered, "alice&lt;script&gt; -> WF-20260801-00C0FFEE");
    }

    #[test]
    fn render_strips_at_from_approver() {
        let rendered = render_template("@{approver_username}", &workflow(), "@boss");
        assert_eq!(rendered, "@boss");
    }

    #[test]
    fn pretty_submission_keeps_field_values() {
        let pretty = pretty_submission(&workflow().submission_data);
        assert!(pretty.contains("📦 申请项目: EBPAY"));
        assert!(pretty.contains("🚀 申请部署服务: svc-a"));
        assert!(pretty.contains("<code>abc</code>"));
    }

    #[test]
    fn pretty_submission_falls_back_to_raw() {
        assert_eq!(pretty_submission("free text"), "free text");
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(Some(100), Some(195)), "1分35秒");
        assert_eq!(format_duration(Some(100), None), "未知");
        assert_eq!(format_duration(None, None), "未知");
    }
}
