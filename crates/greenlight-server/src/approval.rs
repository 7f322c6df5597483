//! Approval dispatcher: posts confirmed requests to the project's groups
//! and handles the approve/reject button clicks, spawning the downstream
//! orchestration as detached tasks.

use std::sync::Arc;

use tracing::{error, info, warn};

use greenlight_core::state;
use greenlight_core::types::{TemplateType, Workflow, WorkflowStatus};
use greenlight_core::telegram::TgCallback;
use greenlight_ops::{jenkins, notify, sso, sync};

use crate::handlers::App;

pub const ACTION_APPROVE: &str = "approve";
pub const ACTION_REJECT: &str = "reject";

/// Post-to-groups path, entered after the form's confirm click. Creates the
/// workflow, posts the root message everywhere, and persists the message
/// map. A total send failure rolls the workflow back and surfaces an error
/// where the user submitted.
pub async fn submit_form(
    app: &Arc<App>,
    chat_id: i64,
    message_id: i64,
    user_id: i64,
    username: &str,
    submission_data: &str,
    project: &str,
    template_type: TemplateType,
) {
    let workflow = match app.db.create_workflow(
        user_id,
        username,
        submission_data,
        project,
        template_type,
    ) {
        Ok(w) => w,
        Err(e) => {
            error!("failed to create workflow for {username}: {e:#}");
            let _ = app
                .tg
                .edit_message_text(chat_id, message_id, "❌ 提交失败，请稍后重试", None)
                .await;
            return;
        }
    };

    match notify::post_and_attach(&app.tg, &app.db, &app.config, &workflow).await {
        Ok(group_messages) => {
            info!(
                "workflow {} posted to {} group(s)",
                workflow.workflow_id,
                group_messages.len()
            );
            let receipt = format!(
                "✅ 工作流提交成功！\n\n🆔 工作流ID: {}\n📝 已发送到群组，等待审批...",
                workflow.workflow_id
            );
            let _ = app
                .tg
                .edit_message_text(chat_id, message_id, &receipt, None)
                .await;
        }
        Err(e) => {
            error!(
                "failed to post workflow {} to any group: {e:#}",
                workflow.workflow_id
            );
            if let Err(del) = app.db.delete_workflow(&workflow.workflow_id) {
                error!("rollback of {} failed: {del:#}", workflow.workflow_id);
            }
            let _ = app
                .tg
                .edit_message_text(
                    chat_id,
                    message_id,
                    &format!("❌ 提交失败：{e:#}"),
                    None,
                )
                .await;
        }
    }
}

/// Handle an `approve:<id>` / `reject:<id>` click. Answers the callback
/// immediately, gates approve on the configured approver, then runs the
/// rest in a detached task so the poll loop stays responsive.
pub async fn handle_click(app: &Arc<App>, cb: TgCallback) {
    let Some((action, workflow_id)) = cb.data.split_once(':') else {
        warn!("malformed approval callback: {}", cb.data);
        let _ = app.tg.answer_callback(&cb.callback_id, "❌ 无效的审批操作", true).await;
        return;
    };
    let action = action.to_string();
    let workflow_id = workflow_id.to_string();

    // Ack first so the button spinner stops.
    let ack = if action == ACTION_APPROVE {
        "✅ 正在处理审批..."
    } else {
        "❌ 正在处理拒绝..."
    };
    if let Err(e) = app.tg.answer_callback(&cb.callback_id, ack, false).await {
        warn!("failed to answer callback for {workflow_id}: {e:#}");
    }

    // Approve is gated; reject is anyone's cancel button.
    if action == ACTION_APPROVE && !app.config.is_authorised_approver(cb.user_id, &cb.username) {
        warn!(
            "user {} ({}) clicked approve on {workflow_id} without permission",
            cb.user_id, cb.username
        );
        let _ = app
            .tg
            .answer_callback(&cb.callback_id, "❌ 你无权同意此次服务发版", true)
            .await;
        return;
    }

    let app = Arc::clone(app);
    tokio::spawn(async move {
        process_decision(&app, &cb, &action, &workflow_id).await;
    });
}

async fn process_decision(app: &Arc<App>, cb: &TgCallback, action: &str, workflow_id: &str) {
    let workflow = match app.db.get_workflow(workflow_id) {
        Ok(Some(w)) => w,
        Ok(None) => {
            warn!("approval click for unknown workflow {workflow_id}");
            let _ = app
                .tg
                .answer_callback(&cb.callback_id, "❌ 工作流不存在或已过期", true)
                .await;
            return;
        }
        Err(e) => {
            error!("failed to load workflow {workflow_id}: {e:#}");
            return;
        }
    };
    if workflow.status != WorkflowStatus::Pending {
        info!(
            "workflow {workflow_id} already {} when {} clicked",
            workflow.status.as_str(),
            cb.username
        );
        let _ = app
            .tg
            .answer_callback(&cb.callback_id, "⚠️ 该工作流已被审批", true)
            .await;
        return;
    }

    let decided = match action {
        ACTION_APPROVE => state::approve(&app.db, workflow_id, cb.user_id, &cb.username, None),
        _ => state::reject(&app.db, workflow_id, cb.user_id, &cb.username, None),
    };
    match decided {
        Ok(true) => info!("workflow {workflow_id} {action}d by {} ({})", cb.username, cb.user_id),
        Ok(false) => {
            // Lost the race against another click; nothing else to do.
            let _ = app
                .tg
                .answer_callback(&cb.callback_id, "⚠️ 该工作流已被审批", true)
                .await;
            return;
        }
        Err(e) => {
            error!("transition failed for {workflow_id}: {e:#}");
            let _ = app
                .tg
                .answer_callback(&cb.callback_id, "❌ 审批操作失败", true)
                .await;
            return;
        }
    }

    let workflow = match app.db.get_workflow(workflow_id) {
        Ok(Some(w)) => w,
        _ => {
            error!("workflow {workflow_id} vanished after transition");
            return;
        }
    };

    // Terminal state is committed; everything from here is best-effort.
    sync::sync_workflow(&app.db, &app.config, &workflow).await;

    if action == ACTION_APPROVE {
        spawn_orchestration(app, &workflow);
    }

    notify::edit_root(&app.tg, &app.db, &workflow).await;
    notify::notify_submitter(&app.tg, &workflow).await;
    info!(
        "approval flow finished for {workflow_id}: {}",
        workflow.status.as_str()
    );
}

/// SSO then Jenkins, each as its own detached task: they spawn their own
/// pollers and a crash in one leg never reaches the other or the loop.
fn spawn_orchestration(app: &Arc<App>, workflow: &Workflow) {
    {
        let db = Arc::clone(&app.db);
        let tg = Arc::clone(&app.tg);
        let config = app.config.clone();
        let workflow = workflow.clone();
        tokio::spawn(async move {
            sso::submit_workflow(db, tg, config, workflow).await;
        });
    }
    {
        let db = Arc::clone(&app.db);
        let tg = Arc::clone(&app.tg);
        let config = app.config.clone();
        let workflow = workflow.clone();
        tokio::spawn(async move {
            jenkins::trigger_workflow_builds(db, tg, config, workflow).await;
        });
    }
}
