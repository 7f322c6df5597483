//! Update routing: entry commands start a form session, text and button
//! events feed the session for that `(chat, user)`, and approve/reject
//! callbacks go to the approval dispatcher.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use greenlight_core::config::ConfigService;
use greenlight_core::db::Db;
use greenlight_core::options::{ProjectConfig, ProjectOptions};
use greenlight_core::telegram::{Telegram, TgCallback, TgMessage, TgUpdate};

use crate::approval;
use greenlight_server::form::{self, FormSession, Outcome, Reply};

pub struct App {
    pub db: Arc<Db>,
    pub tg: Arc<Telegram>,
    pub config: ConfigService,
    /// In-progress form sessions keyed by (chat_id, user_id).
    pub sessions: Mutex<HashMap<(i64, i64), FormSession>>,
}

pub async fn handle_update(app: &Arc<App>, update: TgUpdate) {
    match update {
        TgUpdate::Message(msg) => handle_message(app, msg).await,
        TgUpdate::Callback(cb) => handle_callback(app, cb).await,
    }
}

/// `/command@botname arg` → `command`
fn command_of(text: &str) -> Option<&str> {
    let first = text.split_whitespace().next()?;
    let cmd = first.strip_prefix('/')?;
    Some(cmd.split('@').next().unwrap_or(cmd))
}

fn take_session(app: &App, chat_id: i64, user_id: i64) -> Option<FormSession> {
    app.sessions
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&(chat_id, user_id))
}

fn put_session(app: &App, chat_id: i64, user_id: i64, session: FormSession) {
    app.sessions
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert((chat_id, user_id), session);
}

/// The project config for a session, re-read from the store so config
/// edits take effect mid-conversation.
fn project_config(app: &App, project: &str) -> Option<ProjectConfig> {
    ProjectOptions::load(&app.db)
        .ok()
        .and_then(|o| o.project(project).cloned())
}

async fn send_reply(app: &App, chat_id: i64, reply: &Reply) {
    if let Err(e) = app
        .tg
        .send_message(chat_id, &reply.text, None, reply.keyboard.as_ref())
        .await
    {
        error!("failed to send form reply to chat {chat_id}: {e:#}");
    }
}

async fn deliver(app: &App, chat_id: i64, message_id: Option<i64>, reply: &Reply) {
    match (reply.edit, message_id) {
        (true, Some(message_id)) => {
            if let Err(e) = app
                .tg
                .edit_message_text(chat_id, message_id, &reply.text, reply.keyboard.as_ref())
                .await
            {
                warn!("edit failed in chat {chat_id}, sending instead: {e:#}");
                send_reply(app, chat_id, reply).await;
            }
        }
        _ => send_reply(app, chat_id, reply).await,
    }
}

// ── Messages ──────────────────────────────────────────────────────────────

async fn handle_message(app: &Arc<App>, msg: TgMessage) {
    if let Some(command) = command_of(&msg.text) {
        handle_command(app, &msg, command).await;
        return;
    }

    // Plain text only matters inside an active form session.
    let Some(mut session) = take_session(app, msg.chat_id, msg.user_id) else {
        return;
    };
    let Some(cfg) = project_config(app, &session.data.project) else {
        error!("project {} disappeared from options", session.data.project);
        let _ = app
            .tg
            .send_message(msg.chat_id, "❌ 项目配置已变更，请重新发起申请", None, None)
            .await;
        return;
    };

    match form::handle_text(&mut session, &msg.text, &cfg) {
        Outcome::Continue(reply) => {
            deliver(app, msg.chat_id, None, &reply).await;
            put_session(app, msg.chat_id, msg.user_id, session);
        }
        Outcome::Ignored => {
            put_session(app, msg.chat_id, msg.user_id, session);
        }
        // Text events never submit or cancel directly.
        _ => {}
    }
}

async fn handle_command(app: &Arc<App>, msg: &TgMessage, command: &str) {
    match command {
        "start" => {
            let commands: Vec<String> = ProjectOptions::load(&app.db)
                .map(|o| {
                    o.projects
                        .iter()
                        .map(|(name, cfg)| format!("/{} — {name}", cfg.command_name()))
                        .collect()
                })
                .unwrap_or_default();
            let text = format!(
                "👋 欢迎使用工作流审批机器人！\n\n使用以下命令提交发版申请：\n{}",
                commands.join("\n")
            );
            let _ = app.tg.send_message(msg.chat_id, &text, None, None).await;
        }
        "cancel" => {
            take_session(app, msg.chat_id, msg.user_id);
            let _ = app
                .tg
                .send_message(msg.chat_id, "❌ 已取消提交", None, None)
                .await;
        }
        _ => {
            let Ok(options) = ProjectOptions::load(&app.db) else {
                return;
            };
            let Some((project, cfg)) = options.project_for_command(command) else {
                return;
            };
            info!(
                "form started for {project} by {} ({}) in chat {}",
                msg.username, msg.user_id, msg.chat_id
            );
            let (session, reply) = form::start(project, cfg);
            put_session(app, msg.chat_id, msg.user_id, session);
            send_reply(app, msg.chat_id, &reply).await;
        }
    }
}

// ── Callbacks ─────────────────────────────────────────────────────────────

async fn handle_callback(app: &Arc<App>, cb: TgCallback) {
    if cb.data.starts_with("approve:") || cb.data.starts_with("reject:") {
        approval::handle_click(app, cb).await;
        return;
    }

    let Some(mut session) = take_session(app, cb.chat_id, cb.user_id) else {
        let _ = app
            .tg
            .answer_callback(&cb.callback_id, "会话已过期，请重新发起申请", true)
            .await;
        return;
    };
    let Some(cfg) = project_config(app, &session.data.project) else {
        error!("project {} disappeared from options", session.data.project);
        let _ = app
            .tg
            .answer_callback(&cb.callback_id, "❌ 项目配置已变更，请重新发起申请", true)
            .await;
        return;
    };

    match form::handle_callback(&mut session, &cb.data, &cfg) {
        Outcome::Continue(reply) => {
            let _ = app.tg.answer_callback(&cb.callback_id, "", false).await;
            deliver(app, cb.chat_id, Some(cb.message_id), &reply).await;
            put_session(app, cb.chat_id, cb.user_id, session);
        }
        Outcome::Alert(text) => {
            let _ = app.tg.answer_callback(&cb.callback_id, &text, true).await;
            put_session(app, cb.chat_id, cb.user_id, session);
        }
        Outcome::Submit {
            submission_data,
            project,
            template_type,
        } => {
            let _ = app.tg.answer_callback(&cb.callback_id, "", false).await;
            let _ = app
                .tg
                .edit_message_text(cb.chat_id, cb.message_id, "⏳ 正在提交工作流...", None)
                .await;
            approval::submit_form(
                app,
                cb.chat_id,
                cb.message_id,
                cb.user_id,
                &cb.username,
                &submission_data,
                &project,
                template_type,
            )
            .await;
        }
        Outcome::Cancelled(reply) => {
            info!("form cancelled by {} in chat {}", cb.user_id, cb.chat_id);
            let _ = app.tg.answer_callback(&cb.callback_id, "", false).await;
            deliver(app, cb.chat_id, Some(cb.message_id), &reply).await;
        }
        Outcome::Ignored => {
            let _ = app.tg.answer_callback(&cb.callback_id, "", false).await;
            put_session(app, cb.chat_id, cb.user_id, session);
        }
    }
}
