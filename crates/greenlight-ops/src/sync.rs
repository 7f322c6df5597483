//! Opportunistic sync of terminal workflow state to a generic webhook
//! endpoint. All failures are logged and swallowed; sync never blocks or
//! rolls back the approval flow.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{error, info};

use greenlight_core::config::ConfigService;
use greenlight_core::db::Db;
use greenlight_core::proxy;
use greenlight_core::types::Workflow;

pub async fn sync_workflow(db: &Db, config: &ConfigService, workflow: &Workflow) {
    if !config.is_api_enabled() {
        return;
    }
    match post_workflow(config, workflow).await {
        Ok(()) => {
            if let Err(e) = db.mark_synced(&workflow.workflow_id) {
                error!("failed to mark {} synced: {e:#}", workflow.workflow_id);
            } else {
                info!("workflow {} synced to external API", workflow.workflow_id);
            }
        }
        Err(e) => error!("external API sync failed for {}: {e:#}", workflow.workflow_id),
    }
}

async fn post_workflow(config: &ConfigService, workflow: &Workflow) -> Result<()> {
    let url = format!(
        "{}/{}",
        config.api_base_url().trim_end_matches('/'),
        config.api_endpoint().trim_start_matches('/')
    );

    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.api_timeout_secs()));
    if let Some(proxy_url) = proxy::from_global(config) {
        builder = builder
            .proxy(reqwest::Proxy::all(&proxy_url).context("invalid API sync proxy url")?);
    }
    let client = builder.build().context("failed to build API sync client")?;

    let payload = json!({
        "workflow_id": workflow.workflow_id,
        "user_id": workflow.user_id,
        "username": workflow.username,
        "submission_data": workflow.submission_data,
        "status": workflow.status.as_str(),
        "approver_id": workflow.approver_id,
        "approval_time": workflow.approval_time,
        "approval_comment": workflow.approval_comment,
    });

    let mut req = client.post(&url).json(&payload);
    let token = config.api_token();
    if !token.is_empty() {
        req = req.bearer_auth(token);
    }
    req.send()
        .await
        .context("sync request")?
        .error_for_status()
        .context("sync status")?;
    Ok(())
}
