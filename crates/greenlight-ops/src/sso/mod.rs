//! SSO orchestration: resolve job ids, compose and submit the release
//! ticket, then monitor every release id it opens. Failures here never roll
//! the approval back; the workflow stays APPROVED.

pub mod client;
pub mod monitor;
pub mod order;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};

use greenlight_core::config::ConfigService;
use greenlight_core::db::Db;
use greenlight_core::telegram::Telegram;
use greenlight_core::types::{SubmitStatus, Workflow};

use crate::notify;
use crate::submission::parse_submission;
use client::SsoClient;

/// Entry point called by the approval dispatcher after a successful
/// approve transition. This function is the outermost catch for the whole
/// SSO leg.
pub async fn submit_workflow(
    db: Arc<Db>,
    tg: Arc<Telegram>,
    config: ConfigService,
    workflow: Workflow,
) {
    let workflow_id = workflow.workflow_id.clone();
    if !config.sso_enabled() {
        info!("SSO disabled, skipping submission for {workflow_id}");
        return;
    }
    if config.sso_url().is_empty()
        || config.sso_auth_token().is_empty()
        || config.sso_authorization().is_empty()
    {
        error!("SSO configuration incomplete, cannot submit {workflow_id}");
        notify::notify_sso_failed(&tg, &db, &workflow, "SSO 配置不完整，请检查 SSO_URL / SSO_AUTH_TOKEN / SSO_AUTHORIZATION").await;
        return;
    }

    match run(&db, &tg, &config, &workflow).await {
        Ok(true) => info!("SSO submission finished for {workflow_id}"),
        Ok(false) => info!("SSO submission skipped for {workflow_id} (nothing to submit)"),
        Err(e) => {
            error!("SSO submission failed for {workflow_id}: {e:#}");
            if let Err(db_err) = db.update_sso_submission_status(
                &workflow_id,
                SubmitStatus::Failed,
                None,
                None,
                Some(&format!("{e:#}")),
            ) {
                error!("failed to record SSO failure for {workflow_id}: {db_err:#}");
            }
            notify::notify_sso_failed(&tg, &db, &workflow, &format!("{e:#}")).await;
        }
    }
}

async fn run(
    db: &Arc<Db>,
    tg: &Arc<Telegram>,
    config: &ConfigService,
    workflow: &Workflow,
) -> Result<bool> {
    let parsed = parse_submission(&workflow.submission_data);
    let Some(project) = parsed.project.clone() else {
        bail!("submission data has no project");
    };
    let Some(environment) = parsed.environment.clone() else {
        bail!("submission data has no environment");
    };
    if parsed.services.is_empty() {
        // Address-only workflows carry no deployable services.
        return Ok(false);
    }
    if parsed.services.len() != parsed.hashes.len() {
        bail!(
            "service count ({}) does not match hash count ({})",
            parsed.services.len(),
            parsed.hashes.len()
        );
    }

    let client = Arc::new(SsoClient::from_config(config).context("build SSO client")?);

    // Step 1: resolve job ids; input order is preserved and every service
    // must resolve or the whole orchestration fails.
    let jobs = client
        .query_jobs(&environment, &project)
        .await
        .context("query job ids")?;
    let job_ids = client::match_job_ids(&jobs, &parsed.services)?;
    info!(
        "resolved {} job ids for {}: {:?}",
        job_ids.len(),
        workflow.workflow_id,
        job_ids
    );

    // Step 2: compose the ticket payload.
    let approver = workflow.approver_username.clone().unwrap_or_default();
    let order = order::compose_order(
        &project,
        &environment,
        &parsed.services,
        &parsed.hashes,
        &job_ids,
        &approver,
    )?;

    // Step 3: create the local submission row first, in pending.
    db.create_sso_submission(&workflow.workflow_id, &order)
        .context("create sso submission")?;

    // Step 4: submit the ticket.
    let response = client.submit_order(&order).await.context("submit order")?;
    let process_instance_id = response["object"]["processInstanceId"]
        .as_str()
        .map(str::to_string)
        .or_else(|| response["object"]["processInstanceId"].as_i64().map(|v| v.to_string()));
    let Some(process_instance_id) = process_instance_id else {
        bail!("submit response carries no processInstanceId: {response}");
    };
    db.update_sso_submission_status(
        &workflow.workflow_id,
        SubmitStatus::Success,
        Some(&process_instance_id),
        Some(&response),
        None,
    )
    .context("record sso success")?;
    info!(
        "SSO ticket opened for {}: processInstanceId={process_instance_id}",
        workflow.workflow_id
    );

    // Step 5: fetch release ids and spawn one independent poller each.
    let release_ids = client
        .get_release_ids(&process_instance_id)
        .await
        .context("get release ids")?;
    if release_ids.is_empty() {
        warn!(
            "no release ids for {} (processInstanceId={process_instance_id}), monitoring skipped",
            workflow.workflow_id
        );
    }
    for release_id in &release_ids {
        let db = Arc::clone(db);
        let tg = Arc::clone(tg);
        let client = Arc::clone(&client);
        let workflow = workflow.clone();
        let release_id = *release_id;
        tokio::spawn(async move {
            monitor::monitor_release(db, tg, client, workflow, release_id).await;
        });
    }

    notify::notify_sso_submitted(tg, db, workflow, &process_instance_id, &parsed.services).await;
    Ok(true)
}
