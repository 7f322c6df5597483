//! Jenkins orchestration: per-service trigger under the per-project
//! concurrency cap, start discovery, and build monitoring. Failure of one
//! service's leg never blocks its siblings.

pub mod client;
pub mod limiter;
pub mod monitor;

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, warn};

use greenlight_core::config::ConfigService;
use greenlight_core::db::Db;
use greenlight_core::options::ProjectOptions;
use greenlight_core::proxy;
use greenlight_core::telegram::Telegram;
use greenlight_core::types::{BuildStatus, Workflow};

use crate::notify;
use crate::submission::parse_submission;
use client::JenkinsClient;

/// Entry point called by the approval dispatcher after a successful
/// approve transition. Spawns one detached task per service and returns.
pub async fn trigger_workflow_builds(
    db: Arc<Db>,
    tg: Arc<Telegram>,
    config: ConfigService,
    workflow: Workflow,
) {
    let workflow_id = workflow.workflow_id.clone();

    let parsed = parse_submission(&workflow.submission_data);
    let Some(project) = parsed.project.clone() else {
        error!("no project in submission data for {workflow_id}, Jenkins skipped");
        return;
    };
    let Some(environment) = parsed.environment.clone() else {
        error!("no environment in submission data for {workflow_id}, Jenkins skipped");
        return;
    };
    if parsed.services.is_empty() {
        info!("no services to build for {workflow_id}, Jenkins skipped");
        return;
    }
    if parsed.services.len() != parsed.hashes.len() {
        error!(
            "service count ({}) does not match hash count ({}) for {workflow_id}, \
             Jenkins fan-out aborted",
            parsed.services.len(),
            parsed.hashes.len()
        );
        return;
    }

    // Re-read options: group lists and Jenkins endpoints are mutable config.
    let options = match ProjectOptions::load(&db) {
        Ok(o) => o,
        Err(e) => {
            error!("failed to load project options for {workflow_id}: {e:#}");
            return;
        }
    };
    let Some(project_cfg) = options.project(&project) else {
        error!("project {project} not configured, Jenkins skipped for {workflow_id}");
        return;
    };
    let Some(jenkins_cfg) = project_cfg.jenkins.clone().filter(|j| j.enabled) else {
        info!("Jenkins disabled for {project}, skipped for {workflow_id}");
        return;
    };
    if jenkins_cfg.url.is_empty() || jenkins_cfg.api_token.is_empty() {
        error!("Jenkins config incomplete for {project}, skipped for {workflow_id}");
        return;
    }

    // The selected environment maps onto a services key case-insensitively;
    // that key, not the raw selection, prefixes the job name.
    let Some(env_key) = project_cfg.services.env_key(&environment).map(str::to_string) else {
        error!(
            "environment {environment} has no services mapping for {project}, \
             Jenkins skipped for {workflow_id}"
        );
        return;
    };

    let proxy_url = proxy::resolve(&config, project_cfg.proxy.as_ref());
    let client = match JenkinsClient::new(&jenkins_cfg, proxy_url.as_deref()) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("failed to build Jenkins client for {project}: {e:#}");
            return;
        }
    };

    let branch = parsed
        .branch
        .clone()
        .or_else(|| project_cfg.default_branch_for(&environment).map(str::to_string))
        .unwrap_or_default();
    let limiter = limiter::project_limiter(&project, jenkins_cfg.concurrency());

    info!(
        "Jenkins fan-out for {workflow_id}: {} services on {env_key} (cap {})",
        parsed.services.len(),
        jenkins_cfg.concurrency()
    );

    for (service, hash) in parsed.services.iter().zip(&parsed.hashes) {
        let db = Arc::clone(&db);
        let tg = Arc::clone(&tg);
        let client = Arc::clone(&client);
        let limiter = Arc::clone(&limiter);
        let workflow = workflow.clone();
        let job_name = format!("{env_key}/{service}");
        let branch = branch.clone();
        let hash = hash.clone();
        tokio::spawn(async move {
            let permit = match limiter.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };
            run_single_build(&db, &tg, &client, &workflow, &job_name, &branch, &hash).await;
            drop(permit);
        });
    }
}

/// One service's whole leg: trigger, wait for start, monitor, notify. The
/// caller's spawn is the outermost catch; everything in here logs and
/// records instead of propagating.
async fn run_single_build(
    db: &Arc<Db>,
    tg: &Arc<Telegram>,
    client: &JenkinsClient,
    workflow: &Workflow,
    job_name: &str,
    branch: &str,
    hash: &str,
) {
    let workflow_id = &workflow.workflow_id;
    let parameters = json!({
        "action_type": "gray",
        "gitBranch": branch,
        "check_commitID": hash,
    });

    // Predicted build number, used as a fallback identifier when Jenkins
    // returns no queue id.
    let next_build_number = match client.job_info(job_name).await {
        Ok(info) => info["nextBuildNumber"].as_i64().unwrap_or(0),
        Err(e) => {
            error!("failed to read job metadata for {job_name}: {e:#}");
            record_failed_trigger(db, tg, workflow, job_name, &parameters, BuildStatus::Error).await;
            return;
        }
    };

    let queue_id = match client.trigger(job_name, &parameters).await {
        Ok(q) => q,
        Err(e) => {
            error!("failed to trigger {job_name} for {workflow_id}: {e:#}");
            record_failed_trigger(db, tg, workflow, job_name, &parameters, BuildStatus::Error).await;
            return;
        }
    };

    let Some(build_number) = client
        .wait_for_start(job_name, queue_id, next_build_number)
        .await
    else {
        warn!("{job_name} never started for {workflow_id}");
        record_failed_trigger(db, tg, workflow, job_name, &parameters, BuildStatus::Timeout).await;
        return;
    };

    let build = match db.create_jenkins_build(
        workflow_id,
        job_name,
        Some(build_number),
        None,
        BuildStatus::Building,
        Some(&parameters),
    ) {
        Ok(b) => b,
        Err(e) => {
            error!("failed to create build record for {job_name} #{build_number}: {e:#}");
            return;
        }
    };

    monitor::monitor_build(db, client, &build.build_id, job_name, build_number).await;

    if let Ok(Some(row)) = db.get_jenkins_build(&build.build_id) {
        if row.build_status.is_terminal() && !row.notified {
            notify::notify_jenkins_build(tg, db, workflow, &row).await;
            if let Err(e) = db.mark_jenkins_build_notified(&build.build_id) {
                error!("failed to mark build {} notified: {e:#}", build.build_id);
            }
        }
    }
}

/// A trigger that failed or never started still leaves a terminal row and
/// one notification; it is never retried.
async fn record_failed_trigger(
    db: &Arc<Db>,
    tg: &Arc<Telegram>,
    workflow: &Workflow,
    job_name: &str,
    parameters: &serde_json::Value,
    status: BuildStatus,
) {
    match db.create_jenkins_build(
        &workflow.workflow_id,
        job_name,
        None,
        None,
        status,
        Some(parameters),
    ) {
        Ok(build) => {
            if let Err(e) = db.finish_jenkins_build(&build.build_id, status, None, None) {
                error!("failed to finalise failed trigger row {}: {e:#}", build.build_id);
            }
            if let Ok(Some(row)) = db.get_jenkins_build(&build.build_id) {
                notify::notify_jenkins_build(tg, db, workflow, &row).await;
            }
            if let Err(e) = db.mark_jenkins_build_notified(&build.build_id) {
                error!("failed to mark build {} notified: {e:#}", build.build_id);
            }
        }
        Err(e) => error!(
            "failed to record failed trigger for {job_name} ({}): {e:#}",
            workflow.workflow_id
        ),
    }
}
