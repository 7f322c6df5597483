//! Per-release poller. Each release id gets its own task; a crashed poller
//! never affects its siblings.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use greenlight_core::db::Db;
use greenlight_core::telegram::Telegram;
use greenlight_core::types::{BuildStatus, Workflow};

use crate::notify;
use super::client::SsoClient;

pub const MAX_POLL_COUNT: u32 = 20;
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

pub async fn monitor_release(
    db: Arc<Db>,
    tg: Arc<Telegram>,
    client: Arc<SsoClient>,
    workflow: Workflow,
    release_id: i64,
) {
    let workflow_id = workflow.workflow_id.clone();
    let build = match db.create_sso_build(&workflow_id, &workflow_id, release_id) {
        Ok(b) => b,
        Err(e) => {
            error!("failed to create release record for {workflow_id}/{release_id}: {e:#}");
            return;
        }
    };
    let build_id = build.build_id.clone();
    info!("monitoring release {release_id} for {workflow_id}");

    let mut final_status = BuildStatus::Timeout;
    let mut last_detail: Option<serde_json::Value> = None;

    for attempt in 0..MAX_POLL_COUNT {
        let detail = match client.get_build_detail(release_id).await {
            Ok(Some(d)) => d,
            Ok(None) => {
                warn!(
                    "no build detail yet for release {release_id} (attempt {}/{MAX_POLL_COUNT})",
                    attempt + 1
                );
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
            Err(e) => {
                warn!("build detail poll failed for release {release_id}: {e:#}");
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
        };

        let status = BuildStatus::parse(detail["publishStatus"].as_str().unwrap_or(""));
        if let Err(e) = db.update_sso_build_status(&build_id, status, Some(&detail)) {
            error!("failed to persist release status for {build_id}: {e:#}");
            final_status = BuildStatus::Error;
            last_detail = Some(detail);
            break;
        }
        last_detail = Some(detail);

        if matches!(
            status,
            BuildStatus::Success | BuildStatus::Failure | BuildStatus::Aborted
        ) {
            final_status = status;
            info!("release {release_id} finished: {}", status.as_str());
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    if final_status == BuildStatus::Timeout {
        warn!("release monitor timed out for {workflow_id}/{release_id}");
    }
    if let Err(e) = db.update_sso_build_status(&build_id, final_status, last_detail.as_ref()) {
        error!("failed to record final release status for {build_id}: {e:#}");
    }

    // One notification per poller, then the monotonic notified flag.
    if let Ok(Some(row)) = db.get_sso_build(&build_id) {
        if row.build_status.is_terminal() && !row.notified {
            notify::notify_sso_build(&tg, &db, &workflow, &row).await;
            if let Err(e) = db.mark_sso_build_notified(&build_id) {
                error!("failed to mark release {build_id} notified: {e:#}");
            }
        }
    }
}
