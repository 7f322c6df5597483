//! Per-build poller: reads the build info every 10 s for up to 10 minutes,
//! tolerating transient errors, and writes the terminal row when Jenkins
//! reports a result.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use greenlight_core::db::Db;
use greenlight_core::types::BuildStatus;

use super::client::JenkinsClient;

pub const MAX_POLL_COUNT: u32 = 60;
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Poll until the build reaches a terminal result or the attempts run out.
/// Returns the final status recorded on the row.
pub async fn monitor_build(
    db: &Arc<Db>,
    client: &JenkinsClient,
    build_id: &str,
    job_name: &str,
    build_number: i64,
) -> BuildStatus {
    info!("monitoring Jenkins build {job_name} #{build_number}");

    for attempt in 0..MAX_POLL_COUNT {
        let info = match client.build_info(job_name, build_number).await {
            Ok(info) => info,
            Err(e) => {
                // Transient failures keep the poll alive; triggers are never retried.
                if attempt % 5 == 0 {
                    warn!(
                        "build status poll failed for {job_name} #{build_number} \
                         (attempt {}): {e:#}",
                        attempt + 1
                    );
                }
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
        };

        let Some(info) = info else {
            // Still queued or not yet visible.
            if attempt % 10 == 0 {
                info!(
                    "build {job_name} #{build_number} not started yet, waited {}s",
                    u64::from(attempt + 1) * POLL_INTERVAL.as_secs()
                );
            }
            if let Err(e) = db.update_jenkins_build_status(build_id, BuildStatus::Queued, None) {
                error!("failed to record queued status for {build_id}: {e:#}");
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        };

        let job_url = info["url"].as_str();
        if info["building"].as_bool().unwrap_or(false) {
            if attempt % 10 == 0 {
                info!(
                    "build {job_name} #{build_number} in progress, waited {}s",
                    u64::from(attempt + 1) * POLL_INTERVAL.as_secs()
                );
            }
            if let Err(e) = db.update_jenkins_build_status(build_id, BuildStatus::Building, job_url)
            {
                error!("failed to record building status for {build_id}: {e:#}");
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }

        match info["result"].as_str() {
            Some(result @ ("SUCCESS" | "FAILURE" | "ABORTED" | "UNSTABLE")) => {
                let status = BuildStatus::parse(result);
                let duration = info["duration"].as_i64().filter(|d| *d > 0);
                if let Err(e) = db.finish_jenkins_build(build_id, status, duration, job_url) {
                    error!("failed to record terminal status for {build_id}: {e:#}");
                }
                info!("build {job_name} #{build_number} finished: {result}");
                return status;
            }
            _ => {
                // No result yet; keep it marked as building and poll on.
                if let Err(e) =
                    db.update_jenkins_build_status(build_id, BuildStatus::Building, job_url)
                {
                    error!("failed to record building status for {build_id}: {e:#}");
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }

    warn!("build monitor timed out for {job_name} #{build_number}");
    if let Err(e) = db.finish_jenkins_build(build_id, BuildStatus::Timeout, None, None) {
        error!("failed to record timeout for {build_id}: {e:#}");
    }
    BuildStatus::Timeout
}
