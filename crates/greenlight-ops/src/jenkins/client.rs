use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{info, warn};

use greenlight_core::options::JenkinsOptions;

pub const WAIT_FOR_START_TIMEOUT: Duration = Duration::from_secs(60);
pub const WAIT_FOR_START_INTERVAL: Duration = Duration::from_secs(2);

pub struct JenkinsClient {
    base: String,
    username: String,
    token: String,
    client: Client,
}

/// Percent-encode one path segment of a job name.
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// `<env-key>/<service>` addresses a job inside a folder: `job/a/job/b`.
pub fn job_path(job_name: &str) -> String {
    job_name
        .split('/')
        .map(|seg| format!("job/{}", encode_segment(seg)))
        .collect::<Vec<_>>()
        .join("/")
}

impl JenkinsClient {
    pub fn new(options: &JenkinsOptions, proxy: Option<&str>) -> Result<JenkinsClient> {
        let mut builder = Client::builder().timeout(Duration::from_secs(30));
        if let Some(url) = proxy {
            builder =
                builder.proxy(reqwest::Proxy::all(url).context("invalid Jenkins proxy url")?);
        }
        Ok(JenkinsClient {
            base: options.url.trim_end_matches('/').to_string(),
            username: options.username.clone(),
            token: options.api_token.clone(),
            client: builder.build().context("failed to build Jenkins client")?,
        })
    }

    /// Basic auth; an empty username means the token stands in for both.
    fn auth_user(&self) -> &str {
        if self.username.is_empty() {
            &self.token
        } else {
            &self.username
        }
    }

    pub async fn job_info(&self, job_name: &str) -> Result<Value> {
        let url = format!("{}/{}/api/json", self.base, job_path(job_name));
        self.client
            .get(&url)
            .basic_auth(self.auth_user(), Some(&self.token))
            .send()
            .await
            .context("job info request")?
            .error_for_status()
            .context("job info status")?
            .json()
            .await
            .context("job info parse")
    }

    /// Trigger with parameters; returns the queue item id when Jenkins
    /// reports one via the Location header.
    pub async fn trigger(&self, job_name: &str, parameters: &Value) -> Result<Option<i64>> {
        let url = format!("{}/{}/buildWithParameters", self.base, job_path(job_name));
        let mut req = self
            .client
            .post(&url)
            .basic_auth(self.auth_user(), Some(&self.token));
        if let Some(params) = parameters.as_object() {
            let query: Vec<(String, String)> = params
                .iter()
                .map(|(k, v)| {
                    (
                        k.clone(),
                        v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()),
                    )
                })
                .collect();
            req = req.query(&query);
        }
        let resp = req.send().await.context("trigger request")?;
        let resp = resp.error_for_status().context("trigger status")?;
        let queue_id = resp
            .headers()
            .get("Location")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_queue_id);
        info!("Jenkins build triggered: {job_name}, queue_id={queue_id:?}");
        Ok(queue_id)
    }

    pub async fn queue_item(&self, queue_id: i64) -> Result<Value> {
        let url = format!("{}/queue/item/{queue_id}/api/json", self.base);
        self.client
            .get(&url)
            .basic_auth(self.auth_user(), Some(&self.token))
            .send()
            .await
            .context("queue item request")?
            .error_for_status()
            .context("queue item status")?
            .json()
            .await
            .context("queue item parse")
    }

    /// Build info; a 404 means the build has not started yet.
    pub async fn build_info(&self, job_name: &str, build_number: i64) -> Result<Option<Value>> {
        let url = format!(
            "{}/{}/{build_number}/api/json",
            self.base,
            job_path(job_name)
        );
        let resp = self
            .client
            .get(&url)
            .basic_auth(self.auth_user(), Some(&self.token))
            .send()
            .await
            .context("build info request")?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp.error_for_status().context("build info status")?;
        Ok(Some(resp.json().await.context("build info parse")?))
    }

    /// Wait for the triggered build to start. Prefers the queue item when a
    /// queue id exists, else polls the predicted build number. Returns the
    /// actual build number, or None after the 60 s cap.
    pub async fn wait_for_start(
        &self,
        job_name: &str,
        queue_id: Option<i64>,
        next_build_number: i64,
    ) -> Option<i64> {
        let deadline = tokio::time::Instant::now() + WAIT_FOR_START_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if let Some(queue_id) = queue_id {
                match self.queue_item(queue_id).await {
                    Ok(item) => {
                        if let Some(number) = item["executable"]["number"].as_i64() {
                            info!("build started: {job_name} #{number}");
                            return Some(number);
                        }
                        if item["cancelled"].as_bool() == Some(true) {
                            warn!("queue item {queue_id} cancelled for {job_name}");
                            return None;
                        }
                    }
                    Err(e) => warn!("queue poll failed for {job_name}: {e:#}"),
                }
            } else {
                match self.build_info(job_name, next_build_number).await {
                    Ok(Some(_)) => {
                        info!("build started: {job_name} #{next_build_number}");
                        return Some(next_build_number);
                    }
                    Ok(None) => {}
                    Err(e) => warn!("build probe failed for {job_name}: {e:#}"),
                }
            }
            tokio::time::sleep(WAIT_FOR_START_INTERVAL).await;
        }
        warn!("timed out waiting for {job_name} to start (queue_id={queue_id:?})");
        None
    }
}

fn parse_queue_id(location: &str) -> Option<i64> {
    // Location: https://jenkins/queue/item/12345/
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_path_encodes_segments_into_folders() {
        assert_eq!(job_path("UAT/svc-a"), "job/UAT/job/svc-a");
        assert_eq!(job_path("GRAY UAT/svc b"), "job/GRAY%20UAT/job/svc%20b");
        assert_eq!(job_path("single"), "job/single");
    }

    #[test]
    fn queue_id_parses_from_location() {
        assert_eq!(
            parse_queue_id("https://jenkins.example.com/queue/item/12345/"),
            Some(12345)
        );
        assert_eq!(parse_queue_id("https://jenkins.example.com/queue/item/77"), Some(77));
        assert_eq!(parse_queue_id("https://jenkins.example.com/"), None);
    }
}
