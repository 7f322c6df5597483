use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde_json::Value;
use tracing::info;

use greenlight_core::config::ConfigService;
use greenlight_core::proxy;

/// A Jenkins job entry as returned by the SSO job query.
#[derive(Debug, Clone)]
pub struct JobEntry {
    pub job_id: String,
    pub job_name: String,
}

pub struct SsoClient {
    base: String,
    auth_token: String,
    authorization: String,
    client: Client,
}

impl SsoClient {
    pub fn from_config(config: &ConfigService) -> Result<SsoClient> {
        let mut builder = Client::builder().timeout(Duration::from_secs(30));
        if let Some(url) = proxy::from_global(config) {
            builder = builder.proxy(reqwest::Proxy::all(&url).context("invalid SSO proxy url")?);
        }
        Ok(SsoClient {
            base: config.sso_url().trim_end_matches('/').to_string(),
            auth_token: config.sso_auth_token(),
            authorization: config.sso_authorization(),
            client: builder.build().context("failed to build SSO client")?,
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base))
            .header("Content-Type", "application/json; charset=UTF-8")
            .header("Auth-token", &self.auth_token)
            .header("Authorization", &self.authorization)
    }

    /// `queryOaSameJob`: all Jenkins jobs visible for (env, project).
    pub async fn query_jobs(&self, env: &str, project: &str) -> Result<Vec<JobEntry>> {
        let resp: Value = self
            .get("/api/publish3/publish/jenkinsJob/queryOaSameJob")
            .query(&[("env", env), ("projects", project)])
            .send()
            .await
            .context("queryOaSameJob request")?
            .error_for_status()
            .context("queryOaSameJob status")?
            .json()
            .await
            .context("queryOaSameJob parse")?;
        let entries = resp["data"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let job_id = match &item["jobId"] {
                            Value::String(s) => s.clone(),
                            Value::Number(n) => n.to_string(),
                            _ => return None,
                        };
                        Some(JobEntry {
                            job_id,
                            job_name: item["jobName"].as_str().unwrap_or_default().to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(entries)
    }

    /// Submit the release ticket. The downstream requires `detail` to be a
    /// JSON *string* inside the otherwise-JSON body.
    pub async fn submit_order(&self, order: &Value) -> Result<Value> {
        let mut body = order.clone();
        if body.get("detail").map(Value::is_array).unwrap_or(false) {
            let detail = body["detail"].to_string();
            body["detail"] = Value::String(detail);
        }
        let resp: Value = self
            .client
            .post(format!(
                "{}/api/flow/task/startnew/dcAutoReleaseProcess",
                self.base
            ))
            .header("Content-Type", "application/json; charset=UTF-8")
            .header("Auth-token", &self.auth_token)
            .header("Authorization", &self.authorization)
            .timeout(Duration::from_secs(60))
            .json(&body)
            .send()
            .await
            .context("submit order request")?
            .error_for_status()
            .context("submit order status")?
            .json()
            .await
            .context("submit order parse")?;
        info!("SSO order submitted: {}", body["title"].as_str().unwrap_or("?"));
        Ok(resp)
    }

    pub async fn get_release_ids(&self, process_instance_id: &str) -> Result<Vec<i64>> {
        let resp: Value = self
            .get("/api/flow/publish/hisitory/getReleaseId")
            .query(&[("proId", process_instance_id)])
            .send()
            .await
            .context("getReleaseId request")?
            .error_for_status()
            .context("getReleaseId status")?
            .json()
            .await
            .context("getReleaseId parse")?;
        let ids = resp["object"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| {
                        v.as_i64()
                            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }

    /// One poll of a release's build detail. Transport errors bubble up so
    /// the monitor can decide to keep polling.
    pub async fn get_build_detail(&self, release_id: i64) -> Result<Option<Value>> {
        let resp: Value = self
            .get("/api/flow/publish/hisitory/buildDetail")
            .query(&[("id", release_id.to_string())])
            .send()
            .await
            .context("buildDetail request")?
            .error_for_status()
            .context("buildDetail status")?
            .json()
            .await
            .context("buildDetail parse")?;
        let data = &resp["data"];
        if data.is_null() {
            return Ok(None);
        }
        Ok(Some(data.clone()))
    }
}

/// For each requested service pick the first job whose name contains the
/// service name, preserving input order. Every service must resolve.
pub fn match_job_ids(jobs: &[JobEntry], services: &[String]) -> Result<Vec<String>> {
    let mut job_ids = Vec::with_capacity(services.len());
    for service in services {
        if let Some(entry) = jobs.iter().find(|j| j.job_name.contains(service.as_str())) {
            job_ids.push(entry.job_id.clone());
        }
    }
    if job_ids.len() != services.len() {
        bail!(
            "job id count mismatch: expected {}, resolved {}",
            services.len(),
            job_ids.len()
        );
    }
    Ok(job_ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jobs() -> Vec<JobEntry> {
        vec![
            JobEntry {
                job_id: "j1".into(),
                job_name: "UAT/pre-admin-export".into(),
            },
            JobEntry {
                job_id: "j2".into(),
                job_name: "UAT/pre-adminmanager".into(),
            },
            JobEntry {
                job_id: "j3".into(),
                job_name: "UAT/pre-admin-export-v2".into(),
            },
        ]
    }

    #[test]
    fn picks_first_containing_match_in_input_order() {
        let ids = match_job_ids(
            &jobs(),
            &["pre-adminmanager".to_string(), "pre-admin-export".to_string()],
        )
        .unwrap();
        // Order follows the requested services, not the job listing.
        assert_eq!(ids, vec!["j2", "j1"]);
    }

    #[test]
    fn unresolved_service_fails_the_whole_resolution() {
        let err = match_job_ids(&jobs(), &["missing-svc".to_string()]).unwrap_err();
        assert!(err.to_string().contains("mismatch"));
    }

    #[test]
    fn substring_match_is_enough() {
        let ids = match_job_ids(&jobs(), &["admin-export".to_string()]).unwrap();
        assert_eq!(ids, vec!["j1"]);
    }
}
