//! Project options: a single JSON document keyed by project name, stored in
//! the `project_options` table and re-read before decisions that depend on
//! mutable config (group lists, proxy choice).

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::db::Db;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectOptions {
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Slash entry command, with or without the leading '/'.
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub environments: Vec<String>,
    #[serde(default)]
    pub services: ServiceMap,
    #[serde(default)]
    pub group_ids: Vec<i64>,
    #[serde(default)]
    pub ops_usernames: Vec<String>,
    #[serde(default)]
    pub address_only: bool,
    #[serde(default)]
    pub default_branch: Option<BranchDefault>,
    #[serde(default)]
    pub jenkins: Option<JenkinsOptions>,
    #[serde(default)]
    pub proxy: Option<ProxyOptions>,
}

/// `services` is either env-key → ordered service list, or a flat list in
/// the legacy shape. Key order follows the options document: the
/// address-only flow maps environments onto entries by position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceMap {
    ByEnv(IndexMap<String, Vec<String>>),
    Flat(Vec<String>),
}

impl Default for ServiceMap {
    fn default() -> Self {
        ServiceMap::Flat(Vec::new())
    }
}

impl ServiceMap {
    /// Resolve the stored env key matching `environment` case-insensitively.
    pub fn env_key(&self, environment: &str) -> Option<&str> {
        match self {
            ServiceMap::ByEnv(map) => map
                .keys()
                .find(|k| k.eq_ignore_ascii_case(environment))
                .map(String::as_str),
            ServiceMap::Flat(_) => None,
        }
    }

    /// Ordered service list for an environment. The flat legacy shape has no
    /// env partition and applies to every environment.
    pub fn for_env(&self, environment: &str) -> Vec<String> {
        match self {
            ServiceMap::ByEnv(map) => self
                .env_key(environment)
                .and_then(|k| map.get(k))
                .cloned()
                .unwrap_or_default(),
            ServiceMap::Flat(list) => list.clone(),
        }
    }

    /// First service of the env at `index`, for the address-only auto-select
    /// convention (two-env projects map env → index 0/1).
    pub fn first_service_at(&self, index: usize) -> Option<String> {
        match self {
            ServiceMap::ByEnv(map) => map
                .values()
                .nth(index)
                .and_then(|list| list.first())
                .cloned(),
            ServiceMap::Flat(list) => list.first().cloned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BranchDefault {
    Single(String),
    PerEnv(BTreeMap<String, String>),
}

impl BranchDefault {
    pub fn for_env(&self, environment: &str) -> Option<&str> {
        match self {
            BranchDefault::Single(branch) => Some(branch.as_str()),
            BranchDefault::PerEnv(map) => map
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(environment))
                .map(|(_, v)| v.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JenkinsOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub max_concurrent: Option<u32>,
}

impl JenkinsOptions {
    /// Capacity for the per-project trigger semaphore, clamped to ≥ 1 so a
    /// misconfigured zero can never deadlock the fan-out.
    pub fn concurrency(&self) -> usize {
        self.max_concurrent.unwrap_or(1).max(1) as usize
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, rename = "type")]
    pub proxy_type: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl ProjectConfig {
    /// Entry command without the leading slash.
    pub fn command_name(&self) -> &str {
        self.command.trim_start_matches('/')
    }

    pub fn default_branch_for(&self, environment: &str) -> Option<&str> {
        self.default_branch
            .as_ref()
            .and_then(|b| b.for_env(environment))
    }
}

impl ProjectOptions {
    pub fn parse(json: &str) -> Result<ProjectOptions> {
        serde_json::from_str(json).context("failed to parse project options JSON")
    }

    /// Load the current snapshot from the store; an absent document yields
    /// an empty set of projects.
    pub fn load(db: &Db) -> Result<ProjectOptions> {
        match db.get_project_options_raw()? {
            Some(raw) => ProjectOptions::parse(&raw),
            None => Ok(ProjectOptions::default()),
        }
    }

    pub fn project(&self, name: &str) -> Option<&ProjectConfig> {
        self.projects.get(name)
    }

    /// Find the project owning a slash command (match ignores the slash).
    pub fn project_for_command(&self, command: &str) -> Option<(&str, &ProjectConfig)> {
        let command = command.trim_start_matches('/');
        self.projects
            .iter()
            .find(|(_, cfg)| cfg.command_name() == command)
            .map(|(name, cfg)| (name.as_str(), cfg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProjectOptions {
        ProjectOptions::parse(
            r#"{
              "projects": {
                "EBPAY": {
                  "command": "/deploy_ebpay",
                  "environments": ["UAT", "GRAY-UAT"],
                  "services": {
                    "UAT": ["svc-a", "svc-b"],
                    "GRAY-UAT": ["svc-gray"]
                  },
                  "group_ids": [-1001, -1002],
                  "ops_usernames": ["ops_one"],
                  "default_branch": {"UAT": "uat-ebpay"},
                  "jenkins": {
                    "enabled": true,
                    "url": "https://jenkins.example.com",
                    "username": "bot",
                    "api_token": "t0ken",
                    "max_concurrent": 0
                  }
                },
                "LINKS": {
                  "command": "addr_links",
                  "environments": ["TRC", "BSC"],
                  "services": ["link-node"],
                  "group_ids": [-2000],
                  "address_only": true
                }
              }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn parses_env_keyed_and_flat_services() {
        let opts = sample();
        let ebpay = opts.project("EBPAY").unwrap();
        assert_eq!(ebpay.services.for_env("UAT"), vec!["svc-a", "svc-b"]);
        let links = opts.project("LINKS").unwrap();
        assert_eq!(links.services.for_env("TRC"), vec!["link-node"]);
        assert!(links.address_only);
    }

    #[test]
    fn env_key_lookup_is_case_insensitive() {
        let opts = sample();
        let ebpay = opts.project("EBPAY").unwrap();
        assert_eq!(ebpay.services.env_key("gray-uat"), Some("GRAY-UAT"));
        assert_eq!(ebpay.services.for_env("uat"), vec!["svc-a", "svc-b"]);
        assert!(ebpay.services.env_key("PROD").is_none());
    }

    #[test]
    fn command_lookup_ignores_slash() {
        let opts = sample();
        assert_eq!(opts.project_for_command("/deploy_ebpay").unwrap().0, "EBPAY");
        assert_eq!(opts.project_for_command("addr_links").unwrap().0, "LINKS");
        assert!(opts.project_for_command("missing").is_none());
    }

    #[test]
    fn default_branch_per_env() {
        let opts = sample();
        let ebpay = opts.project("EBPAY").unwrap();
        assert_eq!(ebpay.default_branch_for("uat"), Some("uat-ebpay"));
        assert_eq!(ebpay.default_branch_for("GRAY-UAT"), None);
    }

    #[test]
    fn zero_concurrency_clamps_to_one() {
        let opts = sample();
        let jenkins = opts.project("EBPAY").unwrap().jenkins.as_ref().unwrap();
        assert_eq!(jenkins.concurrency(), 1);
    }
}
