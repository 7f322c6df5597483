//! Application config service backed by the `app_config` table. Reads are
//! read-through (no long-lived cache): callers re-read before decisions
//! that depend on mutable config.

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::db::Db;
use crate::options::ProjectOptions;

#[derive(Clone)]
pub struct ConfigService {
    db: Arc<Db>,
}

impl ConfigService {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    pub fn get(&self, key: &str, default: &str) -> String {
        self.db.get_app_config(key, default)
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.db
            .get_app_config_opt(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.db
            .get_app_config_opt(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.db.get_app_config_opt(key).as_deref() {
            Some(v) => v.eq_ignore_ascii_case("true") || v == "1",
            None => default,
        }
    }

    // ── Bot / approver ────────────────────────────────────────────────────

    pub fn bot_token(&self) -> String {
        self.get("BOT_TOKEN", "")
    }

    pub fn approver_username(&self) -> String {
        self.get("APPROVER_USERNAME", "")
    }

    pub fn approver_user_id(&self) -> i64 {
        self.get_i64("APPROVER_USER_ID", 0)
    }

    pub fn is_approver_restricted(&self) -> bool {
        self.approver_user_id() != 0 || !self.approver_username().is_empty()
    }

    /// Approve-click permission gate: configured username wins (case
    /// insensitive, leading '@' stripped), else configured user id.
    /// Reject is intentionally not gated.
    pub fn is_authorised_approver(&self, user_id: i64, username: &str) -> bool {
        if !self.is_approver_restricted() {
            return true;
        }
        let configured = self.approver_username();
        let configured = configured.trim_start_matches('@');
        if !configured.is_empty() && username.eq_ignore_ascii_case(configured) {
            return true;
        }
        let configured_id = self.approver_user_id();
        configured_id != 0 && user_id == configured_id
    }

    // ── External API sync ─────────────────────────────────────────────────

    pub fn api_base_url(&self) -> String {
        self.get("API_BASE_URL", "")
    }

    pub fn api_endpoint(&self) -> String {
        self.get("API_ENDPOINT", "/workflows/sync")
    }

    pub fn api_token(&self) -> String {
        self.get("API_TOKEN", "")
    }

    pub fn api_timeout_secs(&self) -> u64 {
        self.get_u64("API_TIMEOUT", 30)
    }

    pub fn is_api_enabled(&self) -> bool {
        !self.api_base_url().is_empty()
    }

    // ── SSO ───────────────────────────────────────────────────────────────

    pub fn sso_enabled(&self) -> bool {
        self.get_bool("SSO_ENABLED", false)
    }

    pub fn sso_url(&self) -> String {
        self.get("SSO_URL", "")
    }

    pub fn sso_auth_token(&self) -> String {
        self.get("SSO_AUTH_TOKEN", "")
    }

    pub fn sso_authorization(&self) -> String {
        self.get("SSO_AUTHORIZATION", "")
    }

    // ── Transport tuning ──────────────────────────────────────────────────

    pub fn connection_pool_size(&self) -> usize {
        self.get_u64("CONNECTION_POOL_SIZE", 50) as usize
    }

    pub fn http_read_timeout_secs(&self) -> u64 {
        self.get_u64("HTTP_READ_TIMEOUT", 30)
    }

    pub fn http_write_timeout_secs(&self) -> u64 {
        self.get_u64("HTTP_WRITE_TIMEOUT", 10)
    }

    pub fn http_connect_timeout_secs(&self) -> u64 {
        self.get_u64("HTTP_CONNECT_TIMEOUT", 10)
    }

    // ── Logging ───────────────────────────────────────────────────────────

    pub fn log_level(&self) -> String {
        self.get("LOG_LEVEL", "info")
    }

    pub fn log_file(&self) -> String {
        self.get("LOG_FILE", "logs/bot.log")
    }

    // ── Boot validation ───────────────────────────────────────────────────

    /// Fatal checks run once at startup: a bot token must exist and every
    /// configured project must name at least one chat group.
    pub fn validate(&self) -> Result<()> {
        if self.bot_token().is_empty() {
            bail!("BOT_TOKEN is not configured; run the init_db tool to seed app config");
        }
        let options = ProjectOptions::load(&self.db)?;
        if options.projects.is_empty() {
            bail!("no projects configured; import config/options.json via init_db");
        }
        let missing: Vec<&str> = options
            .projects
            .iter()
            .filter(|(_, cfg)| cfg.group_ids.is_empty())
            .map(|(name, _)| name.as_str())
            .collect();
        if !missing.is_empty() {
            bail!(
                "projects without group_ids: {}; fix config/options.json and re-run init_db",
                missing.join(", ")
            );
        }
        Ok(())
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }
}
