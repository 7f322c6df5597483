use anyhow::{Context, Result};
use chrono::{Local, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::{
    BuildStatus, JenkinsBuild, SsoBuild, SsoSubmission, SubmitStatus, TemplateType, Workflow,
    WorkflowStatus,
};

const SCHEMA_SQL: &str = include_str!("../../../schema.sql");

/// Sliding retention window for workflows and their children.
pub const RETENTION_DAYS: i64 = 60;

const CLEANUP_BATCH_SIZE: i64 = 1000;

pub struct Db {
    conn: Mutex<Connection>,
}

// ── Timestamp / id helpers ────────────────────────────────────────────────

pub fn now_epoch() -> i64 {
    Utc::now().timestamp()
}

pub fn now_str() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn generate_workflow_id() -> String {
    format!(
        "WF-{}-{:08X}",
        Local::now().format("%Y%m%d"),
        rand::random::<u32>()
    )
}

fn generate_build_id(prefix: &str) -> String {
    format!("{}-{}-{:08X}", prefix, now_epoch(), rand::random::<u32>())
}

// ── Row mappers ───────────────────────────────────────────────────────────

const WORKFLOW_COLUMNS: &str = "workflow_id, timestamp, user_id, username, submission_data, \
     status, approver_id, approver_username, approval_time, approval_comment, \
     created_at, synced_to_api, group_messages, project, template_type";

fn row_to_workflow(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workflow> {
    let status: String = row.get(5)?;
    let group_messages: Option<String> = row.get(12)?;
    let group_messages: HashMap<i64, i64> = group_messages
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();
    let template_type: Option<String> = row.get(14)?;
    Ok(Workflow {
        workflow_id: row.get(0)?,
        timestamp: row.get(1)?,
        user_id: row.get(2)?,
        username: row.get(3)?,
        submission_data: row.get(4)?,
        status: WorkflowStatus::parse(&status),
        approver_id: row.get(6)?,
        approver_username: row.get(7)?,
        approval_time: row.get(8)?,
        approval_comment: row.get(9)?,
        created_at: row.get(10)?,
        synced_to_api: row.get::<_, i64>(11)? != 0,
        group_messages,
        project: row.get(13)?,
        template_type: TemplateType::parse(template_type.as_deref().unwrap_or("default")),
    })
}

const SSO_SUBMISSION_COLUMNS: &str = "submission_id, workflow_id, process_instance_id, \
     sso_order_data, submit_status, submit_time, submit_response, error_message";

fn row_to_sso_submission(row: &rusqlite::Row<'_>) -> rusqlite::Result<SsoSubmission> {
    let order_data: String = row.get(3)?;
    let submit_status: String = row.get(4)?;
    let submit_response: Option<String> = row.get(6)?;
    Ok(SsoSubmission {
        submission_id: row.get(0)?,
        workflow_id: row.get(1)?,
        process_instance_id: row.get(2)?,
        order_data: serde_json::from_str(&order_data).unwrap_or(serde_json::Value::Null),
        submit_status: SubmitStatus::parse(&submit_status),
        submit_time: row.get(5)?,
        submit_response: submit_response
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok()),
        error_message: row.get(7)?,
    })
}

const SSO_BUILD_COLUMNS: &str = "build_id, submission_id, workflow_id, release_id, job_name, \
     build_status, build_start_time, build_end_time, build_detail, notified";

fn row_to_sso_build(row: &rusqlite::Row<'_>) -> rusqlite::Result<SsoBuild> {
    let status: String = row.get(5)?;
    let detail: Option<String> = row.get(8)?;
    Ok(SsoBuild {
        build_id: row.get(0)?,
        submission_id: row.get(1)?,
        workflow_id: row.get(2)?,
        release_id: row.get(3)?,
        job_name: row.get(4)?,
        build_status: BuildStatus::parse(&status),
        build_start_time: row.get(6)?,
        build_end_time: row.get(7)?,
        build_detail: detail.as_deref().and_then(|s| serde_json::from_str(s).ok()),
        notified: row.get::<_, i64>(9)? != 0,
    })
}

const JENKINS_BUILD_COLUMNS: &str = "build_id, workflow_id, job_name, job_url, build_number, \
     build_status, build_start_time, build_end_time, build_duration, build_parameters, notified";

fn row_to_jenkins_build(row: &rusqlite::Row<'_>) -> rusqlite::Result<JenkinsBuild> {
    let status: String = row.get(5)?;
    let parameters: Option<String> = row.get(9)?;
    Ok(JenkinsBuild {
        build_id: row.get(0)?,
        workflow_id: row.get(1)?,
        job_name: row.get(2)?,
        job_url: row.get(3)?,
        build_number: row.get(4)?,
        build_status: BuildStatus::parse(&status),
        build_start_time: row.get(6)?,
        build_end_time: row.get(7)?,
        build_duration: row.get(8)?,
        build_parameters: parameters
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok()),
        notified: row.get::<_, i64>(10)? != 0,
    })
}

// ── Db impl ───────────────────────────────────────────────────────────────

impl Db {
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create data dir {parent:?}"))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open SQLite database at {path:?}"))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -2048;
             PRAGMA temp_store = MEMORY;",
        )
        .context("failed to set PRAGMAs")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to apply schema migrations")?;
        // Idempotent column additions for DBs created before these columns existed.
        // ALTER TABLE fails if the column already exists; ignore that error.
        let alters = [
            "ALTER TABLE workflows ADD COLUMN project TEXT",
            "ALTER TABLE workflows ADD COLUMN template_type TEXT",
        ];
        for sql in alters {
            let _ = conn.execute(sql, []);
        }
        Ok(())
    }

    // ── Workflows ─────────────────────────────────────────────────────────

    pub fn create_workflow(
        &self,
        user_id: i64,
        username: &str,
        submission_data: &str,
        project: &str,
        template_type: TemplateType,
    ) -> Result<Workflow> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let workflow_id = generate_workflow_id();
        let timestamp = now_epoch();
        let created_at = now_str();
        conn.execute(
            "INSERT INTO workflows (workflow_id, timestamp, user_id, username, \
             submission_data, status, created_at, project, template_type) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                workflow_id,
                timestamp,
                user_id,
                username,
                submission_data,
                WorkflowStatus::Pending.as_str(),
                created_at,
                project,
                template_type.as_str(),
            ],
        )
        .context("create_workflow")?;
        tracing::info!("workflow created: {workflow_id} by {username} ({user_id})");
        Ok(Workflow {
            workflow_id,
            timestamp,
            user_id,
            username: username.to_string(),
            submission_data: submission_data.to_string(),
            status: WorkflowStatus::Pending,
            approver_id: None,
            approver_username: None,
            approval_time: None,
            approval_comment: None,
            created_at,
            synced_to_api: false,
            group_messages: HashMap::new(),
            project: Some(project.to_string()),
            template_type,
        })
    }

    pub fn get_workflow(&self, workflow_id: &str) -> Result<Option<Workflow>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let sql = format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE workflow_id = ?1");
        conn.query_row(&sql, params![workflow_id], row_to_workflow)
            .optional()
            .context("get_workflow")
    }

    /// Reverse lookup from a root approval message to its workflow.
    pub fn get_workflow_by_message_id(&self, message_id: i64) -> Result<Option<Workflow>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let sql = format!(
            "SELECT {} FROM workflows w \
             INNER JOIN workflow_messages wm ON w.workflow_id = wm.workflow_id \
             WHERE wm.message_id = ?1",
            WORKFLOW_COLUMNS
                .split(", ")
                .map(|c| format!("w.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        conn.query_row(&sql, params![message_id], row_to_workflow)
            .optional()
            .context("get_workflow_by_message_id")
    }

    /// Guarded status transition: only succeeds while the row is still
    /// pending. Returns false when the workflow is missing or already
    /// decided, which makes a second button click a no-op.
    pub fn transition_status(
        &self,
        workflow_id: &str,
        to: WorkflowStatus,
        approver_id: i64,
        approver_username: &str,
        approval_comment: &str,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let rows = conn
            .execute(
                "UPDATE workflows SET status = ?1, approver_id = ?2, approver_username = ?3, \
                 approval_time = ?4, approval_comment = ?5 \
                 WHERE workflow_id = ?6 AND status = 'pending'",
                params![
                    to.as_str(),
                    approver_id,
                    approver_username,
                    now_str(),
                    approval_comment,
                    workflow_id,
                ],
            )
            .context("transition_status")?;
        Ok(rows == 1)
    }

    /// Persist the `(group_id, message_id)` map on the workflow and mirror it
    /// into `workflow_messages` for reverse lookup.
    pub fn attach_group_messages(
        &self,
        workflow_id: &str,
        group_messages: &HashMap<i64, i64>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.unchecked_transaction().context("attach tx")?;
        let json = serde_json::to_string(group_messages).context("serialize group_messages")?;
        tx.execute(
            "UPDATE workflows SET group_messages = ?1 WHERE workflow_id = ?2",
            params![json, workflow_id],
        )
        .context("attach_group_messages update")?;
        for (group_id, message_id) in group_messages {
            tx.execute(
                "INSERT OR REPLACE INTO workflow_messages (message_id, workflow_id, group_id) \
                 VALUES (?1, ?2, ?3)",
                params![message_id, workflow_id, group_id],
            )
            .context("attach_group_messages insert")?;
        }
        tx.commit().context("attach_group_messages commit")?;
        Ok(())
    }

    pub fn mark_synced(&self, workflow_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE workflows SET synced_to_api = 1 WHERE workflow_id = ?1",
            params![workflow_id],
        )
        .context("mark_synced")?;
        Ok(())
    }

    pub fn delete_workflow(&self, workflow_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let rows = conn
            .execute(
                "DELETE FROM workflows WHERE workflow_id = ?1",
                params![workflow_id],
            )
            .context("delete_workflow")?;
        Ok(rows > 0)
    }

    pub fn list_workflows(
        &self,
        limit: i64,
        offset: i64,
        status: Option<WorkflowStatus>,
        project: Option<&str>,
    ) -> Result<Vec<Workflow>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let sql = format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows \
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR project = ?2) \
             ORDER BY timestamp DESC LIMIT ?3 OFFSET ?4"
        );
        let mut stmt = conn.prepare(&sql)?;
        let workflows = stmt
            .query_map(
                params![status.map(WorkflowStatus::as_str), project, limit, offset],
                row_to_workflow,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("list_workflows")?;
        Ok(workflows)
    }

    /// (total, pending, approved, rejected)
    pub fn workflow_stats(&self) -> Result<(i64, i64, i64, i64)> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let count = |status: Option<&str>| -> Result<i64> {
            conn.query_row(
                "SELECT COUNT(*) FROM workflows WHERE (?1 IS NULL OR status = ?1)",
                params![status],
                |r| r.get(0),
            )
            .context("workflow_stats")
        };
        Ok((
            count(None)?,
            count(Some("pending"))?,
            count(Some("approved"))?,
            count(Some("rejected"))?,
        ))
    }

    /// Delete workflows past the retention window in batches, pausing
    /// between batches to keep lock holds short. Cascades to children.
    pub fn cleanup_old_data(&self) -> Result<usize> {
        let cutoff = now_epoch() - RETENTION_DAYS * 24 * 3600;
        let mut total = 0usize;
        loop {
            let deleted = {
                let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
                conn.execute(
                    "DELETE FROM workflows WHERE workflow_id IN (\
                     SELECT workflow_id FROM workflows WHERE timestamp < ?1 LIMIT ?2)",
                    params![cutoff, CLEANUP_BATCH_SIZE],
                )
                .context("cleanup_old_data")?
            };
            total += deleted;
            if deleted == 0 {
                break;
            }
            tracing::debug!("retention sweep: {total} rows deleted so far");
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
        if total > 0 {
            tracing::info!("retention sweep removed {total} workflows older than {RETENTION_DAYS} days");
        }
        Ok(total)
    }

    // ── App config ────────────────────────────────────────────────────────

    pub fn get_app_config(&self, key: &str, default: &str) -> String {
        self.get_app_config_opt(key)
            .unwrap_or_else(|| default.to_string())
    }

    pub fn get_app_config_opt(&self, key: &str) -> Option<String> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(
            "SELECT config_value FROM app_config WHERE config_key = ?1",
            params![key],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()
        .ok()
        .flatten()
        .flatten()
    }

    pub fn set_app_config(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO app_config (config_key, config_value, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(config_key) DO UPDATE SET \
               config_value = excluded.config_value, \
               updated_at = excluded.updated_at",
            params![key, value, now_epoch()],
        )
        .context("set_app_config")?;
        Ok(())
    }

    pub fn all_app_config(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare("SELECT config_key, config_value FROM app_config")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("all_app_config")?;
        Ok(rows)
    }

    // ── Project options ───────────────────────────────────────────────────

    pub fn get_project_options_raw(&self) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(
            "SELECT config_value FROM project_options WHERE config_key = 'projects'",
            [],
            |row| row.get(0),
        )
        .optional()
        .context("get_project_options_raw")
    }

    pub fn update_project_options_raw(&self, json: &str) -> Result<()> {
        // Validate before persisting; a broken document would wedge boot.
        serde_json::from_str::<serde_json::Value>(json).context("project options is not JSON")?;
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT OR REPLACE INTO project_options (config_key, config_value, updated_at) \
             VALUES ('projects', ?1, ?2)",
            params![json, now_epoch()],
        )
        .context("update_project_options_raw")?;
        Ok(())
    }

    // ── Message templates ─────────────────────────────────────────────────

    /// Insert the six canonical templates where absent. Idempotent.
    pub fn seed_default_templates(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.unchecked_transaction().context("seed tx")?;
        for (template_type, content) in crate::templates::DEFAULT_TEMPLATES {
            tx.execute(
                "INSERT INTO message_templates (template_type, project, content, updated_at) \
                 SELECT ?1, NULL, ?2, ?3 \
                 WHERE NOT EXISTS (SELECT 1 FROM message_templates \
                                   WHERE template_type = ?1 AND project IS NULL)",
                params![template_type, content, now_epoch()],
            )
            .context("seed_default_templates")?;
        }
        tx.commit().context("seed_default_templates commit")?;
        Ok(())
    }

    /// Project-scoped override first, then the global row, then empty.
    pub fn get_message_template(&self, template_type: &str, project: Option<&str>) -> String {
        if let Err(e) = self.seed_default_templates() {
            tracing::error!("seed_default_templates failed: {e}");
        }
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(project) = project {
            let scoped: Option<String> = conn
                .query_row(
                    "SELECT content FROM message_templates \
                     WHERE template_type = ?1 AND project = ?2",
                    params![template_type, project],
                    |row| row.get(0),
                )
                .optional()
                .ok()
                .flatten();
            if let Some(content) = scoped {
                if !content.is_empty() {
                    return content;
                }
            }
        }
        conn.query_row(
            "SELECT content FROM message_templates \
             WHERE template_type = ?1 AND project IS NULL",
            params![template_type],
            |row| row.get(0),
        )
        .optional()
        .ok()
        .flatten()
        .unwrap_or_default()
    }

    pub fn set_message_template(
        &self,
        template_type: &str,
        project: Option<&str>,
        content: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        // ON CONFLICT never fires for a NULL project (NULL keys do not
        // collide), so the global row is updated-or-inserted explicitly.
        let updated = conn
            .execute(
                "UPDATE message_templates SET content = ?1, updated_at = ?2 \
                 WHERE template_type = ?3 AND project IS ?4",
                params![content, now_epoch(), template_type, project],
            )
            .context("set_message_template update")?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO message_templates (template_type, project, content, updated_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![template_type, project, content, now_epoch()],
            )
            .context("set_message_template insert")?;
        }
        Ok(())
    }

    // ── SSO submissions ───────────────────────────────────────────────────

    /// `submission_id == workflow_id`: a second submission for the same
    /// workflow collides on the primary key and fails.
    pub fn create_sso_submission(
        &self,
        workflow_id: &str,
        order_data: &serde_json::Value,
    ) -> Result<SsoSubmission> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let submit_time = now_epoch();
        let created_at = now_str();
        conn.execute(
            "INSERT INTO sso_submissions (submission_id, workflow_id, sso_order_data, \
             submit_status, submit_time, created_at, updated_at) \
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?5)",
            params![
                workflow_id,
                workflow_id,
                order_data.to_string(),
                submit_time,
                created_at,
            ],
        )
        .context("create_sso_submission")?;
        Ok(SsoSubmission {
            submission_id: workflow_id.to_string(),
            workflow_id: workflow_id.to_string(),
            process_instance_id: None,
            order_data: order_data.clone(),
            submit_status: SubmitStatus::Pending,
            submit_time,
            submit_response: None,
            error_message: None,
        })
    }

    pub fn get_sso_submission_by_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Option<SsoSubmission>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let sql = format!(
            "SELECT {SSO_SUBMISSION_COLUMNS} FROM sso_submissions \
             WHERE workflow_id = ?1 ORDER BY submit_time DESC LIMIT 1"
        );
        conn.query_row(&sql, params![workflow_id], row_to_sso_submission)
            .optional()
            .context("get_sso_submission_by_workflow")
    }

    pub fn update_sso_submission_status(
        &self,
        submission_id: &str,
        status: SubmitStatus,
        process_instance_id: Option<&str>,
        response: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE sso_submissions SET submit_status = ?1, updated_at = ?2, \
             process_instance_id = COALESCE(?3, process_instance_id), \
             submit_response = COALESCE(?4, submit_response), \
             error_message = COALESCE(?5, error_message) \
             WHERE submission_id = ?6",
            params![
                status.as_str(),
                now_str(),
                process_instance_id,
                response.map(|r| r.to_string()),
                error,
                submission_id,
            ],
        )
        .context("update_sso_submission_status")?;
        Ok(())
    }

    // ── SSO build status ──────────────────────────────────────────────────

    pub fn create_sso_build(
        &self,
        submission_id: &str,
        workflow_id: &str,
        release_id: i64,
    ) -> Result<SsoBuild> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let build_id = generate_build_id("BUILD");
        let build_start_time = now_epoch();
        let created_at = now_str();
        conn.execute(
            "INSERT INTO sso_build_status (build_id, submission_id, workflow_id, release_id, \
             job_name, build_status, build_start_time, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, '', 'BUILDING', ?5, ?6, ?6)",
            params![
                build_id,
                submission_id,
                workflow_id,
                release_id,
                build_start_time,
                created_at,
            ],
        )
        .context("create_sso_build")?;
        Ok(SsoBuild {
            build_id,
            submission_id: submission_id.to_string(),
            workflow_id: workflow_id.to_string(),
            release_id,
            job_name: String::new(),
            build_status: BuildStatus::Building,
            build_start_time: Some(build_start_time),
            build_end_time: None,
            build_detail: None,
            notified: false,
        })
    }

    /// Stamps `build_end_time` on terminal transitions and picks `jobName`
    /// out of the poll payload when present.
    pub fn update_sso_build_status(
        &self,
        build_id: &str,
        status: BuildStatus,
        detail: Option<&serde_json::Value>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let end_time = status.is_terminal().then(now_epoch);
        let job_name = detail
            .and_then(|d| d.get("jobName"))
            .and_then(|v| v.as_str());
        conn.execute(
            "UPDATE sso_build_status SET build_status = ?1, updated_at = ?2, \
             build_end_time = COALESCE(?3, build_end_time), \
             build_detail = COALESCE(?4, build_detail), \
             job_name = COALESCE(?5, job_name) \
             WHERE build_id = ?6",
            params![
                status.as_str(),
                now_str(),
                end_time,
                detail.map(|d| d.to_string()),
                job_name,
                build_id,
            ],
        )
        .context("update_sso_build_status")?;
        Ok(())
    }

    pub fn get_sso_build(&self, build_id: &str) -> Result<Option<SsoBuild>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let sql = format!("SELECT {SSO_BUILD_COLUMNS} FROM sso_build_status WHERE build_id = ?1");
        conn.query_row(&sql, params![build_id], row_to_sso_build)
            .optional()
            .context("get_sso_build")
    }

    pub fn get_pending_sso_notifications(&self, limit: i64) -> Result<Vec<SsoBuild>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let sql = format!(
            "SELECT {SSO_BUILD_COLUMNS} FROM sso_build_status \
             WHERE build_status IN ('SUCCESS', 'FAILURE', 'ABORTED', 'TIMEOUT', 'ERROR') \
             AND notified = 0 ORDER BY build_end_time ASC LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let builds = stmt
            .query_map(params![limit], row_to_sso_build)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("get_pending_sso_notifications")?;
        Ok(builds)
    }

    pub fn mark_sso_build_notified(&self, build_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE sso_build_status SET notified = 1, notification_time = ?1, updated_at = ?2 \
             WHERE build_id = ?3",
            params![now_epoch(), now_str(), build_id],
        )
        .context("mark_sso_build_notified")?;
        Ok(())
    }

    // ── Jenkins builds ────────────────────────────────────────────────────

    pub fn create_jenkins_build(
        &self,
        workflow_id: &str,
        job_name: &str,
        build_number: Option<i64>,
        job_url: Option<&str>,
        build_status: BuildStatus,
        build_parameters: Option<&serde_json::Value>,
    ) -> Result<JenkinsBuild> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let build_id = generate_build_id("JENKINS");
        let build_start_time = now_epoch();
        let created_at = now_str();
        conn.execute(
            "INSERT INTO jenkins_builds (build_id, workflow_id, job_name, job_url, \
             build_number, build_status, build_start_time, build_parameters, \
             created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                build_id,
                workflow_id,
                job_name,
                job_url,
                build_number,
                build_status.as_str(),
                build_start_time,
                build_parameters.map(|p| p.to_string()),
                created_at,
            ],
        )
        .context("create_jenkins_build")?;
        Ok(JenkinsBuild {
            build_id,
            workflow_id: workflow_id.to_string(),
            job_name: job_name.to_string(),
            job_url: job_url.map(str::to_string),
            build_number,
            build_status,
            build_start_time: Some(build_start_time),
            build_end_time: None,
            build_duration: None,
            build_parameters: build_parameters.cloned(),
            notified: false,
        })
    }

    pub fn update_jenkins_build_status(
        &self,
        build_id: &str,
        status: BuildStatus,
        job_url: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE jenkins_builds SET build_status = ?1, updated_at = ?2, \
             job_url = COALESCE(?3, job_url) \
             WHERE build_id = ?4",
            params![status.as_str(), now_str(), job_url, build_id],
        )
        .context("update_jenkins_build_status")?;
        Ok(())
    }

    /// Terminal write: status, end time, duration (ms) and URL in one shot.
    pub fn finish_jenkins_build(
        &self,
        build_id: &str,
        status: BuildStatus,
        duration_ms: Option<i64>,
        job_url: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE jenkins_builds SET build_status = ?1, build_end_time = ?2, \
             build_duration = COALESCE(?3, build_duration), \
             job_url = COALESCE(?4, job_url), updated_at = ?5 \
             WHERE build_id = ?6",
            params![
                status.as_str(),
                now_epoch(),
                duration_ms,
                job_url,
                now_str(),
                build_id,
            ],
        )
        .context("finish_jenkins_build")?;
        Ok(())
    }

    pub fn get_jenkins_build(&self, build_id: &str) -> Result<Option<JenkinsBuild>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let sql = format!("SELECT {JENKINS_BUILD_COLUMNS} FROM jenkins_builds WHERE build_id = ?1");
        conn.query_row(&sql, params![build_id], row_to_jenkins_build)
            .optional()
            .context("get_jenkins_build")
    }

    pub fn get_jenkins_builds_by_workflow(&self, workflow_id: &str) -> Result<Vec<JenkinsBuild>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let sql = format!(
            "SELECT {JENKINS_BUILD_COLUMNS} FROM jenkins_builds \
             WHERE workflow_id = ?1 ORDER BY created_at ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let builds = stmt
            .query_map(params![workflow_id], row_to_jenkins_build)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("get_jenkins_builds_by_workflow")?;
        Ok(builds)
    }

    pub fn get_jenkins_build_by_job_and_number(
        &self,
        workflow_id: &str,
        job_name: &str,
        build_number: i64,
    ) -> Result<Option<JenkinsBuild>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let sql = format!(
            "SELECT {JENKINS_BUILD_COLUMNS} FROM jenkins_builds \
             WHERE workflow_id = ?1 AND job_name = ?2 AND build_number = ?3 LIMIT 1"
        );
        conn.query_row(
            &sql,
            params![workflow_id, job_name, build_number],
            row_to_jenkins_build,
        )
        .optional()
        .context("get_jenkins_build_by_job_and_number")
    }

    pub fn get_pending_jenkins_notifications(&self, limit: i64) -> Result<Vec<JenkinsBuild>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let sql = format!(
            "SELECT {JENKINS_BUILD_COLUMNS} FROM jenkins_builds \
             WHERE build_status IN ('SUCCESS', 'FAILURE', 'ABORTED', 'UNSTABLE', 'TIMEOUT', 'ERROR') \
             AND notified = 0 ORDER BY build_end_time ASC LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let builds = stmt
            .query_map(params![limit], row_to_jenkins_build)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("get_pending_jenkins_notifications")?;
        Ok(builds)
    }

    pub fn mark_jenkins_build_notified(&self, build_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE jenkins_builds SET notified = 1, notification_time = ?1, updated_at = ?2 \
             WHERE build_id = ?3",
            params![now_epoch(), now_str(), build_id],
        )
        .context("mark_jenkins_build_notified")?;
        Ok(())
    }

    /// Test/CLI helper: force a workflow's creation timestamp.
    pub fn set_workflow_timestamp(&self, workflow_id: &str, timestamp: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE workflows SET timestamp = ?1 WHERE workflow_id = ?2",
            params![timestamp, workflow_id],
        )
        .context("set_workflow_timestamp")?;
        Ok(())
    }
}
