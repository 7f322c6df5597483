//! Store-level behaviour: workflow lifecycle, guarded transitions,
//! template fallback, notification idempotence, and the retention sweep.

use std::collections::HashMap;

use greenlight_core::db::{now_epoch, Db, RETENTION_DAYS};
use greenlight_core::state;
use greenlight_core::templates;
use greenlight_core::types::{BuildStatus, SubmitStatus, TemplateType, WorkflowStatus};

fn open_db() -> (tempfile::TempDir, Db) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("workflows.db");
    let db = Db::open(path.to_str().unwrap()).unwrap();
    db.migrate().unwrap();
    (dir, db)
}

fn create(db: &Db) -> String {
    let w = db
        .create_workflow(42, "alice", "申请项目: EBPAY", "EBPAY", TemplateType::Default)
        .unwrap();
    w.workflow_id
}

// ── Workflows ──────────────────────────────────────────────────────────────

#[test]
fn workflow_id_shape() {
    let (_dir, db) = open_db();
    let id = create(&db);
    // WF-YYYYMMDD-XXXXXXXX with an uppercase hex suffix
    let parts: Vec<&str> = id.split('-').collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], "WF");
    assert_eq!(parts[1].len(), 8);
    assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
    assert_eq!(parts[2].len(), 8);
    assert!(parts[2]
        .chars()
        .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
}

#[test]
fn create_and_get_round_trip() {
    let (_dir, db) = open_db();
    let id = create(&db);
    let w = db.get_workflow(&id).unwrap().unwrap();
    assert_eq!(w.status, WorkflowStatus::Pending);
    assert_eq!(w.username, "alice");
    assert_eq!(w.project.as_deref(), Some("EBPAY"));
    assert!(w.approver_id.is_none());
    assert!(w.group_messages.is_empty());
    assert!(!w.synced_to_api);
    assert!(db.get_workflow("WF-00000000-DEADBEEF").unwrap().is_none());
}

#[test]
fn group_messages_round_trip_and_reverse_lookup() {
    let (_dir, db) = open_db();
    let id = create(&db);
    let mut map = HashMap::new();
    map.insert(-1001_i64, 555_i64);
    map.insert(-1002_i64, 556_i64);
    db.attach_group_messages(&id, &map).unwrap();

    let w = db.get_workflow(&id).unwrap().unwrap();
    assert_eq!(w.group_messages, map);

    let by_msg = db.get_workflow_by_message_id(556).unwrap().unwrap();
    assert_eq!(by_msg.workflow_id, id);
    assert!(db.get_workflow_by_message_id(999).unwrap().is_none());
}

// ── State machine ──────────────────────────────────────────────────────────

#[test]
fn approve_is_guarded_and_idempotent() {
    let (_dir, db) = open_db();
    let id = create(&db);

    assert!(state::approve(&db, &id, 7, "boss", None).unwrap());
    let w = db.get_workflow(&id).unwrap().unwrap();
    assert_eq!(w.status, WorkflowStatus::Approved);
    assert_eq!(w.approver_id, Some(7));
    assert_eq!(w.approver_username.as_deref(), Some("boss"));
    assert_eq!(w.approval_comment.as_deref(), Some("已通过"));
    assert!(w.approval_time.is_some());

    // Second decision is a no-op returning false, in either direction.
    assert!(!state::approve(&db, &id, 8, "late", None).unwrap());
    assert!(!state::reject(&db, &id, 8, "late", None).unwrap());
    let w = db.get_workflow(&id).unwrap().unwrap();
    assert_eq!(w.status, WorkflowStatus::Approved);
    assert_eq!(w.approver_id, Some(7));
}

#[test]
fn reject_sets_default_comment() {
    let (_dir, db) = open_db();
    let id = create(&db);
    assert!(state::reject(&db, &id, 9, "anyone", None).unwrap());
    let w = db.get_workflow(&id).unwrap().unwrap();
    assert_eq!(w.status, WorkflowStatus::Rejected);
    assert_eq!(w.approval_comment.as_deref(), Some("已拒绝"));
}

#[test]
fn transition_on_missing_workflow_returns_false() {
    let (_dir, db) = open_db();
    assert!(!state::approve(&db, "WF-00000000-00000000", 1, "x", None).unwrap());
}

// ── Templates ──────────────────────────────────────────────────────────────

#[test]
fn template_fallback_project_then_global() {
    let (_dir, db) = open_db();

    // Seeded default comes back for an unknown project.
    let global = db.get_message_template(templates::TPL_PENDING, Some("EBPAY"));
    assert!(global.contains("工作流审批请求"));

    // A project-scoped row overrides the global one for that project only.
    db.set_message_template(templates::TPL_PENDING, Some("EBPAY"), "custom {workflow_id}")
        .unwrap();
    let scoped = db.get_message_template(templates::TPL_PENDING, Some("EBPAY"));
    assert_eq!(scoped, "custom {workflow_id}");
    let other = db.get_message_template(templates::TPL_PENDING, Some("LINKS"));
    assert!(other.contains("工作流审批请求"));
}

#[test]
fn all_six_defaults_are_seeded() {
    let (_dir, db) = open_db();
    for key in [
        templates::TPL_PENDING,
        templates::TPL_APPROVED,
        templates::TPL_REJECTED,
        templates::TPL_PENDING_ADDRESS,
        templates::TPL_APPROVED_ADDRESS,
        templates::TPL_REJECTED_ADDRESS,
    ] {
        assert!(!db.get_message_template(key, None).is_empty(), "missing {key}");
    }
}

// ── SSO children ───────────────────────────────────────────────────────────

#[test]
fn sso_submission_is_at_most_once_per_workflow() {
    let (_dir, db) = open_db();
    let id = create(&db);
    let order = serde_json::json!({"title": "EBPAY预发发版"});
    db.create_sso_submission(&id, &order).unwrap();
    // submission_id == workflow_id, so the second insert collides.
    assert!(db.create_sso_submission(&id, &order).is_err());
}

#[test]
fn sso_submission_status_updates() {
    let (_dir, db) = open_db();
    let id = create(&db);
    db.create_sso_submission(&id, &serde_json::json!({})).unwrap();
    db.update_sso_submission_status(
        &id,
        SubmitStatus::Success,
        Some("pid-123"),
        Some(&serde_json::json!({"object": {"processInstanceId": "pid-123"}})),
        None,
    )
    .unwrap();
    let sub = db.get_sso_submission_by_workflow(&id).unwrap().unwrap();
    assert_eq!(sub.submit_status, SubmitStatus::Success);
    assert_eq!(sub.process_instance_id.as_deref(), Some("pid-123"));
}

#[test]
fn sso_build_terminal_update_sets_end_time_and_job_name() {
    let (_dir, db) = open_db();
    let id = create(&db);
    db.create_sso_submission(&id, &serde_json::json!({})).unwrap();
    let build = db.create_sso_build(&id, &id, 900001).unwrap();
    assert_eq!(build.build_status, BuildStatus::Building);

    let detail = serde_json::json!({"jobName": "UAT/svc-a", "publishStatus": "SUCCESS"});
    db.update_sso_build_status(&build.build_id, BuildStatus::Success, Some(&detail))
        .unwrap();

    let pending = db.get_pending_sso_notifications(100).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].job_name, "UAT/svc-a");
    assert!(pending[0].build_end_time.is_some());
}

#[test]
fn notified_builds_never_return() {
    let (_dir, db) = open_db();
    let id = create(&db);
    db.create_sso_submission(&id, &serde_json::json!({})).unwrap();
    let build = db.create_sso_build(&id, &id, 900002).unwrap();
    db.update_sso_build_status(&build.build_id, BuildStatus::Failure, None)
        .unwrap();
    assert_eq!(db.get_pending_sso_notifications(100).unwrap().len(), 1);

    db.mark_sso_build_notified(&build.build_id).unwrap();
    assert!(db.get_pending_sso_notifications(100).unwrap().is_empty());
    // Marking again is harmless.
    db.mark_sso_build_notified(&build.build_id).unwrap();
    assert!(db.get_pending_sso_notifications(100).unwrap().is_empty());
}

// ── Jenkins children ───────────────────────────────────────────────────────

#[test]
fn jenkins_build_lifecycle() {
    let (_dir, db) = open_db();
    let id = create(&db);
    let params = serde_json::json!({
        "action_type": "gray",
        "gitBranch": "main",
        "check_commitID": "aaa",
    });
    let build = db
        .create_jenkins_build(&id, "UAT/svc-a", Some(17), None, BuildStatus::Building, Some(&params))
        .unwrap();
    assert!(build.build_id.starts_with("JENKINS-"));

    db.finish_jenkins_build(
        &build.build_id,
        BuildStatus::Success,
        Some(93_000),
        Some("https://jenkins.example.com/job/UAT/job/svc-a/17/"),
    )
    .unwrap();

    let row = db.get_jenkins_build(&build.build_id).unwrap().unwrap();
    assert_eq!(row.build_status, BuildStatus::Success);
    assert_eq!(row.build_duration, Some(93_000));
    assert!(row.build_end_time.is_some());
    assert_eq!(
        row.build_parameters.unwrap()["check_commitID"],
        serde_json::json!("aaa")
    );

    let found = db
        .get_jenkins_build_by_job_and_number(&id, "UAT/svc-a", 17)
        .unwrap()
        .unwrap();
    assert_eq!(found.build_id, build.build_id);

    let pending = db.get_pending_jenkins_notifications(100).unwrap();
    assert_eq!(pending.len(), 1);
    db.mark_jenkins_build_notified(&build.build_id).unwrap();
    assert!(db.get_pending_jenkins_notifications(100).unwrap().is_empty());
}

#[test]
fn pending_jenkins_notifications_include_timeout_and_unstable() {
    let (_dir, db) = open_db();
    let id = create(&db);
    let b1 = db
        .create_jenkins_build(&id, "UAT/svc-a", None, None, BuildStatus::Building, None)
        .unwrap();
    let b2 = db
        .create_jenkins_build(&id, "UAT/svc-b", None, None, BuildStatus::Building, None)
        .unwrap();
    db.finish_jenkins_build(&b1.build_id, BuildStatus::Timeout, None, None)
        .unwrap();
    db.finish_jenkins_build(&b2.build_id, BuildStatus::Unstable, None, None)
        .unwrap();
    assert_eq!(db.get_pending_jenkins_notifications(100).unwrap().len(), 2);
}

// ── Retention ──────────────────────────────────────────────────────────────

#[test]
fn cleanup_removes_only_expired_and_cascades() {
    let (_dir, db) = open_db();
    let old = create(&db);
    let fresh = create(&db);

    // Children hang off the old workflow.
    db.create_sso_submission(&old, &serde_json::json!({})).unwrap();
    let sso_build = db.create_sso_build(&old, &old, 1).unwrap();
    db.update_sso_build_status(&sso_build.build_id, BuildStatus::Failure, None)
        .unwrap();
    db.create_jenkins_build(&old, "UAT/svc-a", None, None, BuildStatus::Building, None)
        .unwrap();

    // Push it one day past the retention boundary.
    db.set_workflow_timestamp(&old, now_epoch() - (RETENTION_DAYS + 1) * 24 * 3600)
        .unwrap();

    let removed = db.cleanup_old_data().unwrap();
    assert_eq!(removed, 1);
    assert!(db.get_workflow(&old).unwrap().is_none());
    assert!(db.get_workflow(&fresh).unwrap().is_some());
    assert!(db.get_sso_submission_by_workflow(&old).unwrap().is_none());
    assert!(db.get_jenkins_builds_by_workflow(&old).unwrap().is_empty());
    // The terminal-but-unnotified SSO row went with the cascade too.
    assert!(db.get_pending_sso_notifications(100).unwrap().is_empty());
}

#[test]
fn cleanup_keeps_rows_inside_the_window() {
    let (_dir, db) = open_db();
    let id = create(&db);
    db.set_workflow_timestamp(&id, now_epoch() - (RETENTION_DAYS - 1) * 24 * 3600)
        .unwrap();
    assert_eq!(db.cleanup_old_data().unwrap(), 0);
    assert!(db.get_workflow(&id).unwrap().is_some());
}

// ── Listing / stats ────────────────────────────────────────────────────────

#[test]
fn list_and_stats() {
    let (_dir, db) = open_db();
    let a = create(&db);
    let _b = create(&db);
    state::approve(&db, &a, 1, "boss", None).unwrap();

    let (total, pending, approved, rejected) = db.workflow_stats().unwrap();
    assert_eq!((total, pending, approved, rejected), (2, 1, 1, 0));

    let approved_rows = db
        .list_workflows(10, 0, Some(WorkflowStatus::Approved), None)
        .unwrap();
    assert_eq!(approved_rows.len(), 1);
    assert_eq!(approved_rows[0].workflow_id, a);

    let by_project = db.list_workflows(10, 0, None, Some("EBPAY")).unwrap();
    assert_eq!(by_project.len(), 2);
    assert!(db.list_workflows(10, 0, None, Some("NOPE")).unwrap().is_empty());
}
