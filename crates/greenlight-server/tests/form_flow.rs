//! Conversation engine flows: the default release form, the address-only
//! form, input validation, and the round-trip guarantee that whatever the
//! form emits the orchestration parser reads back unchanged.

use greenlight_core::options::ProjectOptions;
use greenlight_core::types::TemplateType;
use greenlight_ops::submission::parse_submission;
use greenlight_server::form::{self, FormState, Outcome};

fn options() -> ProjectOptions {
    ProjectOptions::parse(
        r#"{
          "projects": {
            "EBPAY": {
              "command": "/deploy_ebpay",
              "environments": ["UAT", "GRAY-UAT"],
              "services": {
                "UAT": ["svc-a", "svc-b", "svc-c"],
                "GRAY-UAT": ["svc-gray"]
              },
              "group_ids": [-1001, -1002],
              "default_branch": {"UAT": "uat-ebpay"}
            },
            "LINKS": {
              "command": "addr_links",
              "environments": ["TRC", "BSC"],
              "services": {
                "TRC": ["link-node-trc"],
                "BSC": ["link-node-bsc"]
              },
              "group_ids": [-2000],
              "address_only": true
            }
          }
        }"#,
    )
    .unwrap()
}

fn expect_continue(outcome: Outcome) -> form::Reply {
    match outcome {
        Outcome::Continue(reply) => reply,
        other => panic!("expected Continue, got {other:?}"),
    }
}

// ── Default flow ───────────────────────────────────────────────────────────

#[test]
fn full_default_flow_round_trips_through_the_parser() {
    let opts = options();
    let cfg = opts.project("EBPAY").unwrap();

    let (mut session, reply) = form::start("EBPAY", cfg);
    assert_eq!(session.state, FormState::SelectingEnv);
    assert!(reply.text.contains("⏳ 申请环境: 请选择"));

    // Environment with a configured default branch offers the two buttons.
    expect_continue(form::handle_callback(&mut session, "select_env:UAT", cfg));
    assert_eq!(session.state, FormState::ChoosingBranch);

    // Take the custom path and type a branch.
    expect_continue(form::handle_callback(&mut session, "branch:custom", cfg));
    assert_eq!(session.state, FormState::InputtingBranch);
    expect_continue(form::handle_text(&mut session, "main", cfg));
    assert_eq!(session.state, FormState::SelectingService);

    // Multi-select two services, then done.
    expect_continue(form::handle_callback(&mut session, "select_service:svc-a", cfg));
    expect_continue(form::handle_callback(&mut session, "select_service:svc-b", cfg));
    expect_continue(form::handle_callback(&mut session, "confirm_service_selection", cfg));
    assert_eq!(session.state, FormState::InputtingHash);

    // One hash per service, in order.
    expect_continue(form::handle_text(&mut session, "aaa", cfg));
    assert_eq!(session.state, FormState::InputtingHash);
    expect_continue(form::handle_text(&mut session, "bbb", cfg));
    assert_eq!(session.state, FormState::InputtingContent);

    expect_continue(form::handle_text(&mut session, "bugfix", cfg));
    assert_eq!(session.state, FormState::Confirming);

    let Outcome::Submit {
        submission_data,
        project,
        template_type,
    } = form::handle_callback(&mut session, "confirm_form", cfg)
    else {
        panic!("expected Submit");
    };
    assert_eq!(project, "EBPAY");
    assert_eq!(template_type, TemplateType::Default);

    // The parser must see exactly the values chosen in the form.
    let parsed = parse_submission(&submission_data);
    assert_eq!(parsed.project.as_deref(), Some("EBPAY"));
    assert_eq!(parsed.environment.as_deref(), Some("UAT"));
    assert_eq!(parsed.branch.as_deref(), Some("main"));
    assert_eq!(parsed.services, vec!["svc-a", "svc-b"]);
    assert_eq!(parsed.hashes, vec!["aaa", "bbb"]);
    assert_eq!(parsed.content.as_deref(), Some("bugfix"));
    assert!(parsed.addresses.is_empty());
}

#[test]
fn default_branch_button_uses_configured_branch() {
    let opts = options();
    let cfg = opts.project("EBPAY").unwrap();
    let (mut session, _) = form::start("EBPAY", cfg);
    expect_continue(form::handle_callback(&mut session, "select_env:UAT", cfg));
    expect_continue(form::handle_callback(&mut session, "branch:default", cfg));
    assert_eq!(session.state, FormState::SelectingService);
    assert_eq!(session.data.branch.as_deref(), Some("uat-ebpay"));
}

#[test]
fn env_without_default_branch_goes_straight_to_input() {
    let opts = options();
    let cfg = opts.project("EBPAY").unwrap();
    let (mut session, _) = form::start("EBPAY", cfg);
    expect_continue(form::handle_callback(&mut session, "select_env:GRAY-UAT", cfg));
    assert_eq!(session.state, FormState::InputtingBranch);
}

#[test]
fn service_toggle_and_empty_selection_alert() {
    let opts = options();
    let cfg = opts.project("EBPAY").unwrap();
    let (mut session, _) = form::start("EBPAY", cfg);
    expect_continue(form::handle_callback(&mut session, "select_env:UAT", cfg));
    expect_continue(form::handle_callback(&mut session, "branch:default", cfg));

    // Toggle on, toggle off.
    let reply = expect_continue(form::handle_callback(&mut session, "select_service:svc-a", cfg));
    assert!(reply.text.contains("svc-a"));
    assert_eq!(session.data.services, vec!["svc-a"]);
    expect_continue(form::handle_callback(&mut session, "select_service:svc-a", cfg));
    assert!(session.data.services.is_empty());

    // Done with nothing selected pops an alert and stays put.
    match form::handle_callback(&mut session, "confirm_service_selection", cfg) {
        Outcome::Alert(text) => assert!(text.contains("至少选择一个服务")),
        other => panic!("expected Alert, got {other:?}"),
    }
    assert_eq!(session.state, FormState::SelectingService);
}

#[test]
fn selected_button_label_gets_check_prefix() {
    let opts = options();
    let cfg = opts.project("EBPAY").unwrap();
    let (mut session, _) = form::start("EBPAY", cfg);
    expect_continue(form::handle_callback(&mut session, "select_env:UAT", cfg));
    expect_continue(form::handle_callback(&mut session, "branch:default", cfg));
    let reply = expect_continue(form::handle_callback(&mut session, "select_service:svc-b", cfg));
    let kb = reply.keyboard.unwrap();
    let labels: Vec<&str> = kb.rows.iter().flatten().map(|(l, _)| l.as_str()).collect();
    assert!(labels.contains(&"✓ svc-b"));
    assert!(labels.contains(&"svc-a"));
}

#[test]
fn env_switch_resets_service_selection() {
    let opts = options();
    let cfg = opts.project("EBPAY").unwrap();
    let (mut session, _) = form::start("EBPAY", cfg);
    expect_continue(form::handle_callback(&mut session, "select_env:UAT", cfg));
    expect_continue(form::handle_callback(&mut session, "branch:default", cfg));
    expect_continue(form::handle_callback(&mut session, "select_service:svc-a", cfg));
    assert_eq!(session.data.services, vec!["svc-a"]);

    // Going back through env selection clears the selection.
    session.state = FormState::SelectingEnv;
    expect_continue(form::handle_callback(&mut session, "select_env:GRAY-UAT", cfg));
    assert!(session.data.services.is_empty());
}

#[test]
fn hash_with_separators_is_rejected() {
    let opts = options();
    let cfg = opts.project("EBPAY").unwrap();
    let (mut session, _) = form::start("EBPAY", cfg);
    expect_continue(form::handle_callback(&mut session, "select_env:UAT", cfg));
    expect_continue(form::handle_callback(&mut session, "branch:default", cfg));
    expect_continue(form::handle_callback(&mut session, "select_service:svc-a", cfg));
    expect_continue(form::handle_callback(&mut session, "confirm_service_selection", cfg));

    for bad in ["aaa,bbb", "aaa，bbb", "aaa、bbb", ""] {
        let reply = expect_continue(form::handle_text(&mut session, bad, cfg));
        assert!(reply.text.starts_with("❌"), "{bad:?} should be rejected");
        assert_eq!(session.state, FormState::InputtingHash);
        assert!(session.data.hashes.is_empty());
    }
    expect_continue(form::handle_text(&mut session, "deadbeef", cfg));
    assert_eq!(session.state, FormState::InputtingContent);
}

#[test]
fn empty_content_is_rejected() {
    let opts = options();
    let cfg = opts.project("EBPAY").unwrap();
    let (mut session, _) = form::start("EBPAY", cfg);
    expect_continue(form::handle_callback(&mut session, "select_env:UAT", cfg));
    expect_continue(form::handle_callback(&mut session, "branch:default", cfg));
    expect_continue(form::handle_callback(&mut session, "select_service:svc-a", cfg));
    expect_continue(form::handle_callback(&mut session, "confirm_service_selection", cfg));
    expect_continue(form::handle_text(&mut session, "abc123", cfg));

    let reply = expect_continue(form::handle_text(&mut session, "   ", cfg));
    assert!(reply.text.contains("不能为空"));
    assert_eq!(session.state, FormState::InputtingContent);
}

#[test]
fn cancel_from_confirm_discards_the_form() {
    let opts = options();
    let cfg = opts.project("EBPAY").unwrap();
    let (mut session, _) = form::start("EBPAY", cfg);
    expect_continue(form::handle_callback(&mut session, "select_env:UAT", cfg));
    expect_continue(form::handle_callback(&mut session, "branch:default", cfg));
    expect_continue(form::handle_callback(&mut session, "select_service:svc-a", cfg));
    expect_continue(form::handle_callback(&mut session, "confirm_service_selection", cfg));
    expect_continue(form::handle_text(&mut session, "abc", cfg));
    expect_continue(form::handle_text(&mut session, "fix", cfg));

    match form::handle_callback(&mut session, "cancel_form", cfg) {
        Outcome::Cancelled(reply) => assert!(reply.text.contains("已取消")),
        other => panic!("expected Cancelled, got {other:?}"),
    }
}

// ── Address-only flow ──────────────────────────────────────────────────────

#[test]
fn address_only_flow_skips_branch_hash_and_content() {
    let opts = options();
    let cfg = opts.project("LINKS").unwrap();

    let (mut session, _) = form::start("LINKS", cfg);
    expect_continue(form::handle_callback(&mut session, "select_env:TRC", cfg));
    assert_eq!(session.state, FormState::InputtingAddress);

    // One address per line; blank lines are dropped.
    expect_continue(form::handle_text(&mut session, "addr1\n\naddr2\n", cfg));
    assert_eq!(session.state, FormState::Confirming);
    assert_eq!(session.data.addresses, vec!["addr1", "addr2"]);
    // Auto-selected from the env's slot in the services mapping: TRC is
    // the first environment, so the mapping's first entry supplies it.
    assert_eq!(session.data.services, vec!["link-node-trc"]);

    let Outcome::Submit {
        submission_data,
        template_type,
        ..
    } = form::handle_callback(&mut session, "confirm_form", cfg)
    else {
        panic!("expected Submit");
    };
    assert_eq!(template_type, TemplateType::AddressOnly);

    // The orchestration parser sees addresses but no deployable services
    // or hashes, so downstream fan-out has nothing to submit.
    let parsed = parse_submission(&submission_data);
    assert_eq!(parsed.addresses, vec!["addr1", "addr2"]);
    assert!(parsed.services.is_empty());
    assert!(parsed.hashes.is_empty());
    assert_eq!(parsed.project.as_deref(), Some("LINKS"));
    assert_eq!(parsed.environment.as_deref(), Some("TRC"));
}

#[test]
fn address_only_rejects_empty_input() {
    let opts = options();
    let cfg = opts.project("LINKS").unwrap();
    let (mut session, _) = form::start("LINKS", cfg);
    expect_continue(form::handle_callback(&mut session, "select_env:TRC", cfg));
    let reply = expect_continue(form::handle_text(&mut session, "  \n  ", cfg));
    assert!(reply.text.contains("地址不能为空"));
    assert_eq!(session.state, FormState::InputtingAddress);
}

#[test]
fn unknown_events_are_ignored() {
    let opts = options();
    let cfg = opts.project("EBPAY").unwrap();
    let (mut session, _) = form::start("EBPAY", cfg);
    assert!(matches!(
        form::handle_callback(&mut session, "select_env:PROD", cfg),
        Outcome::Ignored
    ));
    assert!(matches!(
        form::handle_callback(&mut session, "confirm_form", cfg),
        Outcome::Ignored
    ));
    assert!(matches!(
        form::handle_text(&mut session, "stray text", cfg),
        Outcome::Ignored
    ));
}
