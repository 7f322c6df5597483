//! Workflow statistics and a recent listing, or full detail for one id.
//!
//! Usage: query_workflows [workflow_id]

use std::process::exit;

use greenlight_core::db::Db;

const DB_PATH: &str = "data/workflows.db";

fn run(workflow_id: Option<&str>) -> anyhow::Result<()> {
    let db = Db::open(DB_PATH)?;
    db.migrate()?;

    let (total, pending, approved, rejected) = db.workflow_stats()?;
    println!("📊 统计信息:");
    println!("  - 总工作流数: {total}");
    println!("  - 待审批: {pending}");
    println!("  - 已通过: {approved}");
    println!("  - 已拒绝: {rejected}");

    println!("\n📋 最近的工作流（最多10条）:");
    let recent = db.list_workflows(10, 0, None, None)?;
    if recent.is_empty() {
        println!("  (暂无工作流数据)");
    }
    for (i, w) in recent.iter().enumerate() {
        println!("\n{}. 工作流ID: {}", i + 1, w.workflow_id);
        println!("   提交人: @{}", w.username);
        println!("   状态: {}", w.status.as_str());
        if let Some(approver) = &w.approver_username {
            println!("   审批人: @{approver}");
        }
        println!("   创建时间: {}", w.created_at);
        if let Some(approval_time) = &w.approval_time {
            println!("   审批时间: {approval_time}");
        }
    }

    if let Some(workflow_id) = workflow_id {
        println!("\n🔍 工作流详情: {workflow_id}");
        match db.get_workflow(workflow_id)? {
            Some(w) => println!("{}", serde_json::to_string_pretty(&w)?),
            None => {
                println!("❌ 工作流 {workflow_id} 不存在");
                exit(1);
            }
        }
    }
    Ok(())
}

fn main() {
    let arg = std::env::args().nth(1);
    if let Err(e) = run(arg.as_deref()) {
        eprintln!("❌ query failed: {e:#}");
        exit(1);
    }
}
