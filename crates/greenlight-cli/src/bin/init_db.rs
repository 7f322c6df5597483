//! Initialise the embedded store: create tables and indexes, seed default
//! app config and message templates, and import the project options
//! document. Safe to re-run; pass --force to re-import options over an
//! existing document.

use std::path::Path;
use std::process::exit;

use greenlight_core::db::Db;

const DB_PATH: &str = "data/workflows.db";
const OPTIONS_PATH: &str = "config/options.json";

/// Seeded only when absent so re-runs never clobber operator edits.
const DEFAULT_APP_CONFIG: [(&str, &str); 12] = [
    ("BOT_TOKEN", ""),
    ("APPROVER_USERNAME", ""),
    ("APPROVER_USER_ID", "0"),
    ("API_ENDPOINT", "/workflows/sync"),
    ("API_TIMEOUT", "30"),
    ("CONNECTION_POOL_SIZE", "50"),
    ("HTTP_READ_TIMEOUT", "30"),
    ("HTTP_WRITE_TIMEOUT", "10"),
    ("HTTP_CONNECT_TIMEOUT", "10"),
    ("SSO_ENABLED", "false"),
    ("LOG_LEVEL", "info"),
    ("LOG_FILE", "logs/bot.log"),
];

fn run(force: bool) -> anyhow::Result<()> {
    println!("initialising store at {DB_PATH}...");
    let db = Db::open(DB_PATH)?;
    db.migrate()?;
    println!("✅ tables and indexes are in place");

    db.seed_default_templates()?;
    println!("✅ default message templates seeded");

    let mut seeded = 0;
    for (key, value) in DEFAULT_APP_CONFIG {
        if db.get_app_config_opt(key).is_none() {
            db.set_app_config(key, value)?;
            seeded += 1;
        }
    }
    println!("✅ app config ready ({seeded} key(s) newly seeded)");

    let have_options = db.get_project_options_raw()?.is_some();
    if have_options && !force {
        println!("project options already present, skipping import (use --force to overwrite)");
    } else if Path::new(OPTIONS_PATH).exists() {
        let json = std::fs::read_to_string(OPTIONS_PATH)?;
        db.update_project_options_raw(&json)?;
        let options = greenlight_core::options::ProjectOptions::parse(&json)?;
        println!(
            "✅ imported {OPTIONS_PATH}: {} project(s)",
            options.projects.len()
        );
        for (name, cfg) in &options.projects {
            println!(
                "   - {name}: /{} ({} env(s), {} group(s))",
                cfg.command_name(),
                cfg.environments.len(),
                cfg.group_ids.len()
            );
        }
    } else if !have_options {
        println!("⚠️ {OPTIONS_PATH} not found and no options in the store yet;");
        println!("   create it and re-run this tool before starting the bot");
    }

    if db.get_app_config("BOT_TOKEN", "").is_empty() {
        println!("⚠️ BOT_TOKEN is empty; set it with the update_token tool");
    }

    println!("done");
    Ok(())
}

fn main() {
    let force = std::env::args().any(|a| a == "--force");
    if let Err(e) = run(force) {
        eprintln!("❌ init failed: {e:#}");
        exit(1);
    }
}
