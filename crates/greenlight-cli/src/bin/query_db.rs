//! Print the project options document currently stored in the database.

use std::process::exit;

use greenlight_core::db::Db;

const DB_PATH: &str = "data/workflows.db";

fn run() -> anyhow::Result<()> {
    let db = Db::open(DB_PATH)?;
    db.migrate()?;

    match db.get_project_options_raw()? {
        Some(raw) => {
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            println!("✅ project options present in the store:");
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        None => {
            println!("❌ no project options in the store");
            println!("hint: run the init_db tool to import config/options.json");
        }
    }
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("❌ query failed: {e:#}");
        exit(1);
    }
}
