//! Write the bot token into app config.
//!
//! Usage: update_token <BOT_TOKEN>

use std::process::exit;

use greenlight_core::db::Db;

const DB_PATH: &str = "data/workflows.db";

fn run(token: &str) -> anyhow::Result<()> {
    let db = Db::open(DB_PATH)?;
    db.migrate()?;
    db.set_app_config("BOT_TOKEN", token)?;

    // Read back so the operator sees what the bot will actually use.
    let stored = db.get_app_config("BOT_TOKEN", "");
    if stored == token {
        println!("✅ BOT_TOKEN updated");
        let prefix: String = token.chars().take(10).collect();
        println!("   token prefix: {prefix}...");
    } else {
        anyhow::bail!("token readback mismatch");
    }
    Ok(())
}

fn main() {
    let Some(token) = std::env::args().nth(1).filter(|t| !t.is_empty()) else {
        eprintln!("用法: update_token <BOT_TOKEN>");
        eprintln!("示例: update_token 1234567890:ABCdefGHIjklMNOpqrsTUVwxyz");
        exit(1);
    };
    if let Err(e) = run(&token) {
        eprintln!("❌ update failed: {e:#}");
        exit(1);
    }
}
