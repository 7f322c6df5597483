mod approval;
mod handlers;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use greenlight_core::config::ConfigService;
use greenlight_core::db::Db;
use greenlight_core::options::ProjectOptions;
use greenlight_core::proxy;
use greenlight_core::telegram::Telegram;

use handlers::App;

const DB_PATH: &str = "data/workflows.db";

#[tokio::main]
async fn main() -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    // The store comes up first: config and log settings live in it.
    let db = Arc::new(Db::open(DB_PATH)?);
    db.migrate()?;
    db.seed_default_templates()?;
    let config = ConfigService::new(Arc::clone(&db));

    // Console plus a rolling file under logs/; RUST_LOG overrides the
    // stored LOG_LEVEL.
    let log_file = config.log_file();
    let log_path = std::path::Path::new(&log_file);
    let log_dir = log_path.parent().filter(|p| !p.as_os_str().is_empty());
    let file_name = log_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("bot.log");
    let appender = tracing_appender::rolling::daily(
        log_dir.unwrap_or_else(|| std::path::Path::new("logs")),
        file_name,
    );
    let (file_writer, _log_guard) = tracing_appender::non_blocking(appender);

    let level = config.log_level().to_lowercase();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "greenlight_server={level},greenlight_core={level},greenlight_ops={level}"
        ))
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    if let Err(e) = config.validate() {
        tracing::error!("configuration invalid: {e:#}");
        tracing::error!("run the init_db tool to initialise the store and import options");
        return Err(e);
    }

    // Chat transport with pool sizing, timeouts and the global proxy.
    let tg = Telegram::new(
        config.bot_token(),
        config.connection_pool_size(),
        Duration::from_secs(config.http_read_timeout_secs()),
        Duration::from_secs(config.http_connect_timeout_secs()),
        proxy::from_global(&config).as_deref(),
    )?;
    let bot_username = tg.get_me().await.context("could not reach the chat API")?;
    info!("bot connected: @{bot_username}");

    // One entry command per configured project, plus the fixed ones.
    let options = ProjectOptions::load(&db)?;
    let mut commands: Vec<(String, String)> = vec![
        ("start".to_string(), "开始使用Bot".to_string()),
        ("cancel".to_string(), "取消当前操作".to_string()),
    ];
    for (name, cfg) in &options.projects {
        commands.push((
            cfg.command_name().to_string(),
            format!("申请 {name} 服务发版"),
        ));
    }
    if let Err(e) = tg.set_my_commands(&commands).await {
        warn!("failed to register command list: {e:#}");
    }
    info!(
        "registered {} project entry command(s): {}",
        options.projects.len(),
        options
            .projects
            .values()
            .map(|c| format!("/{}", c.command_name()))
            .collect::<Vec<_>>()
            .join(" ")
    );

    let app = Arc::new(App {
        db,
        tg: Arc::new(tg),
        config,
        sessions: Mutex::new(HashMap::new()),
    });

    info!("greenlight started, polling for updates (Ctrl+C to stop)");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested, stopping poll loop");
                break;
            }
            updates = app.tg.get_updates() => match updates {
                Ok(updates) => {
                    for update in updates {
                        handlers::handle_update(&app, update).await;
                    }
                }
                Err(e) => {
                    warn!("update poll failed: {e:#}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    }

    Ok(())
}
