use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

mod app;
mod autoprompt_runner;
mod http;
mod usage;
mod util;
mod ws;

use guenther_agent::AgentRuntime;
use guenther_core::agents::AgentStore;
use guenther_core::config::{ServerConfig, SettingsStore};
use guenther_core::log::TerminalLog;
use guenther_core::webhooks::WebhookStore;
use guenther_provider::ProviderClient;
use guenther_scheduler::{AutopromptStore, SchedulerEngine};
use guenther_store::{ChatStore, FileStore, ImageBlobStore, TelegramUserMap};
use guenther_tools::builtin::register_builtin_tools;
use guenther_tools::custom::load_custom_tools;
use guenther_tools::external::ExternalToolManager;
use guenther_tools::ToolRegistry;

#[derive(Parser)]
#[command(name = "guenther-server", about = "Self-hosted multi-channel LLM agent server")]
struct Args {
    /// Path to guenther.toml (default: ~/.guenther/guenther.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guenther_server=info,tower_http=warn".into()),
        )
        .init();

    let args = Args::parse();
    let config = ServerConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({e}), using defaults");
        ServerConfig::default()
    });

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // File-backed stores.
    let settings = SettingsStore::new(&data_dir);
    let agents = AgentStore::new(&data_dir);
    let webhooks = WebhookStore::new(&data_dir);
    let autoprompts = AutopromptStore::new(&data_dir);
    let chats = Arc::new(ChatStore::open(&data_dir.join("guenther.db"))?);
    let files = Arc::new(FileStore::new(&data_dir));

    // Tool registry: built-ins first, then custom tools from the data root.
    let registry = Arc::new(ToolRegistry::new());
    register_builtin_tools(&registry);
    load_custom_tools(&registry, &data_dir, None);

    // Provider client with usage accounting.
    let llm = Arc::new(
        ProviderClient::new()
            .with_usage_recorder(Arc::new(usage::UsageLogRecorder::new(Arc::clone(&chats)))),
    );

    let blobs = Arc::new(ImageBlobStore::new());
    let tg_users = Arc::new(TelegramUserMap::new(&data_dir));
    let agent = Arc::new(AgentRuntime::new(
        Arc::clone(&registry),
        Arc::clone(&llm),
        Arc::clone(&blobs),
        Arc::clone(&tg_users),
        data_dir.clone(),
    ));

    let terminal = Arc::new(TerminalLog::new());

    // External tool servers from settings.json.
    let external = Arc::new(ExternalToolManager::new());
    {
        let servers = settings.load().mcp_servers;
        if !servers.is_empty() {
            external.reload(&registry, &servers, &terminal.sink()).await;
        }
    }

    // Scheduler engine + runner.
    let (fired_tx, fired_rx) = tokio::sync::mpsc::channel(32);
    let (engine, scheduler) = SchedulerEngine::new(autoprompts.clone(), fired_tx);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(engine.run(shutdown_rx.clone()));

    let state = Arc::new(app::AppState {
        config: config.clone(),
        settings: settings.clone(),
        agents,
        webhooks,
        autoprompts,
        chats: Arc::clone(&chats),
        files: Arc::clone(&files),
        agent: Arc::clone(&agent),
        terminal,
        external,
        scheduler,
        ws_clients: dashmap::DashMap::new(),
    });

    autoprompt_runner::spawn(Arc::clone(&state), fired_rx);

    // Telegram gateway, if a bot token is configured.
    {
        let telegram = settings.load().telegram;
        if !telegram.bot_token.trim().is_empty() {
            let poller = Arc::new(guenther_telegram::GatewayPoller::new(
                telegram.bot_token.trim(),
                Arc::clone(&agent),
                Arc::clone(&chats),
                Arc::clone(&files),
                settings.clone(),
                state.log_sink(),
                state.event_sink(),
            ));
            tokio::spawn(poller.run(shutdown_rx.clone()));
            info!("Telegram gateway started");
        }
    }

    let router = app::build_router(Arc::clone(&state));
    let addr: SocketAddr = format!("{}:{}", config.bind, config.port).parse()?;
    info!("Guenther server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            let _ = shutdown_tx.send(true);
            info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
