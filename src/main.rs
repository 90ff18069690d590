// ABOUTME: Process entrypoint: load config, open durable stores, reconcile, wire the pipeline
// ABOUTME: Exit codes: 0 normal shutdown, 2 config error, 3 multiplexer unavailable, else internal

use anyhow::Result;
use std::process::ExitCode;
use std::sync::Arc;
use termbot::dispatcher::Dispatcher;
use termbot::edit::EditSessionManager;
use termbot::locks::PerUserLocks;
use termbot::scheduler::OutputScheduler;
use termbot::terminal::MultiplexerDriver;
use termbot::transport::TelegramTransport;
use termbot_core::audit::AuditLog;
use termbot_core::auth::{AuthManager, LockoutConfig};
use termbot_core::config::Config;
use termbot_core::model::WhitelistEntry;
use termbot_core::policy::CommandPolicy;
use termbot_core::prompt_rules::PromptRuleEngine;
use termbot_core::registry::TagSessionRegistry;
use termbot_core::traits::ChatTransport;
use termbot_core::user_state::UserStateStore;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return ExitCode::from(2);
        }
    };

    let _log_guard = termbot::logging::init(&config.logging.level);
    tracing::info!("starting termbot");

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            ExitCode::from(1)
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let driver: Arc<dyn termbot_core::traits::TerminalDriver> = Arc::new(MultiplexerDriver::new(
        "tmux",
        config.tmux.width,
        config.tmux.height,
    ));

    let registry = Arc::new(TagSessionRegistry::load(&config.paths.tag_registry_path)?);
    let user_states = Arc::new(UserStateStore::load(&config.paths.state_path)?);

    tracing::info!("reconciling tag registry against live sessions");
    let report = registry.reconcile(&BlockingDriver(driver.clone()), true)?;
    if !report.broken.is_empty() {
        tracing::warn!(broken = ?report.broken, "tabs could not be reconciled");
    }
    if !report.orphans.is_empty() {
        tracing::warn!(orphans = ?report.orphans, "orphan sessions found, not deleted");
    }
    let live_tab_ids: std::collections::HashSet<String> = registry
        .all_tab_ids()
        .into_iter()
        .filter(|id| !report.broken.contains(id))
        .collect();
    user_states.clear_dangling_active_tabs(&live_tab_ids)?;

    let whitelist: Vec<WhitelistEntry> = config
        .whitelist_keys
        .iter()
        .map(|w| WhitelistEntry {
            user_id: w.user_id.clone(),
            access_key: w.access_key.clone(),
            server_ip: w.server_ip.clone(),
            expires_at: w.expires_at,
            admin: w.admin,
        })
        .collect();
    let auth = Arc::new(AuthManager::new(
        whitelist,
        LockoutConfig {
            max_failures: config.auth.max_failures,
            failure_window_seconds: config.auth.failure_window_seconds,
            lockout_seconds: config.auth.lockout_seconds,
        },
    ));

    let policy = Arc::new(CommandPolicy::new(
        config.command_policy.max_length,
        &config.command_policy.blocked_patterns,
        &config.command_policy.allowed_patterns,
        config.command_policy.require_allowlist,
    )?);

    let prompt_rules = load_prompt_rules(&config.paths.prompt_rules_path)?;
    let rule_engine = Arc::new(PromptRuleEngine::compile(&prompt_rules, true, true)?);

    let edit_root = std::path::Path::new(&config.paths.state_path)
        .parent()
        .unwrap_or_else(|| std::path::Path::new("."))
        .to_path_buf();
    let edit_manager = Arc::new(EditSessionManager::new(edit_root));

    let audit = Arc::new(AuditLog::open(&config.logging.audit_log_path));
    let locks = Arc::new(PerUserLocks::new());

    let transport: Arc<dyn ChatTransport> = Arc::new(
        TelegramTransport::new(&config.telegram.bot_token, config.telegram.poll_timeout_secs).await?,
    );

    let scheduler = Arc::new(OutputScheduler::new(
        driver.clone(),
        transport.clone(),
        user_states.clone(),
        rule_engine,
        locks.clone(),
        config.tmux.scrollback,
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        auth,
        user_states,
        registry,
        policy,
        edit_manager,
        driver,
        transport.clone(),
        scheduler,
        audit,
        locks,
    ));

    tracing::info!("ready, polling for updates");
    let shutdown_grace = std::time::Duration::from_secs(config.server.shutdown_grace_seconds);

    let in_flight = Arc::new(tokio::sync::Mutex::new(tokio::task::JoinSet::new()));

    let poll_loop = {
        let dispatcher = dispatcher.clone();
        let transport = transport.clone();
        let in_flight = in_flight.clone();
        tokio::spawn(async move {
            loop {
                match transport.next_update().await {
                    Ok(update) => {
                        let dispatcher = dispatcher.clone();
                        in_flight
                            .lock()
                            .await
                            .spawn(async move { dispatcher.handle(update).await });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to fetch next update");
                    }
                }
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining in-flight work");
    poll_loop.abort();

    let mut set = in_flight.lock().await;
    let drained = tokio::time::timeout(shutdown_grace, async {
        while set.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            remaining = set.len(),
            "shutdown grace period elapsed with work still in flight"
        );
    }
    tracing::info!("shutdown complete");
    Ok(())
}

fn load_prompt_rules(path: &str) -> Result<Vec<termbot_core::model::PromptRule>> {
    if !std::path::Path::new(path).exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Bridges the async `TerminalDriver` to the synchronous `SessionLister`
/// the registry's one-time startup reconciliation expects. Safe only off
/// the async call path that drives the bot's event loop, which is why this
/// bridge is used once at startup and nowhere else.
struct BlockingDriver(Arc<dyn termbot_core::traits::TerminalDriver>);

impl termbot_core::registry::SessionLister for BlockingDriver {
    fn list_sessions(&self) -> Result<Vec<String>> {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.0.list_sessions())
        })
    }

    fn create_session(&self, tab_id: &str) -> Result<()> {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.0.create_session(tab_id))
        })
    }
}
