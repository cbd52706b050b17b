//! login-push-worker: pushes the login QR code until the user logs in.
//!
//! Hosts the monitored page, rebuilding the scheduler on every reload, and
//! watches the cookie jar so a login stops all further pushes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use loginpush_core::config::{load_dotenv, Config};
use loginpush_core::InstanceId;
use loginpush_notify::{
    Dispatcher, FileArtifactSource, PushPlusNotifier, QrPushDispatcher, WebhookNotifier,
};
use loginpush_scheduler::{
    ChannelReloadRequester, Collaborators, CookieFileOracle, FileFlagStore, FlagStore, HostEvent,
    LoginOracle, MemoryFlagStore, PageHost, SequenceStore, SharedConfig, SystemWallClock,
    TracingReporter,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Login push worker: schedules QR code pushes until a login is detected.
#[derive(Parser, Debug)]
#[command(name = "login-push-worker", version, about)]
struct Cli {
    /// Config profile (looks up `{PROFILE}_{KEY}` before `{KEY}`).
    #[arg(long, env = "LOGINPUSH_PROFILE", default_value = "")]
    profile: String,

    /// Keep sequence state and push history on disk so they survive a
    /// worker restart. Implies `--keep-state`.
    #[arg(long, env = "LOGINPUSH_PERSIST")]
    persist: bool,

    /// Leave the instance state directory behind on shutdown.
    #[arg(long)]
    keep_state: bool,

    /// Push the QR code once right after start.
    #[arg(long)]
    push_now: bool,

    /// Send a test notification through channel N and exit.
    #[arg(long, value_name = "N")]
    test_channel: Option<usize>,

    /// Cookie jar polling interval in seconds.
    #[arg(long, env = "LOGIN_POLL_INTERVAL", default_value_t = 30)]
    login_poll_secs: u64,

    /// Companion app deep link used in the reminder.
    #[arg(long, env = "LOGINPUSH_APP_SCHEME")]
    app_scheme: Option<String>,
}

impl Cli {
    /// State written with `--persist` survives a clean exit.
    fn removes_state_on_exit(&self) -> bool {
        !(self.keep_state || self.persist)
    }
}

// ── Wiring ──────────────────────────────────────────────────────────

/// PushPlus reads its token from `shared` on every send, so a token saved
/// later is used without rebuilding the channel.
fn build_dispatcher(config: &Config, shared: &SharedConfig) -> Dispatcher {
    let mut dispatcher = Dispatcher::empty();

    if config.schedule.token().is_none() {
        warn!("no PUSHPLUS_TOKEN configured, pushing is disabled until one is saved");
    }
    match PushPlusNotifier::with_token_source(
        &config.push.pushplus_endpoint,
        Arc::new(shared.clone()),
    ) {
        Ok(pushplus) => dispatcher.push_channel(Box::new(pushplus)),
        Err(e) => warn!(error = %e, "pushplus channel disabled"),
    }

    if let Some(url) = &config.push.webhook_url {
        let headers = HashMap::from([("User-Agent".to_string(), "login-push-worker".to_string())]);
        match WebhookNotifier::from_config(url, None, Some(headers)) {
            Ok(webhook) => dispatcher.push_channel(Box::new(webhook)),
            Err(e) => warn!(error = %e, "webhook channel disabled"),
        }
    }

    info!(channels = dispatcher.channel_count(), "push channels ready");
    dispatcher
}

/// Hand an event to the page host, warning if it has already stopped.
fn queue(events: &mpsc::UnboundedSender<HostEvent>, event: HostEvent) -> bool {
    match events.send(event) {
        Ok(()) => true,
        Err(e) => {
            warn!(event = ?e.0, "page host stopped, event dropped");
            false
        }
    }
}

/// Edge-triggered login watch: reports the first login it sees, then keeps
/// quiet until the jar is cleared again.
async fn watch_login(
    oracle: Arc<dyn LoginOracle>,
    events: mpsc::UnboundedSender<HostEvent>,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    let mut was_logged_in = oracle.is_logged_in();
    loop {
        ticker.tick().await;
        let logged_in = oracle.is_logged_in();
        if logged_in && !was_logged_in {
            info!("login detected in cookie jar");
            if events.send(HostEvent::LoginDetected).is_err() {
                break;
            }
        }
        was_logged_in = logged_in;
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = Config::for_profile(&cli.profile);
    config.log_summary();

    let shared = SharedConfig::new(config.schedule.clone());
    let mut qr = QrPushDispatcher::new(
        Arc::new(FileArtifactSource::new(&config.push.artifact_path)),
        build_dispatcher(&config, &shared),
    );
    if let Some(scheme) = &cli.app_scheme {
        qr = qr.with_app_scheme(scheme.clone());
    }

    if let Some(index) = cli.test_channel {
        qr.dispatcher().test_channel(index).await?;
        info!(index, "test notification sent");
        return Ok(());
    }

    let base_dir = config.storage.state_dir.clone();
    let instance = InstanceId::load_or_create(&base_dir);
    let flags: Arc<dyn FlagStore> = if cli.persist {
        let path = instance.state_dir(&base_dir).join("flags.json");
        info!(instance = %instance, path = %path.display(), "using on-disk flag store");
        Arc::new(FileFlagStore::open(path))
    } else {
        info!(instance = %instance, "using in-memory flag store");
        Arc::new(MemoryFlagStore::new())
    };
    let store = SequenceStore::new(flags, config.sequence.max_short_term_push);

    let oracle: Arc<dyn LoginOracle> = Arc::new(CookieFileOracle::new(&config.page.cookie_path));
    let (reload, reloads) = ChannelReloadRequester::new();
    let collab = Collaborators {
        oracle: oracle.clone(),
        dispatcher: Arc::new(qr),
        reload: Arc::new(reload),
        reporter: Arc::new(TracingReporter),
        config: Arc::new(shared.clone()),
        wall_clock: Arc::new(SystemWallClock),
    };

    let (host, events) = PageHost::new(collab, store, shared, reloads);
    let host = host
        .with_policy(config.sequence)
        .with_page(&config.page.login_url, &config.page.marker);
    let host_task = tokio::spawn(host.run());

    let watcher = tokio::spawn(watch_login(
        oracle,
        events.clone(),
        Duration::from_secs(cli.login_poll_secs.max(1)),
    ));

    if cli.push_now {
        queue(&events, HostEvent::ManualPush);
    }

    info!("login-push-worker running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    watcher.abort();
    queue(&events, HostEvent::Shutdown);
    let summary = host_task.await?;
    info!(reloads = summary.reloads, "login-push-worker exited cleanly");

    if cli.removes_state_on_exit() {
        if let Err(e) = instance.cleanup(&base_dir) {
            warn!(error = %e, "failed to remove instance state");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persist_keeps_state_across_clean_exit() {
        let cli = Cli::parse_from(["login-push-worker", "--persist"]);
        assert!(!cli.removes_state_on_exit());

        let cli = Cli::parse_from(["login-push-worker", "--keep-state"]);
        assert!(!cli.removes_state_on_exit());
    }

    #[test]
    fn queue_reports_a_stopped_host() {
        let (events, rx) = mpsc::unbounded_channel();
        assert!(queue(&events, HostEvent::ManualPush));
        drop(rx);
        assert!(!queue(&events, HostEvent::ManualPush));
    }

    #[test]
    fn ephemeral_run_cleans_up() {
        let cli = Cli::parse_from(["login-push-worker"]);
        assert!(cli.removes_state_on_exit());
    }
}
