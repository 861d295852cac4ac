/**
 * WAKEWARD KERNEL - entry point of the LAN power panel
 *
 * ROLE : wire config, policy store, leaves (ping, WoL, SSH) and the
 * control panel, then serve the HTTP API.
 *
 * A `scheduled_off_time` left over from a previous run is shown as-is;
 * no timer is re-armed for it.
 */

mod activity;
mod config;
mod control;
mod diagnostics;
mod http;
mod models;
mod orchestrator;
mod policy;
mod power;
mod probe;
mod reconcile;
mod scheduler;
mod state;
mod wol;

#[cfg(test)]
mod testing;

use crate::activity::{ActivityLog, JsonlActivityLog};
use crate::config::{load_config, JsonConfigFile, Settings};
use crate::control::ControlPanel;
use crate::http::AppState;
use crate::models::ActivityResult;
use crate::orchestrator::{WakeOrchestrator, WakeTiming};
use crate::policy::{Clock, SystemClock};
use crate::power::SshPowerOff;
use crate::probe::{PingProber, Prober};
use crate::reconcile::Reconciler;
use crate::scheduler::DelayedOffScheduler;
use crate::state::PolicyStore;
use crate::wol::UdpWakeSignaler;

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();
    let settings = Settings::from_env();

    let _log_guard = diagnostics::init_tracing(&settings.log_dir).context("failed to initialise logging")?;
    info!("application starting up");

    let backend = JsonConfigFile::new(&settings.config_path);
    let cfg = load_config(&backend);
    if cfg.policy.scheduled_off_time.is_some() {
        info!("persisted scheduled_off_time found; it will not fire in this process");
    }
    let wol_port = cfg.wol_port;
    let store = Arc::new(PolicyStore::new(cfg, Box::new(backend)));

    let activity = Arc::new(JsonlActivityLog::new(settings.log_dir.join("activity.jsonl")));
    let activity_dyn: Arc<dyn ActivityLog> = activity.clone();
    let prober: Arc<dyn Prober> = Arc::new(PingProber::default());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let reconciler = Reconciler::new(store.clone(), prober.clone(), activity_dyn.clone());
    let orchestrator = WakeOrchestrator::new(
        store.clone(),
        Arc::new(UdpWakeSignaler::new(wol_port)),
        prober,
        activity_dyn.clone(),
        WakeTiming::default(),
    );
    let scheduler = DelayedOffScheduler::new(store.clone(), activity_dyn.clone(), clock.clone());
    let panel = ControlPanel::new(
        store,
        Arc::new(SshPowerOff::default()),
        activity_dyn.clone(),
        clock,
        reconciler,
        orchestrator,
        scheduler,
    )
    .with_ssh_passphrase(settings.ssh_key_passphrase.clone());

    let app_state = AppState {
        panel,
        activity,
        system_log: diagnostics::system_log_path(&settings.log_dir),
        api_key: settings.api_key.clone(),
    };
    let app = http::build_router(app_state);

    activity_dyn.record("startup", ActivityResult::Success, "Application initialized");

    let listener = TcpListener::bind(&settings.bind)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind))?;
    info!("listening on http://{}", settings.bind);
    axum::serve(listener, app).await?;
    Ok(())
}
