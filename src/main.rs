use std::sync::Arc;

use tracing::info;
use ulid::Ulid;

use teetime::clock;
use teetime::config::Config;
use teetime::engine::{Engine, SlotState};
use teetime::notify::NotifyHub;
use teetime::reconciler::{run_reconciler, watch_resource};
use teetime::remote::{InMemoryRemote, Seed};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    teetime::observability::init(config.metrics_port);

    let seed = match &config.seed {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str::<Seed>(&raw)?
        }
        None => Seed::default(),
    };

    let notify = Arc::new(NotifyHub::new());
    let remote = Arc::new(InMemoryRemote::from_seed(seed).with_hub(notify.clone(), Ulid::new()));
    let engine = Arc::new(Engine::new(remote, notify, config.clone()));
    engine.refresh().await?;

    let hours = config.business_hours();
    info!("teetime scheduler started");
    info!("  business day: {hours}, {} minute slots", config.slot_minutes);
    info!("  staff: {}", config.staff);
    info!("  seed: {}", config.seed.as_ref().map_or("none".to_string(), |p| p.display().to_string()));
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let today = chrono::Local::now().date_naive();
    let resources = engine.resources().await;
    for row in engine.grid(today).await {
        let cells: Vec<String> = row
            .cells
            .iter()
            .map(|(rid, state)| {
                let name = resources
                    .iter()
                    .find(|r| r.id == *rid)
                    .map_or_else(|| rid.to_string(), |r| r.name.clone());
                let state = match state {
                    SlotState::Closed { title } => format!("closed ({title})"),
                    SlotState::Blocked { label } => format!("blocked ({label})"),
                    SlotState::Booked { member, .. } => format!("booked ({member})"),
                    SlotState::Free => "free".to_string(),
                };
                format!("{name}: {state}")
            })
            .collect();
        info!("{} {}", clock::format_clock(row.slot.start), cells.join(" | "));
    }
    info!("  pending requests: {}", engine.requests().await.len());
    info!("  unmatched bookings: {}", engine.unmatched().await.len());

    let reconciler = tokio::spawn(run_reconciler(engine.clone(), config.refresh_interval()));
    let watchers: Vec<_> = resources
        .into_iter()
        .map(|r| {
            let events = engine.notify.subscribe(r.id);
            tokio::spawn(watch_resource(r, events))
        })
        .collect();

    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("shutdown signal received");
    reconciler.abort();
    for w in watchers {
        w.abort();
    }
    info!("teetime stopped");
    Ok(())
}
