mod activity;
mod actuator;
mod clock;
mod config;
mod error;
mod evaluator;
mod history;
mod policy;
mod push;
mod readings;
mod registry;
mod sampler;
mod store;
mod valve;
mod web;
mod zone;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::{env, sync::Arc};
use time::UtcOffset;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use activity::{ActivityLog, EventKind};
use actuator::Actuator;
use clock::SystemClock;
use evaluator::Evaluator;
use history::History;
use push::{BroadcastPublisher, Fanout, MqttPublisher, Publisher};
use registry::ZoneRegistry;
use sampler::Sampler;
use store::ZoneStore;
use valve::ValveBoard;

/// Capacity of the in-process push channel feeding SSE clients.
const PUSH_CAPACITY: usize = 64;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // The local offset can only be read safely while the process is still
    // single-threaded.
    let offset = UtcOffset::current_local_offset().unwrap_or_else(|e| {
        warn!("cannot determine local UTC offset ({e}), using UTC");
        UtcOffset::UTC
    });

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(run(offset))
}

async fn run(offset: UtcOffset) -> Result<()> {
    // ── Env config ──────────────────────────────────────────────────
    let config_path =
        PathBuf::from(env::var("CONFIG_PATH").unwrap_or_else(|_| "controller.toml".to_string()));
    let web_port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let settings = config::load(&config_path)?;

    // ── Valve board ─────────────────────────────────────────────────
    let valves = Arc::new(ValveBoard::new(&settings.valve_pins(), settings.relay_active_low)?);
    valves.all_off();

    // ── Zones ───────────────────────────────────────────────────────
    let store = ZoneStore::new(&settings.zones_file);
    let zones_path = store.path().display().to_string();
    let registry = Arc::new(ZoneRegistry::load(store, valves.valve_ids()));
    let zone_count = registry.snapshot().await.zones.len();
    if zone_count == 0 {
        warn!(path = %zones_path, "no zones configured");
    } else {
        info!(path = %zones_path, zones = zone_count, "zones loaded");
    }

    // ── History (best-effort) ───────────────────────────────────────
    let history = match open_history(&settings.history_db).await {
        Ok(h) => Some(h),
        Err(e) => {
            error!("watering history disabled: {e:#}");
            None
        }
    };

    // ── Shared state ────────────────────────────────────────────────
    let activity = ActivityLog::shared();
    activity
        .write()
        .await
        .record(EventKind::System, format!("controller started ({zone_count} zones)"));
    let (readings_tx, readings_rx) = readings::channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Push ────────────────────────────────────────────────────────
    let events = BroadcastPublisher::new(PUSH_CAPACITY);
    let mut fanout = Fanout::default().with(Arc::new(events.clone()));
    if let Ok(host) = env::var("MQTT_HOST") {
        let port: u16 = env::var("MQTT_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1883);
        let prefix = env::var("MQTT_TOPIC_PREFIX").unwrap_or_else(|_| "irrigation".to_string());
        let (mqtt, eventloop) = MqttPublisher::new(&host, port, &prefix);
        info!(%host, port, %prefix, "mqtt push enabled");
        fanout = fanout.with(Arc::new(mqtt));
        tokio::spawn(push::run_mqtt_loop(eventloop));
    }
    let publisher: Arc<dyn Publisher> = Arc::new(fanout);

    // ── Sensor sampler ──────────────────────────────────────────────
    #[cfg(feature = "i2c")]
    let reader =
        irrigation_sensors::Pcf8591::open(settings.adc.i2c_bus, settings.adc.i2c_address)?;
    #[cfg(not(feature = "i2c"))]
    let reader = irrigation_sensors::SimulatedAdc::new(settings.calibration());

    let sampler = Sampler::new(
        reader,
        settings.calibration(),
        settings.sensor_channels()?,
        settings.temperature_channel()?,
        readings_tx,
        publisher,
        Arc::clone(&activity),
        settings.sample_interval(),
    );
    let sampler_task = tokio::spawn(sampler.run(shutdown_rx.clone()));

    // ── Evaluator ───────────────────────────────────────────────────
    let actuator = Arc::new(Actuator::new(
        Arc::clone(&valves),
        readings_rx.clone(),
        settings.actuator(),
    ));
    let mut evaluator = Evaluator::new(
        Arc::clone(&registry),
        actuator,
        readings_rx.clone(),
        Arc::new(SystemClock::new(offset)),
        Arc::clone(&activity),
        settings.evaluate_interval(),
    );
    if let Some(h) = &history {
        evaluator = evaluator.with_history(h.clone());
    }
    let evaluator_task = tokio::spawn(evaluator.run(shutdown_rx.clone()));

    // ── Web server ──────────────────────────────────────────────────
    let web_state = web::AppState {
        registry,
        valves: Arc::clone(&valves),
        readings: readings_rx,
        activity,
        events,
        history,
    };
    let web_shutdown = shutdown_rx.clone();
    let web_task = tokio::spawn(async move {
        if let Err(e) = web::serve(web_state, web_port, web_shutdown).await {
            error!("web server error: {e:#}");
        }
    });

    // ── Wait for shutdown ───────────────────────────────────────────
    wait_for_signal().await;
    info!("shutting down");
    let _ = shutdown_tx.send(true);

    for (name, task) in [
        ("sampler", sampler_task),
        ("evaluator", evaluator_task),
        ("web", web_task),
    ] {
        if let Err(e) = task.await {
            error!(task = name, "task ended abnormally: {e}");
        }
    }

    // Manually opened valves are closed here too.
    valves.all_off();
    info!("all valves off, bye");
    Ok(())
}

async fn open_history(db_url: &str) -> Result<History> {
    let history = History::connect(db_url).await?;
    history.migrate().await?;
    Ok(history)
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            Err(e) => warn!("failed to register SIGTERM handler: {e}"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {e}");
    }
}
