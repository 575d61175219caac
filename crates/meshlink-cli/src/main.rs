//! `meshlink` – headless MeshLink host.
//!
//! This binary runs the spatial bridge without a headset attached. It:
//!
//! 1. Loads `~/.meshlink/config.toml` (defaults plus `MESHLINK_*` env
//!    overrides when absent). `meshlink init` writes the defaults to disk.
//! 2. Serves the rosbridge-style WebSocket endpoint on `ws_port`, so remote
//!    nodes can subscribe to mesh updates and publish detection batches.
//! 3. Ticks the overlay renderer at `frame_rate_hz`; overlays are logged via
//!    [`surface::LogSurface`].
//! 4. Intercepts **Ctrl-C** to publish a shutdown alert and exit cleanly.

mod config;
mod surface;

use colored::Colorize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, info_span, warn};

use meshlink_bridge::{MeshLink, RateTracker, TickOutcome, init_tracing};
use meshlink_middleware::{BusTransport, EventBus, WsBridge};
use meshlink_types::{Event, EventPayload, LinkError};

use crate::config::Config;
use crate::surface::LogSurface;

/// Topic carrying host lifecycle alerts.
const ALERT_TOPIC: &str = "/meshlink/alerts";
const SOURCE: &str = "meshlink-cli";

fn main() {
    // Held until exit so pending spans are flushed.
    let _telemetry = init_tracing("meshlink");

    print_banner();

    if std::env::args().nth(1).as_deref() == Some("init") {
        write_default_config();
        return;
    }

    let cfg = load_config();
    if let Err(e) = cfg.validate() {
        println!("{}: {}", "Config error".red(), e);
        std::process::exit(2);
    }

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let bus = Arc::new(EventBus::default());

    let shutdown_clone = shutdown.clone();
    let bus_ctrlc_ref = bus.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());

        let alert = Event::new(
            SOURCE,
            EventPayload::Alert {
                component: "cli".to_string(),
                message: "operator Ctrl-C".to_string(),
            },
        );
        // Nobody may be listening; the shutdown proceeds regardless.
        let _ = bus_ctrlc_ref.publish_to(ALERT_TOPIC, alert);

        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; stop the process with a signal instead");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the tokio runtime");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cfg, bus, shutdown)) {
        error!(error = %e, "meshlink stopped with an error");
        std::process::exit(1);
    }
    println!("{}", "  ✓ Exiting MeshLink.".green());
}

async fn run(cfg: Config, bus: Arc<EventBus>, shutdown: Arc<AtomicBool>) -> Result<(), LinkError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.ws_port));
    let mut server = tokio::spawn(WsBridge::new(bus.clone()).run(addr));
    println!(
        "  WebSocket bridge on {}",
        format!("ws://{addr}").bold().cyan()
    );

    let host_span = info_span!("host");
    let transport = Arc::new(BusTransport::with_source(bus.clone(), SOURCE));
    let mut link = MeshLink::start(
        transport,
        tokio::runtime::Handle::current(),
        &cfg.bridge,
        LogSurface::default(),
        &host_span,
    )?;
    println!(
        "  Publishing meshes on {}, rendering detections from {}",
        cfg.bridge.mesh_topic.bold(),
        cfg.bridge.detection_topic.bold()
    );

    // ── Frame loop ────────────────────────────────────────────────────────
    let mut frames = tokio::time::interval(cfg.frame_period().map_err(LinkError::Config)?);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut frame_rate = RateTracker::new(cfg.bridge.rate_window);
    let mut last_report = Instant::now();

    let outcome = loop {
        if shutdown.load(Ordering::SeqCst) {
            break Ok(());
        }
        tokio::select! {
            _ = frames.tick() => {}
            // The bridge only returns on a bind or accept failure.
            result = &mut server => {
                break match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e),
                    Err(e) => Err(LinkError::TransportUnavailable(e.to_string())),
                };
            }
        }

        frame_rate.tick();
        if let TickOutcome::Rebuilt { objects, .. } = link.tick() {
            host_span.in_scope(|| info!(objects, "overlays refreshed"));
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            let stats = link.publisher_stats();
            host_span.in_scope(|| {
                info!(
                    fps = ?frame_rate.rate_avg(),
                    batch_hz = ?link.renderer().batch_rate(),
                    overlays = link.renderer().surface().live(),
                    meshes_sent = stats.sent,
                    meshes_rejected = stats.rejected,
                    detections_rejected = link.rejected_batches(),
                    "frame loop"
                );
            });
            last_report = Instant::now();
        }
    };

    let destroyed = link.renderer_mut().clear();
    host_span.in_scope(|| info!(destroyed, "overlays cleared"));
    server.abort();
    outcome
}

fn load_config() -> Config {
    match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            println!(
                "  No config at {}; using defaults (run `{}` to create one).",
                config::config_path().display().to_string().dimmed(),
                "meshlink init".bold()
            );
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

fn write_default_config() {
    match config::save(&Config::default()) {
        Ok(()) => println!(
            "  {} Config written to {}",
            "✓".green(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            std::process::exit(1);
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", "  ╔══════════════════════════════════╗".cyan());
    println!("{}", "  ║   MeshLink – spatial bridge host ║".cyan().bold());
    println!("{}", "  ╚══════════════════════════════════╝".cyan());
    println!();
}
