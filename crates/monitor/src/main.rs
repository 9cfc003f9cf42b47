//! hmd-tether monitor
//!
//! Diagnostic CLI for the tether pipeline: attaches to a connected stereo
//! viewer and periodically reports connection state, frame statistics, and
//! head pose, without any rendering. Useful for checking a headset link
//! before launching the host engine.

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tether::{ConnectionState, Tether, TetherConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "hmd-tether-monitor")]
#[command(
    author,
    version,
    about = "Monitor a USB-tethered stereo viewer without rendering"
)]
#[command(long_about = "
Attaches to a phone-based stereo viewer over USB and reports connection
state, frame throughput, drop counters, and head pose on an interval.

EXAMPLES:
    # Monitor with the default config
    hmd-tether-monitor

    # Monitor with a custom config and verbose logging
    hmd-tether-monitor --config ~/tether.toml --log-level debug

    # List attached candidate devices and exit
    hmd-tether-monitor --list-devices

    # Sample every 500 ms for one minute
    hmd-tether-monitor --interval-ms 500 --duration-secs 60

CONFIGURATION:
    The monitor looks for configuration in the following order:
    1. Path specified with --config
    2. ~/.config/hmd-tether/tether.toml
    3. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save the default configuration to its default location and exit
    #[arg(long)]
    save_config: bool,

    /// List attached candidate devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Reporting interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Stop after this many seconds (default: run until Ctrl-C)
    #[arg(long)]
    duration_secs: Option<u64>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = TetherConfig::default();
        let path = TetherConfig::default_path();
        config.save(&path).context("failed to save configuration")?;
        println!("configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = match &args.config {
        Some(raw) => {
            let path = PathBuf::from(shellexpand::tilde(raw).as_ref());
            TetherConfig::load(Some(path)).context("failed to load configuration")?
        }
        None => TetherConfig::load_or_default(),
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.log_level);
    setup_logging(log_level).context("failed to setup logging")?;

    info!("hmd-tether-monitor v{}", env!("CARGO_PKG_VERSION"));

    if args.list_devices {
        return list_devices(&config);
    }

    run_monitor(&args, config)
}

fn list_devices(config: &TetherConfig) -> Result<()> {
    let context = rusb::Context::new().context("failed to create USB context")?;
    let extra = config
        .device
        .stream_filters()
        .context("invalid device filters")?;

    let devices = tether::usb::list_candidate_devices(&context, &extra)
        .context("failed to enumerate devices")?;

    if devices.is_empty() {
        println!("no candidate devices attached");
        return Ok(());
    }

    println!("{} candidate device(s):", devices.len());
    for info in devices {
        println!(
            "  bus {:03} addr {:03}  {}",
            info.bus_number,
            info.device_address,
            info.description()
        );
    }
    Ok(())
}

fn run_monitor(args: &Args, config: TetherConfig) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::Release);
        })
        .context("failed to install Ctrl-C handler")?;
    }

    let tether = Tether::spawn(config).context("failed to start tether pipeline")?;
    let adapter = tether.adapter();

    let interval = Duration::from_millis(args.interval_ms.max(10));
    let deadline = args
        .duration_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    let mut last_decoded = 0u64;
    while running.load(Ordering::Acquire) {
        if let Some(deadline) = deadline
            && Instant::now() >= deadline
        {
            break;
        }
        std::thread::sleep(interval);

        let state = adapter.connection_state();
        let stats = adapter.stats();
        let fps =
            (stats.frames_decoded - last_decoded) as f64 / interval.as_secs_f64();
        last_decoded = stats.frames_decoded;

        match state {
            ConnectionState::Streaming => {
                let frame = adapter
                    .current_frame()
                    .map(|f| format!("seq {} {}x{}", f.sequence, f.width, f.height))
                    .unwrap_or_else(|| "none".to_string());
                let pose = adapter
                    .current_pose()
                    .map(|p| {
                        let q = p.orientation;
                        format!("[{:.3}, {:.3}, {:.3}, {:.3}]", q[0], q[1], q[2], q[3])
                    })
                    .unwrap_or_else(|| "none".to_string());
                info!(
                    "streaming at {:.1} fps, frame {}, pose {} | {}",
                    fps,
                    frame,
                    pose,
                    stats.summary()
                );
            }
            other => info!("{} | {}", other, stats.summary()),
        }
    }

    info!("shutting down");
    tether.shutdown();
    Ok(())
}
