//! GaugeLink link controller running on a PC
//!
//! Usage: cargo run -p gaugelink-sim -- --wake-after-ms 3000 --log-level debug
//!
//! The controller talks to an emulated ELM327 adapter over an in-process
//! radio link and draws the 16x2 display on stdout.

use std::time::Duration;

use anyhow::{ensure, Result};
use clap::Parser;
use gaugelink_core::controller::DEFAULT_TEMP_POLL_RATIO;
use gaugelink_core::{LinkConfig, LinkController, LinkTarget, LinkTiming};
use log::{info, LevelFilter};

mod radio;
mod terminal;

use radio::{EmulatedRadio, Faults, Vehicle};
use terminal::TerminalSurface;

#[derive(Parser, Debug)]
#[command(name = "gaugelink-sim", about = "Run the GaugeLink controller against an emulated adapter")]
struct Args {
    /// Ignition turns on this many milliseconds after start
    #[arg(long, default_value_t = 3000)]
    wake_after_ms: u64,

    /// Ignition turns off again this many milliseconds after start
    #[arg(long)]
    sleep_after_ms: Option<u64>,

    /// Drop the BLE link once, this many milliseconds after start
    #[arg(long)]
    drop_link_after_ms: Option<u64>,

    /// Number of connect attempts that fail before the adapter shows up
    #[arg(long, default_value_t = 0)]
    connect_failures: u32,

    /// Notification payload size in bytes
    #[arg(long, default_value_t = 20)]
    fragment_size: usize,

    /// Delay before each notification fragment
    #[arg(long, default_value_t = 5)]
    latency_ms: u64,

    /// OBD protocol for ATSP
    #[arg(long, default_value = "1")]
    protocol: String,

    /// RPM polls per coolant poll
    #[arg(long, default_value_t = DEFAULT_TEMP_POLL_RATIO)]
    temp_poll_ratio: u32,

    /// Scale every controller delay and timeout (0.1 = ten times faster)
    #[arg(long, default_value_t = 1.0)]
    time_scale: f64,

    /// Stop after this many controller steps
    #[arg(long)]
    steps: Option<u64>,

    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn scaled_timing(scale: f64) -> LinkTiming {
    let t = LinkTiming::default();
    LinkTiming {
        command_timeout: t.command_timeout.mul_f64(scale),
        init_timeout: t.init_timeout.mul_f64(scale),
        init_command_delay: t.init_command_delay.mul_f64(scale),
        reconnect_delay: t.reconnect_delay.mul_f64(scale),
        ecu_probe_interval: t.ecu_probe_interval.mul_f64(scale),
        ecu_awake_banner: t.ecu_awake_banner.mul_f64(scale),
        poll_interval: t.poll_interval.mul_f64(scale),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    ensure!(args.fragment_size > 0, "--fragment-size must be at least 1");
    ensure!(args.temp_poll_ratio > 0, "--temp-poll-ratio must be at least 1");
    ensure!(
        args.time_scale.is_finite() && args.time_scale > 0.0 && args.time_scale <= 100.0,
        "--time-scale must be in (0, 100]"
    );

    let config = LinkConfig {
        target: LinkTarget {
            address: "66:1e:32:7a:35:0e".to_string(),
            service_uuid: "0000fff0-0000-1000-8000-00805f9b34fb".to_string(),
            tx_uuid: "0000fff2-0000-1000-8000-00805f9b34fb".to_string(),
            rx_uuid: "0000fff1-0000-1000-8000-00805f9b34fb".to_string(),
        },
        timing: scaled_timing(args.time_scale),
        protocol: args.protocol,
        adapter_timeout: 0x32,
        temp_poll_ratio: args.temp_poll_ratio,
        max_probe_timeouts: 10,
    };

    let vehicle = Vehicle::new(
        Duration::from_millis(args.wake_after_ms),
        args.sleep_after_ms.map(Duration::from_millis),
    );
    let faults = Faults {
        connect_failures: args.connect_failures,
        drop_link_after: args.drop_link_after_ms.map(Duration::from_millis),
    };
    let radio = EmulatedRadio::new(
        vehicle,
        faults,
        args.fragment_size,
        Duration::from_millis(args.latency_ms),
    );

    let mut controller = LinkController::new(radio, TerminalSurface::default(), config);
    controller.boot();

    let mut steps = 0u64;
    loop {
        if let Some(frame) = controller.surface_mut().take_frame() {
            println!("{frame}");
        }
        if args.steps.is_some_and(|max| steps >= max) {
            break;
        }
        controller.step();
        steps += 1;
    }

    info!("Stopped after {steps} steps in state {:?}", controller.state());
    Ok(())
}
