//! LoRa packet-forwarding gateway daemon entry point.
//!
//! Loads configuration, starts the concentrator, resolves server endpoints,
//! and runs the forwarding engine until a shutdown signal
//! or a fatal condition is observed.
//!
//! # Usage
//!
//! ```bash
//! lora-pkt-fwd [config-dir]
//! ```
//!
//! `config-dir` defaults to the current directory and must contain either
//! `debug_conf.json` or `global_conf.json`.

use log::{error, info, warn};
use lora_pkt_fwd::beacon;
use lora_pkt_fwd::concentrator::Concentrator;
use lora_pkt_fwd::config::{self, Config};
use lora_pkt_fwd::counters::{CounterFamily, DownstreamCounters, GpsCounters, UpstreamCounters};
use lora_pkt_fwd::downstream::{self, DownstreamConfig};
use lora_pkt_fwd::endpoint::Endpoint;
use lora_pkt_fwd::error::{ExitCode, GatewayError};
use lora_pkt_fwd::gnss;
use lora_pkt_fwd::hal::{NullGhostSource, NullGnssHal, NullHal};
use lora_pkt_fwd::position::PositionSlot;
use lora_pkt_fwd::protocol::stat::GatewayPosition;
use lora_pkt_fwd::shutdown::ShutdownToken;
use lora_pkt_fwd::stats::{self, StatsConfig};
use lora_pkt_fwd::supervisor::{self, FatalSlot};
use lora_pkt_fwd::timeref::{TimeRef, XtalTracker};
use lora_pkt_fwd::upstream::{self, ReportSlot, UpstreamConfig};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Not configurable: the daemon's own receive-timeout budget for a PULL
/// session's down-socket.
const PULL_TIMEOUT: Duration = Duration::from_millis(200);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let config = match config::load_config(&config_dir) {
        Ok(c) => c,
        Err(e) => fatal_exit(&e),
    };

    let exit_code = run(config);
    std::process::exit(exit_code as i32);
}

fn fatal_exit(e: &GatewayError) -> ! {
    error!(target: "main", "{e}");
    std::process::exit(ExitCode::from(e) as i32);
}

fn run(config: Config) -> ExitCode {
    let gw = &config.gateway_conf;

    let gateway_eui = match gw.gateway_eui() {
        Ok(eui) => eui,
        Err(e) => return bail(e),
    };
    let servers = match gw.server_list() {
        Ok(s) => s,
        Err(e) => return bail(e),
    };

    info!(target: "main", "starting gateway {gateway_eui}");

    let concentrator = match Concentrator::start(NullHal::new()) {
        Ok(c) => Arc::new(c),
        Err(e) => return bail(e),
    };

    let push_timeout_half = Duration::from_millis((gw.push_timeout_ms / 2) as u64);
    let endpoints: Vec<Endpoint> = match servers
        .iter()
        .map(|s| Endpoint::connect(s, push_timeout_half, PULL_TIMEOUT))
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(e) => e,
        Err(e) => return bail(e),
    };
    for (endpoint, conf) in endpoints.iter().zip(&servers) {
        if endpoint.is_live() {
            info!(target: "main", "endpoint {} is live", endpoint.name);
        } else if conf.serv_enabled {
            warn!(target: "main", "endpoint {} failed to come up, continuing without it", endpoint.name);
        }
    }

    let timeref = TimeRef::new();
    let xtal = XtalTracker::new();
    let up_counters: CounterFamily<UpstreamCounters> = CounterFamily::new();
    let dw_counters: CounterFamily<DownstreamCounters> = CounterFamily::new();
    let gps_counters: CounterFamily<GpsCounters> = CounterFamily::new();
    let position = PositionSlot::new();
    let reports = ReportSlot::new();
    let shutdown = ShutdownToken::new();
    let fatal = Arc::new(FatalSlot::new());
    let (beacon_arm_tx, beacon_arm_rx) = beacon::channel();
    let ghost: Option<Mutex<NullGhostSource>> = gw.ghoststream.then(|| Mutex::new(NullGhostSource::new()));

    if gw.fake_gps {
        info!(target: "main", "fake_gps enabled: using configured reference position, beacon requires real PPS and will never arm");
        position.set(GatewayPosition {
            latitude: gw.ref_latitude,
            longitude: gw.ref_longitude,
            altitude_m: gw.ref_altitude,
        });
    }

    let signal_thread = match supervisor::spawn_signal_handler(shutdown.clone()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(target: "main", "failed to install signal handlers: {e}");
            None
        }
    };

    let stat_interval = Duration::from_secs(gw.stat_interval as u64);
    let reset_probe = supervisor::spawn_reset_probe(concentrator.clone(), shutdown.clone(), fatal.clone(), stat_interval);

    // Every spawned closure below is `move`, but the only things it ever
    // moves are these `&T` aliases (always `Copy`, regardless of `T`) —
    // the underlying resources stay shared and outlive the scope.
    let concentrator_ref = &concentrator;
    let timeref_ref = &timeref;
    let xtal_ref = &xtal;
    let up_counters_ref = &up_counters;
    let dw_counters_ref = &dw_counters;
    let gps_counters_ref = &gps_counters;
    let position_ref = &position;
    let reports_ref = &reports;
    let shutdown_ref = &shutdown;
    let endpoints_ref = &endpoints;
    let ghost_ref = ghost.as_ref();

    std::thread::scope(|scope| {
        scope.spawn(move || {
            lora_pkt_fwd::timeref::run(concentrator_ref, timeref_ref, xtal_ref, shutdown_ref);
        });

        scope.spawn(move || {
            let stats_config = StatsConfig {
                stat_interval,
                statusstream: gw.statusstream,
                platform: gw.platform.clone(),
                email: gw.contact_email.clone(),
                description: gw.description.clone(),
            };
            stats::run(up_counters_ref, dw_counters_ref, position_ref, reports_ref, &stats_config, shutdown_ref);
        });

        if gw.upstream {
            scope.spawn(move || {
                let upstream_config = UpstreamConfig {
                    gateway_eui,
                    forward_crc_valid: gw.forward_crc_valid,
                    forward_crc_error: gw.forward_crc_error,
                    forward_crc_disabled: gw.forward_crc_disabled,
                    radiostream: gw.radiostream,
                };
                upstream::run::<_, NullGhostSource>(
                    concentrator_ref,
                    ghost_ref,
                    endpoints_ref,
                    timeref_ref,
                    xtal_ref,
                    up_counters_ref,
                    reports_ref,
                    &upstream_config,
                    shutdown_ref,
                );
            });
        }

        if gw.downstream {
            for endpoint in endpoints.iter().filter(|e| e.is_live()) {
                scope.spawn(move || {
                    let downstream_config = DownstreamConfig {
                        gateway_eui,
                        keepalive_interval: Duration::from_secs(gw.keepalive_interval as u64),
                        autoquit_threshold: gw.autoquit_threshold,
                    };
                    downstream::run(endpoint, concentrator_ref, timeref_ref, xtal_ref, dw_counters_ref, &downstream_config, shutdown_ref);
                });
            }
        }

        if gw.beacon {
            scope.spawn(move || {
                beacon::run(concentrator_ref, beacon_arm_rx, timeref_ref, xtal_ref, position_ref, gw.beacon_freq_hz, shutdown_ref);
            });
        }

        if gw.gps && !gw.fake_gps {
            if let Some(path) = &gw.gps_tty_path {
                info!(target: "gps", "GNSS ingest configured against {path}");
            }
            scope.spawn(move || {
                gnss::run(
                    NullGnssHal::new(),
                    concentrator_ref,
                    timeref_ref,
                    position_ref,
                    gps_counters_ref,
                    gw.beacon_period,
                    gw.beacon_offset,
                    &beacon_arm_tx,
                    shutdown_ref,
                );
            });
        }
    });

    concentrator.stop();
    // The signal-handler thread blocks on `Signals::forever()`, which only
    // returns after a received signal; joining it here would hang on the
    // (common) shutdown paths that were never signal-driven (autoquit, a
    // spurious reset). Detach it instead and let the process exit reap it.
    if let Some(handle) = signal_thread {
        drop(handle);
    }
    let _ = reset_probe.join();

    match fatal.take() {
        Some(e) => {
            error!(target: "main", "{e}");
            ExitCode::from(&e)
        }
        None => {
            info!(target: "main", "shutdown complete");
            ExitCode::Clean
        }
    }
}

fn bail(e: GatewayError) -> ExitCode {
    error!(target: "main", "{e}");
    ExitCode::from(&e)
}
