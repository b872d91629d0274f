//! Statistics/report. Runs once per `stat_interval`: snapshots
//! and zeroes every counter family, logs a human report unconditionally, and
//! — if status-stream reporting is enabled — publishes a JSON `stat` body for
//! C6 to fold into its next PUSH_DATA.

use crate::counters::{CounterFamily, DownstreamCounters, UpstreamCounters};
use crate::position::PositionSlot;
use crate::protocol::stat::StatSnapshot;
use crate::shutdown::ShutdownToken;
use crate::upstream::ReportSlot;
use chrono::Utc;
use std::time::Duration;

pub struct StatsConfig {
    pub stat_interval: Duration,
    pub statusstream: bool,
    pub platform: String,
    pub email: String,
    pub description: String,
}

/// Sleep in short ticks so shutdown is noticed promptly instead of only at
/// the end of a potentially long `stat_interval`.
fn sleep_respecting_shutdown(total: Duration, shutdown: &ShutdownToken) -> bool {
    const TICK: Duration = Duration::from_millis(200);
    let mut elapsed = Duration::ZERO;
    while elapsed < total {
        if shutdown.should_exit() {
            return false;
        }
        let remaining = total - elapsed;
        std::thread::sleep(remaining.min(TICK));
        elapsed += TICK;
    }
    true
}

pub fn run(
    upstream_counters: &CounterFamily<UpstreamCounters>,
    downstream_counters: &CounterFamily<DownstreamCounters>,
    position: &PositionSlot,
    reports: &ReportSlot,
    config: &StatsConfig,
    shutdown: &ShutdownToken,
) {
    while !shutdown.should_exit() {
        if !sleep_respecting_shutdown(config.stat_interval, shutdown) {
            break;
        }

        let up = upstream_counters.snapshot_and_reset();
        let dw = downstream_counters.snapshot_and_reset();
        let up_ack_ratio = if up.datagrams_sent > 0 {
            up.ack_received as f32 / up.datagrams_sent as f32
        } else {
            0.0
        };

        let snapshot = StatSnapshot {
            time: Utc::now(),
            position: position.get(),
            rx_received: up.rx_received,
            rx_ok: up.rx_ok,
            rx_forwarded: up.rx_forwarded,
            up_ack_ratio,
            dw_datagrams_received: dw.dw_dgram_rcv,
            tx_ok: dw.nb_tx_ok,
            platform: config.platform.clone(),
            email: config.email.clone(),
            description: config.description.clone(),
        };

        log::info!(target: "main", "{}", snapshot.to_human_report());

        if config.statusstream {
            reports.publish(snapshot.to_json());
        }
    }
}
