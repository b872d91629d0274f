//! Upstream fan-out. One task, shared by every live
//! endpoint: batches radio (and ghost) packets into a single PUSH_DATA
//! datagram per iteration and sends it to each live endpoint in turn.

use crate::concentrator::{Concentrator, ConcentratorHal};
use crate::counters::{CounterFamily, UpstreamCounters};
use crate::endpoint::Endpoint;
use crate::ghost::GhostSource;
use crate::protocol::rxpk::CrcStatus;
use crate::protocol::stat::StatJson;
use crate::protocol::{build_header, is_matching_ack, GatewayEui, PacketType, HEADER_LEN};
use crate::shutdown::ShutdownToken;
use crate::timeref::{TimeRef, XtalTracker};
use chrono::Utc;
use rand_core::{OsRng, RngCore};
use serde_json::{Map, Value};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Per-iteration cap on radio+ghost packets.
pub const NB_PKT_MAX: usize = 8;
const FETCH_SLEEP: Duration = Duration::from_millis(10);

pub struct UpstreamConfig {
    pub gateway_eui: GatewayEui,
    pub forward_crc_valid: bool,
    pub forward_crc_error: bool,
    pub forward_crc_disabled: bool,
    /// `radiostream` feature switch: when false, the concentrator
    /// is never polled for packets and only the ghost source (if enabled)
    /// feeds the upstream batch.
    pub radiostream: bool,
}

/// Pending status report, published by the stats task and consumed by the
/// next PUSH_DATA iteration.
#[derive(Default)]
pub struct ReportSlot(Mutex<Option<StatJson>>);

impl ReportSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, report: StatJson) {
        *self.0.lock().expect("report slot mutex poisoned") = Some(report);
    }

    pub fn take(&self) -> Option<StatJson> {
        self.0.lock().expect("report slot mutex poisoned").take()
    }
}

/// Runs the upstream fan-out loop until shutdown is requested.
#[allow(clippy::too_many_arguments)]
pub fn run<H: ConcentratorHal, G: GhostSource>(
    concentrator: &Concentrator<H>,
    ghost: Option<&Mutex<G>>,
    endpoints: &[Endpoint],
    timeref: &TimeRef,
    xtal: &XtalTracker,
    counters: &CounterFamily<UpstreamCounters>,
    reports: &ReportSlot,
    config: &UpstreamConfig,
    shutdown: &ShutdownToken,
) {
    while !shutdown.should_exit() {
        let mut packets = if config.radiostream {
            concentrator.receive(NB_PKT_MAX)
        } else {
            Vec::new()
        };

        if packets.len() < NB_PKT_MAX {
            if let Some(ghost) = ghost {
                let need = NB_PKT_MAX - packets.len();
                let mut guard = ghost.lock().expect("ghost source mutex poisoned");
                packets.extend(guard.fetch(need));
            }
        }

        let pending_report = reports.take();

        if packets.is_empty() && pending_report.is_none() {
            thread::sleep(FETCH_SLEEP);
            continue;
        }

        let time_snapshot = timeref.snapshot();
        let xtal_snapshot = xtal.snapshot();

        let rxpk: Vec<_> = packets
            .iter()
            .filter(|p| p.passes_filter(config.forward_crc_valid, config.forward_crc_error, config.forward_crc_disabled))
            .map(|p| {
                let time = time_snapshot
                    .counter_to_utc(p.count_us, xtal_snapshot.multiplier)
                    .unwrap_or_else(Utc::now);
                p.to_rxpk(time)
            })
            .collect();

        counters.update(|c| {
            c.rx_received += packets.len() as u32;
            c.rx_ok += packets.iter().filter(|p| p.crc_status == CrcStatus::Ok).count() as u32;
            c.rx_forwarded += rxpk.len() as u32;
        });

        if rxpk.is_empty() && pending_report.is_none() {
            continue;
        }

        let mut body = Map::new();
        if !rxpk.is_empty() {
            body.insert("rxpk".to_string(), serde_json::to_value(&rxpk).expect("rxpk always serialises"));
        }
        if let Some(report) = &pending_report {
            body.insert("stat".to_string(), serde_json::to_value(report).expect("stat always serialises"));
        }
        let body_bytes = serde_json::to_vec(&Value::Object(body)).expect("push_data body always serialises");

        let token = (OsRng.next_u32() & 0xFFFF) as u16;
        let header = build_header(token, PacketType::PushData, config.gateway_eui);
        let mut datagram = Vec::with_capacity(HEADER_LEN + body_bytes.len());
        datagram.extend_from_slice(&header);
        datagram.extend_from_slice(&body_bytes);

        let mut datagrams_sent = 0u32;
        let mut acks = 0u32;

        for endpoint in endpoints.iter().filter(|e| e.is_live()) {
            if endpoint.send_up(&datagram).is_err() {
                continue;
            }
            datagrams_sent += 1;

            let mut buf = [0u8; 16];
            let mut acked = false;
            for _ in 0..2 {
                match endpoint.recv_up(&mut buf) {
                    Ok(n) if is_matching_ack(&buf[..n], token, PacketType::PushAck) => {
                        acked = true;
                        break;
                    }
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
            if acked {
                acks += 1;
            }
        }

        counters.update(|c| {
            c.datagrams_sent += datagrams_sent;
            c.ack_received += acks;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concentrator::mock::MockHal;
    use crate::config::ServerConf;
    use crate::ghost::mock::MockGhostSource;
    use crate::protocol::build_ack;
    use std::net::UdpSocket;
    use std::thread as std_thread;

    fn gw_eui() -> GatewayEui {
        GatewayEui::from_hex("AA555A0000000001").unwrap()
    }

    #[test]
    fn no_packets_and_no_report_does_not_send_anything() {
        let concentrator = Concentrator::start(MockHal::new()).unwrap();
        let timeref = TimeRef::new();
        let xtal = XtalTracker::new();
        let counters: CounterFamily<UpstreamCounters> = CounterFamily::new();
        let reports = ReportSlot::new();
        let config = UpstreamConfig {
            gateway_eui: gw_eui(),
            forward_crc_valid: true,
            forward_crc_error: false,
            forward_crc_disabled: false,
            radiostream: true,
        };
        let shutdown = ShutdownToken::new();
        shutdown.request_exit();

        run::<_, MockGhostSource>(&concentrator, None, &[], &timeref, &xtal, &counters, &reports, &config, &shutdown);

        assert_eq!(counters.snapshot().datagrams_sent, 0);
    }

    #[test]
    fn ghost_tops_up_when_radio_is_empty() {
        let mut ghost = MockGhostSource::default();
        for i in 0..3u32 {
            ghost.queue.push_back(crate::protocol::rxpk::ReceivedPacket {
                count_us: i,
                if_chain: 0,
                rf_chain: 0,
                freq_hz: 868_100_000,
                crc_status: CrcStatus::Ok,
                modulation: crate::protocol::rxpk::Modulation::Lora,
                data_rate: crate::protocol::rxpk::DataRate::Lora(
                    crate::protocol::rxpk::SpreadingFactor(7),
                    crate::protocol::rxpk::Bandwidth(125),
                ),
                coding_rate: crate::protocol::rxpk::CodingRate::Cr4_5,
                rssi_dbm: -80,
                snr_db: Some(9.0),
                payload: vec![1, 2, 3],
            });
        }

        let concentrator = Concentrator::start(MockHal::new()).unwrap();
        let mut packets = concentrator.receive(NB_PKT_MAX);
        assert!(packets.is_empty());
        let need = NB_PKT_MAX - packets.len();
        packets.extend(ghost.fetch(need));

        assert_eq!(packets.len(), 3);
    }

    #[test]
    fn push_data_round_trip_with_live_endpoint_counts_one_ack() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();
        let conf = ServerConf {
            server_address: server_addr.ip().to_string(),
            serv_port_up: server_addr.port(),
            serv_port_down: server_addr.port(),
            serv_enabled: true,
        };
        let endpoint = Endpoint::connect(&conf, Duration::from_millis(200), Duration::from_millis(200)).unwrap();
        assert!(endpoint.is_live());

        let responder = std_thread::spawn(move || {
            let mut buf = [0u8; 512];
            let (n, from) = server.recv_from(&mut buf).expect("datagram arrives");
            let header = crate::protocol::parse_header(&buf[..n]).unwrap();
            let ack = build_ack(header.token, PacketType::PushAck);
            server.send_to(&ack, from).unwrap();
        });

        let token = 0xBEEFu16;
        let header = build_header(token, PacketType::PushData, gw_eui());
        let mut datagram = Vec::new();
        datagram.extend_from_slice(&header);
        datagram.extend_from_slice(b"{\"rxpk\":[]}");

        endpoint.send_up(&datagram).unwrap();
        let mut buf = [0u8; 16];
        let n = endpoint.recv_up(&mut buf).unwrap();
        assert!(is_matching_ack(&buf[..n], token, PacketType::PushAck));

        responder.join().unwrap();
    }
}
