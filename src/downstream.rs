//! Downstream PULL session. One instance per live endpoint:
//! alternates between Polling (send PULL_DATA) and Listening (wait for
//! PULL_ACK/PULL_RESP) until `keepalive_time` elapses, then polls again.

use crate::concentrator::{Concentrator, ConcentratorHal};
use crate::counters::{CounterFamily, DownstreamCounters};
use crate::endpoint::Endpoint;
use crate::protocol::txpk::parse_txpk;
use crate::protocol::{build_header, parse_header, GatewayEui, PacketType};
use crate::shutdown::ShutdownToken;
use crate::timeref::{TimeRef, XtalTracker};
use rand_core::{OsRng, RngCore};
use std::time::{Duration, Instant};

pub struct DownstreamConfig {
    pub gateway_eui: GatewayEui,
    pub keepalive_interval: Duration,
    pub autoquit_threshold: u32,
}

enum State {
    Polling,
    Listening { deadline: Instant },
}

/// Runs one endpoint's PULL session until shutdown is requested or autoquit
/// fires.
#[allow(clippy::too_many_arguments)]
pub fn run<H: ConcentratorHal>(
    endpoint: &Endpoint,
    concentrator: &Concentrator<H>,
    timeref: &TimeRef,
    xtal: &XtalTracker,
    counters: &CounterFamily<DownstreamCounters>,
    config: &DownstreamConfig,
    shutdown: &ShutdownToken,
) {
    let mut state = State::Polling;
    let mut token: u16 = 0;
    let mut req_ack = false;
    let mut autoquit_counter: u32 = 0;

    while !shutdown.should_exit() {
        match state {
            State::Polling => {
                token = (OsRng.next_u32() & 0xFFFF) as u16;
                let header = build_header(token, PacketType::PullData, config.gateway_eui);
                if endpoint.send_down(&header).is_ok() {
                    counters.update(|c| c.dw_pull_sent += 1);
                }
                req_ack = false;
                autoquit_counter += 1;

                if config.autoquit_threshold > 0 && autoquit_counter >= config.autoquit_threshold {
                    log::warn!(target: "down", "endpoint {} reached autoquit threshold, requesting shutdown", endpoint.name);
                    shutdown.request_exit();
                    break;
                }

                state = State::Listening {
                    deadline: Instant::now() + config.keepalive_interval,
                };
            }
            State::Listening { deadline } => {
                if Instant::now() >= deadline {
                    state = State::Polling;
                    continue;
                }

                let mut buf = [0u8; 2048];
                let n = match endpoint.recv_down(&mut buf) {
                    Ok(n) => n,
                    Err(_) => continue,
                };

                let header = match parse_header(&buf[..n]) {
                    Some(h) => h,
                    None => continue,
                };

                match header.packet_type {
                    PacketType::PullAck => {
                        if header.token == token && !req_ack {
                            req_ack = true;
                            autoquit_counter = 0;
                            counters.update(|c| c.dw_ack_rcv += 1);
                        } else {
                            log::debug!(target: "down", "endpoint {} ignored duplicate/stale PULL_ACK", endpoint.name);
                        }
                    }
                    PacketType::PullResp => {
                        handle_pull_resp(&buf[..n], endpoint, concentrator, timeref, xtal, counters);
                    }
                    _ => {}
                }
            }
        }
    }
}

fn handle_pull_resp<H: ConcentratorHal>(
    datagram: &[u8],
    endpoint: &Endpoint,
    concentrator: &Concentrator<H>,
    timeref: &TimeRef,
    xtal: &XtalTracker,
    counters: &CounterFamily<DownstreamCounters>,
) {
    counters.update(|c| {
        c.dw_dgram_rcv += 1;
        c.dw_network_byte += datagram.len() as u32;
    });

    if datagram.len() <= 4 {
        return;
    }
    let body: serde_json::Value = match serde_json::from_slice(&datagram[4..]) {
        Ok(v) => v,
        Err(e) => {
            log::warn!(target: "down", "endpoint {} sent unparsable PULL_RESP: {e}", endpoint.name);
            return;
        }
    };
    let Some(txpk) = body.get("txpk") else {
        log::warn!(target: "down", "endpoint {} PULL_RESP missing 'txpk'", endpoint.name);
        return;
    };

    let utc_to_counter = |utc| {
        let snap = timeref.snapshot();
        snap.utc_to_counter(utc, xtal.snapshot().multiplier)
    };

    let packet = match parse_txpk(txpk, utc_to_counter) {
        Ok(p) => p,
        Err(e) => {
            log::warn!(target: "down", "endpoint {} txpk rejected: {e}", endpoint.name);
            return;
        }
    };

    counters.update(|c| c.dw_payload_byte += packet.payload.len() as u32);

    match concentrator.send(&packet) {
        Ok(()) => counters.update(|c| c.nb_tx_ok += 1),
        Err(e) => {
            log::warn!(target: "down", "endpoint {} concentrator send failed: {e}", endpoint.name);
            counters.update(|c| c.nb_tx_fail += 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concentrator::mock::MockHal;
    use crate::config::ServerConf;
    use crate::protocol::build_ack;
    use serde_json::json;
    use std::net::UdpSocket;

    fn gw_eui() -> GatewayEui {
        GatewayEui::from_hex("AA555A0000000001").unwrap()
    }

    fn live_endpoint() -> (Endpoint, UdpSocket) {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();
        let conf = ServerConf {
            server_address: server_addr.ip().to_string(),
            serv_port_up: server_addr.port(),
            serv_port_down: server_addr.port(),
            serv_enabled: true,
        };
        let endpoint = Endpoint::connect(&conf, Duration::from_millis(50), Duration::from_millis(100)).unwrap();
        (endpoint, server)
    }

    #[test]
    fn pull_ack_matching_token_increments_counter_once() {
        let counters: CounterFamily<DownstreamCounters> = CounterFamily::new();
        let token = 0x1234u16;
        let ack = build_ack(token, PacketType::PullAck);
        let header = parse_header(&ack).unwrap();

        let mut req_ack = false;
        if header.packet_type == PacketType::PullAck && header.token == token && !req_ack {
            req_ack = true;
            counters.update(|c| c.dw_ack_rcv += 1);
        }
        // A duplicate ack with the same token must not double-count.
        if header.packet_type == PacketType::PullAck && header.token == token && !req_ack {
            counters.update(|c| c.dw_ack_rcv += 1);
        }

        assert_eq!(counters.snapshot().dw_ack_rcv, 1);
    }

    #[test]
    fn pull_resp_immediate_lora_schedules_tx() {
        let (endpoint, _server) = live_endpoint();
        let concentrator = Concentrator::start(MockHal::new()).unwrap();
        let timeref = TimeRef::new();
        let xtal = XtalTracker::new();
        let counters: CounterFamily<DownstreamCounters> = CounterFamily::new();

        let txpk = json!({
            "txpk": {
                "imme": true,
                "freq": 869.525,
                "rfch": 0,
                "powe": 14,
                "modu": "LORA",
                "datr": "SF9BW125",
                "codr": "4/5",
                "size": 1,
                "data": "AQ=="
            }
        });
        let mut datagram = vec![1, 0, 0, 3];
        datagram.extend_from_slice(&serde_json::to_vec(&txpk).unwrap());

        handle_pull_resp(&datagram, &endpoint, &concentrator, &timeref, &xtal, &counters);

        let snap = counters.snapshot();
        assert_eq!(snap.nb_tx_ok, 1);
        assert_eq!(snap.dw_dgram_rcv, 1);
    }

    #[test]
    fn pull_resp_missing_time_reference_does_not_count_tx() {
        let (endpoint, _server) = live_endpoint();
        let concentrator = Concentrator::start(MockHal::new()).unwrap();
        let timeref = TimeRef::new();
        let xtal = XtalTracker::new();
        let counters: CounterFamily<DownstreamCounters> = CounterFamily::new();

        let txpk = json!({
            "txpk": {
                "time": "2020-01-01T00:00:00Z",
                "freq": 868.1,
                "rfch": 0,
                "modu": "LORA",
                "datr": "SF7BW125",
                "codr": "4/5",
                "size": 0,
                "data": ""
            }
        });
        let mut datagram = vec![1, 0, 0, 3];
        datagram.extend_from_slice(&serde_json::to_vec(&txpk).unwrap());

        handle_pull_resp(&datagram, &endpoint, &concentrator, &timeref, &xtal, &counters);

        let snap = counters.snapshot();
        assert_eq!(snap.nb_tx_ok, 0);
        assert_eq!(snap.nb_tx_fail, 0);
        assert_eq!(snap.dw_dgram_rcv, 1);
    }
}
