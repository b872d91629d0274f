//! `stat` JSON body: the periodic status report C9
//! produces and C6 folds into its next PUSH_DATA.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Position used in the `stat` body, sourced from real GNSS or the
/// configured fake-position fallback.
#[derive(Debug, Clone, Copy)]
pub struct GatewayPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: i32,
}

/// Snapshot of everything C9 folds into a `stat` object. Built from the
/// counter families plus static identity strings from config.
#[derive(Debug, Clone)]
pub struct StatSnapshot {
    pub time: DateTime<Utc>,
    pub position: Option<GatewayPosition>,
    pub rx_received: u32,
    pub rx_ok: u32,
    pub rx_forwarded: u32,
    pub up_ack_ratio: f32,
    pub dw_datagrams_received: u32,
    pub tx_ok: u32,
    pub platform: String,
    pub email: String,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct StatJson {
    pub time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lati: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alti: Option<i32>,
    pub rxnb: u32,
    pub rxok: u32,
    pub rxfw: u32,
    pub ackr: f32,
    pub dwnb: u32,
    pub txnb: u32,
    pub pfrm: String,
    pub mail: String,
    pub desc: String,
}

impl StatSnapshot {
    pub fn to_json(&self) -> StatJson {
        StatJson {
            time: self
                .time
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            lati: self.position.map(|p| p.latitude),
            long: self.position.map(|p| p.longitude),
            alti: self.position.map(|p| p.altitude_m),
            rxnb: self.rx_received,
            rxok: self.rx_ok,
            rxfw: self.rx_forwarded,
            ackr: self.up_ack_ratio,
            dwnb: self.dw_datagrams_received,
            txnb: self.tx_ok,
            pfrm: self.platform.clone(),
            mail: self.email.clone(),
            desc: self.description.clone(),
        }
    }

    /// One-line human-readable report, printed unconditionally per spec §7
    /// ("periodic statistics always print even when most data paths are
    /// failing").
    pub fn to_human_report(&self) -> String {
        format!(
            "RX {}/{} ({} fwd) | ACK {:.1}% | TX {} ok | DW {} dgram",
            self.rx_ok,
            self.rx_received,
            self.rx_forwarded,
            self.up_ack_ratio * 100.0,
            self.tx_ok,
            self.dw_datagrams_received
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> StatSnapshot {
        StatSnapshot {
            time: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            position: Some(GatewayPosition {
                latitude: 53.35,
                longitude: -6.26,
                altitude_m: 12,
            }),
            rx_received: 10,
            rx_ok: 9,
            rx_forwarded: 9,
            up_ack_ratio: 1.0,
            dw_datagrams_received: 2,
            tx_ok: 2,
            platform: "test-gateway".into(),
            email: "ops@example.com".into(),
            description: "integration test".into(),
        }
    }

    #[test]
    fn json_includes_position_when_available() {
        let json = sample().to_json();
        let value = serde_json::to_value(&json).unwrap();
        assert_eq!(value["lati"], 53.35);
        assert_eq!(value["long"], -6.26);
        assert_eq!(value["alti"], 12);
        assert_eq!(value["rxnb"], 10);
    }

    #[test]
    fn json_omits_position_when_unavailable() {
        let mut snapshot = sample();
        snapshot.position = None;
        let value = serde_json::to_value(snapshot.to_json()).unwrap();
        assert!(value.get("lati").is_none());
        assert!(value.get("long").is_none());
        assert!(value.get("alti").is_none());
    }

    #[test]
    fn human_report_mentions_ack_percentage() {
        let report = sample().to_human_report();
        assert!(report.contains("100.0%"));
    }
}
