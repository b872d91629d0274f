//! Uplink packet model: `ReceivedPacket` and its `rxpk` JSON
//! representation, produced by the concentrator or the
//! ghost source and consumed read-only downstream by the upstream fan-out.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_repr::Serialize_repr;

/// CRC status of a received packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr)]
#[repr(i8)]
pub enum CrcStatus {
    Fail = -1,
    None = 0,
    Ok = 1,
}

/// Radio modulation used for the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulation {
    Lora,
    Fsk,
}

impl Modulation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lora => "LORA",
            Self::Fsk => "FSK",
        }
    }
}

/// LoRa spreading factor, SF7..SF12.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpreadingFactor(pub u8);

/// LoRa channel bandwidth in kHz: 125/250/500.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bandwidth(pub u32);

/// LoRa/FSK data rate, per §3: LoRa SF7..SF12, or FSK bits/s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRate {
    Lora(SpreadingFactor, Bandwidth),
    Fsk(u32),
}

impl DataRate {
    /// Render the wire `datr` field: `SF<x>BW<y>` for LoRa, integer bits/s
    /// for FSK.
    pub fn to_wire_string(self) -> String {
        match self {
            Self::Lora(sf, bw) => format!("SF{}BW{}", sf.0, bw.0),
            Self::Fsk(bps) => bps.to_string(),
        }
    }
}

/// LoRa forward error correction coding rate, `4/5`..`4/8`, or `OFF` (FSK).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodingRate {
    Cr4_5,
    Cr4_6,
    Cr4_7,
    Cr4_8,
    Off,
}

impl CodingRate {
    pub fn to_wire_string(self) -> &'static str {
        match self {
            Self::Cr4_5 => "4/5",
            Self::Cr4_6 => "4/6",
            Self::Cr4_7 => "4/7",
            Self::Cr4_8 => "4/8",
            Self::Off => "OFF",
        }
    }

    /// Parse a coding-rate string as accepted on the downlink side (spec
    /// §4.6): `4/6` and `2/3` are the same rate, as are `4/8` and `1/2`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "4/5" => Some(Self::Cr4_5),
            "4/6" | "2/3" => Some(Self::Cr4_6),
            "4/7" => Some(Self::Cr4_7),
            "4/8" | "1/2" => Some(Self::Cr4_8),
            "OFF" => Some(Self::Off),
            _ => None,
        }
    }
}

/// A packet received from the concentrator (or injected by the ghost
/// source). Read-only once created; see spec §3 DATA MODEL.
#[derive(Debug, Clone)]
pub struct ReceivedPacket {
    /// Concentrator counter timestamp at "RX finished", microseconds.
    pub count_us: u32,
    pub if_chain: u8,
    pub rf_chain: u8,
    pub freq_hz: u64,
    pub crc_status: CrcStatus,
    pub modulation: Modulation,
    pub data_rate: DataRate,
    pub coding_rate: CodingRate,
    pub rssi_dbm: i32,
    /// SNR in dB; only meaningful for LoRa.
    pub snr_db: Option<f32>,
    pub payload: Vec<u8>,
}

impl ReceivedPacket {
    /// True iff this packet should be forwarded given the configured filter
    /// flags. The mapping from CRC status to
    /// forward/drop is total: every status maps to exactly one flag.
    pub fn passes_filter(&self, forward_ok: bool, forward_error: bool, forward_disabled: bool) -> bool {
        match self.crc_status {
            CrcStatus::Ok => forward_ok,
            CrcStatus::Fail => forward_error,
            CrcStatus::None => forward_disabled,
        }
    }

    /// Render the `rxpk` JSON element. `precise_time` is the TimeRef-derived
    /// UTC instant for this packet's `tmst` if the time reference was valid
    /// at fetch time; otherwise the caller passes the local wall-clock time
    /// at which the batch was fetched, matching spec §4.5.
    pub fn to_rxpk(&self, time: DateTime<Utc>) -> RxPk {
        RxPk {
            tmst: self.count_us,
            time: time.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            chan: self.if_chain,
            rfch: self.rf_chain,
            freq: self.freq_hz as f64 / 1_000_000.0,
            stat: self.crc_status,
            modu: self.modulation.as_str(),
            datr: self.data_rate.to_wire_string(),
            codr: self.coding_rate.to_wire_string(),
            lsnr: self.snr_db,
            rssi: self.rssi_dbm,
            size: self.payload.len() as u32,
            data: BASE64.encode(&self.payload),
        }
    }
}

/// Wire shape of a single `rxpk` array element.
#[derive(Debug, Clone, Serialize)]
pub struct RxPk {
    pub tmst: u32,
    pub time: String,
    pub chan: u8,
    pub rfch: u8,
    #[serde(serialize_with = "serialize_freq")]
    pub freq: f64,
    pub stat: CrcStatus,
    pub modu: &'static str,
    pub datr: String,
    pub codr: &'static str,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_lsnr")]
    pub lsnr: Option<f32>,
    pub rssi: i32,
    pub size: u32,
    pub data: String,
}

/// `freq` is rendered with 6 decimal places (MHz, Hz precision) per spec.
fn serialize_freq<S>(freq: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64((freq * 1_000_000.0).round() / 1_000_000.0)
}

/// `lsnr` is rendered with 1 decimal place, matching the original `"%.1f"`.
fn serialize_lsnr<S>(lsnr: &Option<f32>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match lsnr {
        Some(v) => serializer.serialize_f32((v * 10.0).round() / 10.0),
        None => serializer.serialize_none(),
    }
}
