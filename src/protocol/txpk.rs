//! Downlink packet model: `TransmitPacket` and the `txpk` JSON
//! parser used by the downstream PULL session to turn a
//! PULL_RESP body into something the concentrator can transmit.

use super::rxpk::{Bandwidth, CodingRate, DataRate, Modulation, SpreadingFactor};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;

/// Preamble length floors/defaults.
pub const MIN_LORA_PREAMB: u32 = 6;
pub const STD_LORA_PREAMB: u32 = 8;
pub const MIN_FSK_PREAMB: u32 = 3;
pub const STD_FSK_PREAMB: u32 = 4;

/// When a transmit job is scheduled on the concentrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    Immediate,
    /// Scheduled against the concentrator's free-running counter.
    Timestamped(u32),
    OnGpsPps,
}

/// A transmit job built from a PULL_RESP, consumed once by the
/// concentrator. See spec §3 DATA MODEL.
#[derive(Debug, Clone)]
pub struct TransmitPacket {
    pub mode: TxMode,
    pub freq_hz: u64,
    pub rf_chain: u8,
    pub power_dbm: i8,
    pub modulation: Modulation,
    pub data_rate: DataRate,
    pub coding_rate: CodingRate,
    pub invert_polarity: bool,
    pub preamble: u32,
    pub no_crc: bool,
    pub no_header: bool,
    pub size: usize,
    pub payload: Vec<u8>,
}

/// Why a PULL_RESP's `txpk` object could not be turned into a
/// `TransmitPacket`. Every variant corresponds to a case spec §4.6 calls out
/// as "abort this packet with a warning and continue".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxPkError {
    MissingField(&'static str),
    InvalidField(&'static str),
    UnknownModulation(String),
    UnparsableDatr(String),
    UnparsableCodr(String),
    PayloadSizeMismatch { declared: usize, actual: usize },
    /// `time` was given but there is no valid time reference to convert it.
    NoTimeReference,
}

impl fmt::Display for TxPkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(name) => write!(f, "missing mandatory field '{name}'"),
            Self::InvalidField(name) => write!(f, "invalid value for field '{name}'"),
            Self::UnknownModulation(m) => write!(f, "unknown modulation '{m}'"),
            Self::UnparsableDatr(d) => write!(f, "unparsable datr '{d}'"),
            Self::UnparsableCodr(c) => write!(f, "unparsable codr '{c}'"),
            Self::PayloadSizeMismatch { declared, actual } => write!(
                f,
                "declared size {declared} does not match decoded payload length {actual}"
            ),
            Self::NoTimeReference => write!(f, "'time' requested but no valid time reference"),
        }
    }
}

impl std::error::Error for TxPkError {}

/// Parse a `txpk` JSON object into a `TransmitPacket`.
///
/// `utc_to_counter` converts a UTC instant to a concentrator counter value
/// using the current time reference; it returns `None` when no valid time
/// reference exists, which aborts parsing per spec §4.6.
pub fn parse_txpk(
    txpk: &Value,
    utc_to_counter: impl FnOnce(DateTime<Utc>) -> Option<u32>,
) -> Result<TransmitPacket, TxPkError> {
    let mode = parse_mode(txpk, utc_to_counter)?;

    let freq_mhz = txpk
        .get("freq")
        .and_then(Value::as_f64)
        .ok_or(TxPkError::MissingField("freq"))?;
    let freq_hz = (freq_mhz * 1_000_000.0).round() as u64;

    let rfch = txpk
        .get("rfch")
        .and_then(Value::as_u64)
        .ok_or(TxPkError::MissingField("rfch"))? as u8;

    let modu_str = txpk
        .get("modu")
        .and_then(Value::as_str)
        .ok_or(TxPkError::MissingField("modu"))?;

    let size = txpk
        .get("size")
        .and_then(Value::as_u64)
        .ok_or(TxPkError::MissingField("size"))? as usize;

    let data_str = txpk
        .get("data")
        .and_then(Value::as_str)
        .ok_or(TxPkError::MissingField("data"))?;
    let payload = BASE64
        .decode(data_str)
        .map_err(|_| TxPkError::InvalidField("data"))?;
    if payload.len() != size {
        return Err(TxPkError::PayloadSizeMismatch {
            declared: size,
            actual: payload.len(),
        });
    }

    let power_dbm = txpk
        .get("powe")
        .and_then(Value::as_i64)
        .unwrap_or(14) as i8;
    let no_crc = txpk.get("ncrc").and_then(Value::as_bool).unwrap_or(false);
    let invert_polarity = txpk.get("ipol").and_then(Value::as_bool).unwrap_or(false);

    let (modulation, data_rate, coding_rate, preamble) = match modu_str {
        "LORA" => {
            let datr = txpk
                .get("datr")
                .and_then(Value::as_str)
                .ok_or(TxPkError::MissingField("datr"))?;
            let (sf, bw) = parse_lora_datr(datr).ok_or_else(|| TxPkError::UnparsableDatr(datr.to_string()))?;

            let codr_str = txpk
                .get("codr")
                .and_then(Value::as_str)
                .ok_or(TxPkError::MissingField("codr"))?;
            let codr = CodingRate::parse(codr_str)
                .filter(|c| *c != CodingRate::Off)
                .ok_or_else(|| TxPkError::UnparsableCodr(codr_str.to_string()))?;

            let preamble = txpk
                .get("prea")
                .and_then(Value::as_u64)
                .map(|p| (p as u32).max(MIN_LORA_PREAMB))
                .unwrap_or(STD_LORA_PREAMB);

            (Modulation::Lora, DataRate::Lora(sf, bw), codr, preamble)
        }
        "FSK" => {
            let bps = txpk
                .get("datr")
                .and_then(Value::as_u64)
                .ok_or(TxPkError::MissingField("datr"))? as u32;
            let _fdev_khz = txpk
                .get("fdev")
                .and_then(Value::as_f64)
                .ok_or(TxPkError::MissingField("fdev"))?
                / 1000.0;

            let preamble = txpk
                .get("prea")
                .and_then(Value::as_u64)
                .map(|p| (p as u32).max(MIN_FSK_PREAMB))
                .unwrap_or(STD_FSK_PREAMB);

            (Modulation::Fsk, DataRate::Fsk(bps), CodingRate::Off, preamble)
        }
        other => return Err(TxPkError::UnknownModulation(other.to_string())),
    };

    let no_header = txpk
        .get("header")
        .and_then(Value::as_bool)
        .map(|h| !h)
        .unwrap_or(false);

    Ok(TransmitPacket {
        mode,
        freq_hz,
        rf_chain: rfch,
        power_dbm,
        modulation,
        data_rate,
        coding_rate,
        invert_polarity,
        preamble,
        no_crc,
        no_header,
        size,
        payload,
    })
}

fn parse_mode(
    txpk: &Value,
    utc_to_counter: impl FnOnce(DateTime<Utc>) -> Option<u32>,
) -> Result<TxMode, TxPkError> {
    if txpk.get("imme").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(TxMode::Immediate);
    }
    if let Some(tmst) = txpk.get("tmst").and_then(Value::as_u64) {
        return Ok(TxMode::Timestamped(tmst as u32));
    }
    if let Some(time_str) = txpk.get("time").and_then(Value::as_str) {
        let utc = DateTime::parse_from_rfc3339(time_str)
            .map_err(|_| TxPkError::InvalidField("time"))?
            .with_timezone(&Utc);
        let counter = utc_to_counter(utc).ok_or(TxPkError::NoTimeReference)?;
        return Ok(TxMode::Timestamped(counter));
    }
    Err(TxPkError::MissingField("imme|tmst|time"))
}

/// Parse `SF{7..12}BW{125|250|500}`.
fn parse_lora_datr(s: &str) -> Option<(SpreadingFactor, Bandwidth)> {
    let rest = s.strip_prefix("SF")?;
    let bw_pos = rest.find("BW")?;
    let sf: u8 = rest[..bw_pos].parse().ok()?;
    let bw: u32 = rest[bw_pos + 2..].parse().ok()?;
    if !(7..=12).contains(&sf) {
        return None;
    }
    if !matches!(bw, 125 | 250 | 500) {
        return None;
    }
    Some((SpreadingFactor(sf), Bandwidth(bw)))
}
