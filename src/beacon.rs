//! Beacon scheduler.
//!
//! Runs as its own task, armed by a single-slot handoff from GNSS ingest
//! rather than inlined inside a downstream session, so a busy PULL socket
//! can never delay the beacon's PPS-aligned transmit.

use crate::concentrator::{Concentrator, ConcentratorHal, ConcentratorStatus};
use crate::protocol::rxpk::{Bandwidth, CodingRate, DataRate, Modulation, SpreadingFactor};
use crate::protocol::stat::GatewayPosition;
use crate::protocol::txpk::{TransmitPacket, TxMode, MIN_LORA_PREAMB};
use crate::position::PositionSlot;
use crate::shutdown::ShutdownToken;
use crate::timeref::{TimeRef, XtalTracker};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::Duration;

const BEACON_NET_ID: u32 = 0xC0FFEE;
const BEACON_POLL_MS: u64 = 50;
const BEACON_POLL_MAX: u32 = 30;

/// Pre-arm signal sent by GNSS ingest the second before the target PPS.
#[derive(Debug, Clone, Copy)]
pub struct BeaconArm {
    /// UTC unix-epoch second this beacon's PPS targets.
    pub target_utc_unix_secs: u32,
}

#[derive(Clone)]
pub struct BeaconArmTx(SyncSender<BeaconArm>);

impl BeaconArmTx {
    /// Best-effort: if the previous arm hasn't been consumed yet, drop this
    /// one rather than block the GNSS ingest thread.
    pub fn arm(&self, signal: BeaconArm) {
        let _ = self.0.try_send(signal);
    }
}

pub struct BeaconArmRx(Receiver<BeaconArm>);

/// A fresh single-slot beacon-arm channel.
pub fn channel() -> (BeaconArmTx, BeaconArmRx) {
    let (tx, rx) = sync_channel(1);
    (BeaconArmTx(tx), BeaconArmRx(rx))
}

/// CRC-8-CCITT, poly `0x87`, init `0xFF`, no reflection.
pub fn crc8_ccitt(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x87 } else { crc << 1 };
        }
    }
    crc
}

/// CRC-CCITT-16, poly `0x1021`, init `0xFFFF`, no reflection, big-endian
/// output.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
    }
    crc
}

/// Encode a latitude as a signed 24-bit little-endian fraction of 2^23,
/// clamped to the representable range.
fn encode_latitude(lat: f64) -> [u8; 3] {
    let raw = ((lat / 90.0) * 8_388_608.0).round() as i64;
    let clamped = raw.clamp(-8_388_608, 8_388_607) as i32;
    let bytes = clamped.to_le_bytes();
    [bytes[0], bytes[1], bytes[2]]
}

/// Encode a longitude as a signed 24-bit little-endian fraction of 2^23,
/// masked (not clamped) to 24 bits.
fn encode_longitude(lon: f64) -> [u8; 3] {
    let raw = ((lon / 180.0) * 8_388_608.0).round() as i64;
    let masked = (raw as u32) & 0x00FF_FFFF;
    let bytes = masked.to_le_bytes();
    [bytes[0], bytes[1], bytes[2]]
}

/// Build the fixed 17-byte beacon payload.
pub fn encode_beacon_frame(utc_unix_secs: u32, info: u8, position: GatewayPosition) -> [u8; 17] {
    let mut frame = [0u8; 17];

    let netid = BEACON_NET_ID.to_le_bytes();
    frame[0..3].copy_from_slice(&netid[0..3]);
    frame[3..7].copy_from_slice(&utc_unix_secs.to_le_bytes());
    frame[7] = crc8_ccitt(&frame[0..7]);

    frame[8] = info;
    frame[9..12].copy_from_slice(&encode_latitude(position.latitude));
    frame[12..15].copy_from_slice(&encode_longitude(position.longitude));

    let crc16 = crc16_ccitt(&frame[8..15]);
    frame[15..17].copy_from_slice(&crc16.to_be_bytes());

    frame
}

/// Build the fixed-parameter transmit job for a beacon.
pub fn build_transmit_packet(utc_unix_secs: u32, position: GatewayPosition, xtal_multiplier: f64, beacon_freq_hz: u64) -> TransmitPacket {
    let frame = encode_beacon_frame(utc_unix_secs, 0, position);
    TransmitPacket {
        mode: TxMode::OnGpsPps,
        freq_hz: (xtal_multiplier * beacon_freq_hz as f64).round() as u64,
        rf_chain: 0,
        power_dbm: 14,
        modulation: Modulation::Lora,
        data_rate: DataRate::Lora(SpreadingFactor(9), Bandwidth(125)),
        coding_rate: CodingRate::Cr4_5,
        invert_polarity: true,
        preamble: MIN_LORA_PREAMB,
        no_crc: true,
        no_header: true,
        size: frame.len(),
        payload: frame.to_vec(),
    }
}

/// Submit `packet` to the concentrator and poll status until `FREE` or the
/// poll budget is exhausted.
pub fn schedule_and_confirm<H: ConcentratorHal>(concentrator: &Concentrator<H>, packet: &TransmitPacket) -> bool {
    if concentrator.send(packet).is_err() {
        return false;
    }
    for _ in 0..BEACON_POLL_MAX {
        if concentrator.status() == ConcentratorStatus::Free {
            return true;
        }
        thread::sleep(Duration::from_millis(BEACON_POLL_MS));
    }
    false
}

/// The beacon task body: block on the arm channel, and on each arm, check
/// that GNSS + XTAL are both valid before scheduling.
pub fn run<H: ConcentratorHal>(
    concentrator: &Concentrator<H>,
    arm_rx: BeaconArmRx,
    timeref: &TimeRef,
    xtal: &XtalTracker,
    position: &PositionSlot,
    beacon_freq_hz: u64,
    shutdown: &ShutdownToken,
) {
    while !shutdown.should_exit() {
        let arm = match arm_rx.0.recv_timeout(Duration::from_millis(200)) {
            Ok(arm) => arm,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let time_snapshot = timeref.snapshot();
        let xtal_snapshot = xtal.snapshot();
        if !time_snapshot.is_valid() || !xtal_snapshot.valid {
            log::warn!(target: "main", "beacon arm dropped: time reference or XTAL not valid");
            continue;
        }

        let Some(pos) = position.get() else {
            log::warn!(target: "main", "beacon arm dropped: no position available");
            continue;
        };

        let packet = build_transmit_packet(arm.target_utc_unix_secs, pos, xtal_snapshot.multiplier, beacon_freq_hz);
        if schedule_and_confirm(concentrator, &packet) {
            log::info!(target: "main", "beacon transmitted for second {}", arm.target_utc_unix_secs);
        } else {
            log::warn!(target: "main", "beacon scheduling failed or did not confirm FREE in time");
        }
    }
}
