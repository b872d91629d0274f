//! Concentrator gateway.
//!
//! Wraps the hardware abstraction (an external collaborator, out of scope
//! per spec §1) behind a single coarse mutex. Every operation acquires the
//! lock and releases it before returning; the radio itself is the
//! bottleneck, so finer-grained locking buys nothing.

use crate::error::GatewayError;
use crate::protocol::rxpk::ReceivedPacket;
use crate::protocol::txpk::TransmitPacket;
use std::sync::Mutex;

/// Sentinel trigger-counter value indicating a spurious hardware reset.
/// The supervisor polls for this and terminates the process.
pub const SPURIOUS_RESET_COUNTER: u32 = 0x7E00_0000;

/// Concentrator status as reported by the hardware abstraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcentratorStatus {
    Free,
    Emitting,
    Scheduled,
    Unknown,
}

/// The concentrator hardware abstraction this daemon bridges to. Out of
/// scope per spec §1; only this interface is fixed. Implementations are not
/// required to be internally thread-safe — `Concentrator<H>` below
/// guarantees at most one call is in flight at a time.
pub trait ConcentratorHal: Send {
    /// Start the hardware. Called once at boot.
    fn start(&mut self) -> Result<(), String>;
    /// Stop the hardware. Called once at shutdown.
    fn stop(&mut self);
    /// Fetch up to `max_n` newly received packets.
    fn receive(&mut self, max_n: usize) -> Vec<ReceivedPacket>;
    /// Submit a packet for transmission.
    fn send(&mut self, packet: &TransmitPacket) -> Result<(), String>;
    /// Current hardware status.
    fn status(&mut self) -> ConcentratorStatus;
    /// Free-running microsecond counter.
    fn trigger_counter(&mut self) -> u32;
}

/// Serialises all access to a `ConcentratorHal` behind one mutex.
pub struct Concentrator<H: ConcentratorHal> {
    hal: Mutex<H>,
}

impl<H: ConcentratorHal> Concentrator<H> {
    /// Start the underlying hardware. A failure here is fatal.
    pub fn start(mut hal: H) -> Result<Self, GatewayError> {
        hal.start()
            .map_err(GatewayError::ConcentratorStart)?;
        Ok(Self { hal: Mutex::new(hal) })
    }

    pub fn stop(&self) {
        self.hal.lock().expect("concentrator mutex poisoned").stop();
    }

    pub fn receive(&self, max_n: usize) -> Vec<ReceivedPacket> {
        self.hal
            .lock()
            .expect("concentrator mutex poisoned")
            .receive(max_n)
    }

    pub fn send(&self, packet: &TransmitPacket) -> Result<(), String> {
        self.hal
            .lock()
            .expect("concentrator mutex poisoned")
            .send(packet)
    }

    pub fn status(&self) -> ConcentratorStatus {
        self.hal.lock().expect("concentrator mutex poisoned").status()
    }

    pub fn trigger_counter(&self) -> u32 {
        self.hal
            .lock()
            .expect("concentrator mutex poisoned")
            .trigger_counter()
    }
}

/// True iff `counter` is the spurious-reset sentinel.
pub fn is_spurious_reset(counter: u32) -> bool {
    counter == SPURIOUS_RESET_COUNTER
}


#[cfg(test)]
mod tests {
    use super::mock::MockHal;
    use super::*;

    #[test]
    fn start_failure_is_fatal() {
        let mut hal = MockHal::new();
        hal.fail_start = true;
        let err = Concentrator::start(hal).unwrap_err();
        assert!(matches!(err, GatewayError::ConcentratorStart(_)));
    }

    #[test]
    fn receive_drains_up_to_cap() {
        let mut hal = MockHal::new();
        for i in 0..10u32 {
            hal.rx_queue.push_back(crate::protocol::rxpk::ReceivedPacket {
                count_us: i,
                if_chain: 0,
                rf_chain: 0,
                freq_hz: 868_100_000,
                crc_status: crate::protocol::rxpk::CrcStatus::Ok,
                modulation: crate::protocol::rxpk::Modulation::Lora,
                data_rate: crate::protocol::rxpk::DataRate::Lora(
                    crate::protocol::rxpk::SpreadingFactor(7),
                    crate::protocol::rxpk::Bandwidth(125),
                ),
                coding_rate: crate::protocol::rxpk::CodingRate::Cr4_5,
                rssi_dbm: -80,
                snr_db: Some(9.0),
                payload: vec![],
            });
        }
        let concentrator = Concentrator::start(hal).unwrap();
        let batch = concentrator.receive(8);
        assert_eq!(batch.len(), 8);
        let rest = concentrator.receive(8);
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn spurious_reset_detection() {
        assert!(is_spurious_reset(SPURIOUS_RESET_COUNTER));
        assert!(!is_spurious_reset(0x1234));
    }
}
