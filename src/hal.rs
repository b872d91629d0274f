//! Default concentrator HAL.
//!
//! The concentrator hardware abstraction is an external collaborator (spec
//! §1); this crate fixes only the `ConcentratorHal` trait it consumes. Until
//! a vendor radio driver crate is wired in, `NullHal` satisfies the trait
//! with an always-idle, never-receiving radio so the daemon is buildable and
//! runnable end-to-end against real servers and a real GNSS feed.

use crate::concentrator::{ConcentratorHal, ConcentratorStatus};
use crate::ghost::GhostSource;
use crate::gnss::{GnssFix, GnssHal};
use crate::protocol::rxpk::ReceivedPacket;
use crate::protocol::txpk::TransmitPacket;
use std::time::Duration;

#[derive(Default)]
pub struct NullHal;

impl NullHal {
    pub fn new() -> Self {
        Self
    }
}

impl ConcentratorHal for NullHal {
    fn start(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn receive(&mut self, _max_n: usize) -> Vec<ReceivedPacket> {
        Vec::new()
    }

    fn send(&mut self, _packet: &TransmitPacket) -> Result<(), String> {
        Ok(())
    }

    fn status(&mut self) -> ConcentratorStatus {
        ConcentratorStatus::Free
    }

    fn trigger_counter(&mut self) -> u32 {
        0
    }
}

/// Default GNSS HAL: the serial/NMEA parser is likewise an external
/// collaborator. `NullGnssHal` never produces a fix; the sleep
/// stands in for the real blocking serial read so the ingest loop does not
/// spin.
#[derive(Default)]
pub struct NullGnssHal;

impl NullGnssHal {
    pub fn new() -> Self {
        Self
    }
}

impl GnssHal for NullGnssHal {
    fn read_fix(&mut self) -> Result<Option<GnssFix>, String> {
        std::thread::sleep(Duration::from_millis(500));
        Ok(None)
    }
}

/// Default ghost source: the injector is likewise an external collaborator.
/// `NullGhostSource` never has anything to top up with.
#[derive(Default)]
pub struct NullGhostSource;

impl NullGhostSource {
    pub fn new() -> Self {
        Self
    }
}

impl GhostSource for NullGhostSource {
    fn fetch(&mut self, _max_n: usize) -> Vec<ReceivedPacket> {
        Vec::new()
    }
}
