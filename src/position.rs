//! Current gateway position, shared between GNSS ingest (C3, writer), the
//! fake-position startup path, statistics (C9, reader) and the beacon
//! scheduler (C8, reader). Spec §3/§4.3.

use crate::protocol::stat::GatewayPosition;
use std::sync::Mutex;

#[derive(Default)]
pub struct PositionSlot(Mutex<Option<GatewayPosition>>);

impl PositionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, position: GatewayPosition) {
        *self.0.lock().expect("position mutex poisoned") = Some(position);
    }

    pub fn get(&self) -> Option<GatewayPosition> {
        *self.0.lock().expect("position mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty_and_reflects_last_write() {
        let slot = PositionSlot::new();
        assert!(slot.get().is_none());
        slot.set(GatewayPosition {
            latitude: 1.0,
            longitude: 2.0,
            altitude_m: 3,
        });
        let pos = slot.get().unwrap();
        assert_eq!(pos.latitude, 1.0);
        assert_eq!(pos.altitude_m, 3);
    }
}
