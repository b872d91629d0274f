//! Statistics counter families: `UpstreamCounters`,
//! `DownstreamCounters`, `GpsCounters`. Each family is guarded by its own
//! leaf mutex, never nested with the concentrator or time-reference locks,
//! and is reset to zero whenever C9 snapshots it.

use std::sync::Mutex;

/// A counter family guarded by its own mutex. Generic over the plain data
/// struct so each family (`UpstreamCounters`, `DownstreamCounters`,
/// `GpsCounters`) gets the same snapshot-and-reset semantics without
/// repeating the locking boilerplate.
pub struct CounterFamily<T> {
    inner: Mutex<T>,
}

impl<T: Default + Copy> CounterFamily<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(T::default()),
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut guard = self.inner.lock().expect("counter mutex poisoned");
        f(&mut guard);
    }

    /// Copy the current values out and zero the family, as C9 does once per
    /// reporting interval.
    pub fn snapshot_and_reset(&self) -> T {
        let mut guard = self.inner.lock().expect("counter mutex poisoned");
        let snapshot = *guard;
        *guard = T::default();
        snapshot
    }

    pub fn snapshot(&self) -> T {
        *self.inner.lock().expect("counter mutex poisoned")
    }
}

impl<T: Default + Copy> Default for CounterFamily<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Upstream fan-out counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpstreamCounters {
    pub rx_received: u32,
    pub rx_ok: u32,
    pub rx_forwarded: u32,
    pub datagrams_sent: u32,
    pub ack_received: u32,
}

/// Downstream PULL session (C7, summed across endpoints) counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownstreamCounters {
    pub dw_pull_sent: u32,
    pub dw_ack_rcv: u32,
    pub dw_dgram_rcv: u32,
    pub dw_network_byte: u32,
    pub dw_payload_byte: u32,
    pub nb_tx_ok: u32,
    pub nb_tx_fail: u32,
}

/// GNSS ingest counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct GpsCounters {
    pub syncs_ok: u32,
    pub syncs_failed: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_and_reset_zeroes_family() {
        let counters: CounterFamily<UpstreamCounters> = CounterFamily::new();
        counters.update(|c| {
            c.rx_received += 5;
            c.rx_ok += 4;
        });
        let snap = counters.snapshot_and_reset();
        assert_eq!(snap.rx_received, 5);
        assert_eq!(snap.rx_ok, 4);

        let after = counters.snapshot();
        assert_eq!(after.rx_received, 0);
    }

    #[test]
    fn downstream_ack_counts_are_independent_of_dgram_counts() {
        let counters: CounterFamily<DownstreamCounters> = CounterFamily::new();
        counters.update(|c| c.dw_ack_rcv += 1);
        counters.update(|c| c.dw_dgram_rcv += 3);
        let snap = counters.snapshot();
        assert_eq!(snap.dw_ack_rcv, 1);
        assert_eq!(snap.dw_dgram_rcv, 3);
    }
}
