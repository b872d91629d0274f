//! Ghost-packet source: an external collaborator that injects synthetic
//! uplinks onto the same upstream path as real radio packets. The actual
//! source is out of scope here; only this interface is fixed.

use crate::protocol::rxpk::ReceivedPacket;

/// Supplies synthetic `ReceivedPacket`s used to top up a batch that the
/// concentrator alone did not fill.
pub trait GhostSource: Send {
    /// Return up to `max_n` packets. May return fewer, including zero.
    fn fetch(&mut self, max_n: usize) -> Vec<ReceivedPacket>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    pub struct MockGhostSource {
        pub queue: VecDeque<ReceivedPacket>,
    }

    impl GhostSource for MockGhostSource {
        fn fetch(&mut self, max_n: usize) -> Vec<ReceivedPacket> {
            let mut out = Vec::new();
            while out.len() < max_n {
                match self.queue.pop_front() {
                    Some(p) => out.push(p),
                    None => break,
                }
            }
            out
        }
    }
}
