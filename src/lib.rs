//! LoRa packet-forwarding gateway daemon: concentrator-to-server bridge over
//! the gateway-to-server UDP protocol.
//!
//! See `DESIGN.md` for how the external system this crate implements maps
//! onto the modules below.

pub mod beacon;
pub mod concentrator;
pub mod config;
pub mod counters;
pub mod downstream;
pub mod endpoint;
pub mod error;
pub mod ghost;
pub mod gnss;
pub mod hal;
pub mod position;
pub mod protocol;
pub mod shutdown;
pub mod stats;
pub mod supervisor;
pub mod timeref;
pub mod upstream;
