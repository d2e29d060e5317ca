//! rally-core: shared types for the rally mesh.
//! Address keys, the wire format, and configuration. All other rally crates
//! depend on this one.

pub mod addr;
pub mod config;
pub mod wire;

pub use addr::AddrKey;
pub use wire::{Message, WireError, MAX_DATAGRAM, REFRESH_INTERVAL, WATCHDOG_TIMEOUT};
