//! Canonical endpoint identity.
//!
//! A UDP endpoint is identified by an 18-byte key: the IPv6 form of its IP
//! (IPv4 addresses in their IPv4-mapped form) followed by the port in
//! big-endian. The key is the wire-level peer identifier and the map key for
//! every membership table, so two endpoints are the same peer iff their keys
//! are byte-equal.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Wire size of an [`AddrKey`] in bytes.
pub const ADDR_KEY_LEN: usize = 18;

/// Canonical 18-byte endpoint key.
///
/// Bytes 0..16 hold the IPv6 form of the IP, bytes 16..18 the port in
/// big-endian. This layout is part of the wire format.
#[derive(Clone, Copy, PartialEq, Eq, Hash, AsBytes, FromBytes, FromZeroes)]
#[repr(transparent)]
pub struct AddrKey([u8; ADDR_KEY_LEN]);

assert_eq_size!(AddrKey, [u8; 18]);

impl AddrKey {
    /// Build the canonical key for an endpoint.
    ///
    /// Total: every UDP endpoint has exactly one key, and endpoints that
    /// differ only in IPv4 vs IPv4-mapped-IPv6 notation get the same key.
    pub fn from_endpoint(endpoint: SocketAddr) -> Self {
        let ip6: Ipv6Addr = match endpoint.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        let mut key = [0u8; ADDR_KEY_LEN];
        key[..16].copy_from_slice(&ip6.octets());
        key[16..].copy_from_slice(&endpoint.port().to_be_bytes());
        Self(key)
    }

    /// Reconstruct the endpoint this key was built from.
    ///
    /// An IPv4-mapped key yields a V4 `SocketAddr`, so the result can be
    /// handed straight back to a dual-stack or V4 socket.
    pub fn endpoint(&self) -> SocketAddr {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.0[..16]);
        let ip6 = Ipv6Addr::from(octets);
        let port = u16::from_be_bytes([self.0[16], self.0[17]]);
        match ip6.to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), port),
            None => SocketAddr::new(IpAddr::V6(ip6), port),
        }
    }

    /// The port half of the key.
    pub fn port(&self) -> u16 {
        u16::from_be_bytes([self.0[16], self.0[17]])
    }
}

impl fmt::Display for AddrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}

impl fmt::Debug for AddrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AddrKey({})", hex::encode(self.0))
    }
}
