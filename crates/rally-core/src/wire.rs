//! Rally wire format.
//!
//! These types ARE the protocol. Every message travels as a single UDP
//! datagram: one tag byte followed by the variant's fields in declaration
//! order. Changing a tag or a field layout is a breaking change for every
//! node on the mesh.
//!
//! Datagram payloads (`data` fields) have no length prefix; they run to the
//! end of the datagram, which bounds them at [`MAX_DATAGRAM`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use zerocopy::{AsBytes, FromBytes};

use crate::addr::{AddrKey, ADDR_KEY_LEN};

// ── Messages ──────────────────────────────────────────────────────────────────

const TAG_GET_PEER_LIST: u8 = 0x01;
const TAG_PEER_LIST: u8 = 0x02;
const TAG_KEEP_ALIVE: u8 = 0x03;
const TAG_IS_ALIVE: u8 = 0x04;
const TAG_DATA_RELAY_TO: u8 = 0x05;
const TAG_DATA_RELAYED_FROM: u8 = 0x06;
const TAG_DATA_DIRECT: u8 = 0x07;

/// A protocol message. One per datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Peer → server: register the sender and request the member list.
    GetPeerList,

    /// Server → peer: the current members, excluding the requester.
    /// Body: u16 big-endian count, then count 18-byte address keys.
    PeerList { peers: Vec<AddrKey> },

    /// Peer → peer liveness probe.
    KeepAlive,

    /// Peer → peer reply to a probe. The only message that counts toward
    /// a peer's alive set.
    IsAlive,

    /// Peer → server: forward `data` to the member identified by `to`.
    /// Body: 18-byte target key, then the payload.
    DataRelayTo { to: AddrKey, data: Bytes },

    /// Server → peer: `data` relayed on behalf of the member `from`.
    /// Body: 18-byte origin key, then the payload.
    DataRelayedFrom { from: AddrKey, data: Bytes },

    /// Peer → peer: a payload sent over the direct path. The origin is the
    /// datagram's source address.
    DataDirect { data: Bytes },
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Maximum datagram size, and therefore maximum encoded message size.
/// Matches the receive buffer; larger messages are refused at encode time.
pub const MAX_DATAGRAM: usize = 65536;

/// Inactivity window after which a watchdog declares an address dead.
pub const WATCHDOG_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Period of the peer's rendezvous refresh and keep-alive fan-out.
pub const REFRESH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3);

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown message tag: 0x{0:02x}")]
    UnknownTag(u8),

    #[error("datagram truncated: need {need} more bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("{0} trailing bytes after message body")]
    Trailing(usize),

    #[error("encoded message is {0} bytes, exceeding the datagram bound {}", MAX_DATAGRAM)]
    TooLarge(usize),
}

// ── Codec ─────────────────────────────────────────────────────────────────────

impl Message {
    /// Encode into a single datagram payload.
    ///
    /// Refuses messages whose encoding would not fit in one datagram; the
    /// transport never fragments.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let len = self.encoded_len();
        if len > MAX_DATAGRAM {
            return Err(WireError::TooLarge(len));
        }
        let mut buf = BytesMut::with_capacity(len);
        match self {
            Message::GetPeerList => buf.put_u8(TAG_GET_PEER_LIST),
            Message::PeerList { peers } => {
                buf.put_u8(TAG_PEER_LIST);
                // The size guard above keeps the count far below u16::MAX.
                buf.put_u16(peers.len() as u16);
                for key in peers {
                    buf.put_slice(key.as_bytes());
                }
            }
            Message::KeepAlive => buf.put_u8(TAG_KEEP_ALIVE),
            Message::IsAlive => buf.put_u8(TAG_IS_ALIVE),
            Message::DataRelayTo { to, data } => {
                buf.put_u8(TAG_DATA_RELAY_TO);
                buf.put_slice(to.as_bytes());
                buf.put_slice(data);
            }
            Message::DataRelayedFrom { from, data } => {
                buf.put_u8(TAG_DATA_RELAYED_FROM);
                buf.put_slice(from.as_bytes());
                buf.put_slice(data);
            }
            Message::DataDirect { data } => {
                buf.put_u8(TAG_DATA_DIRECT);
                buf.put_slice(data);
            }
        }
        Ok(buf.freeze())
    }

    /// Decode one datagram. Never panics, whatever the input.
    pub fn decode(datagram: &[u8]) -> Result<Message, WireError> {
        let mut buf = datagram;
        if buf.remaining() < 1 {
            return Err(WireError::Truncated { need: 1, have: 0 });
        }
        let tag = buf.get_u8();
        let message = match tag {
            TAG_GET_PEER_LIST => Message::GetPeerList,
            TAG_PEER_LIST => {
                if buf.remaining() < 2 {
                    return Err(WireError::Truncated { need: 2, have: buf.remaining() });
                }
                let count = buf.get_u16() as usize;
                let need = count * ADDR_KEY_LEN;
                if buf.remaining() < need {
                    return Err(WireError::Truncated { need, have: buf.remaining() });
                }
                let mut peers = Vec::with_capacity(count);
                for _ in 0..count {
                    peers.push(read_key(&mut buf)?);
                }
                Message::PeerList { peers }
            }
            TAG_KEEP_ALIVE => Message::KeepAlive,
            TAG_IS_ALIVE => Message::IsAlive,
            TAG_DATA_RELAY_TO => {
                let to = read_key(&mut buf)?;
                return Ok(Message::DataRelayTo { to, data: take_rest(&mut buf) });
            }
            TAG_DATA_RELAYED_FROM => {
                let from = read_key(&mut buf)?;
                return Ok(Message::DataRelayedFrom { from, data: take_rest(&mut buf) });
            }
            TAG_DATA_DIRECT => {
                return Ok(Message::DataDirect { data: take_rest(&mut buf) });
            }
            other => return Err(WireError::UnknownTag(other)),
        };
        if buf.has_remaining() {
            return Err(WireError::Trailing(buf.remaining()));
        }
        Ok(message)
    }

    fn encoded_len(&self) -> usize {
        1 + match self {
            Message::GetPeerList | Message::KeepAlive | Message::IsAlive => 0,
            Message::PeerList { peers } => 2 + peers.len() * ADDR_KEY_LEN,
            Message::DataRelayTo { data, .. } | Message::DataRelayedFrom { data, .. } => {
                ADDR_KEY_LEN + data.len()
            }
            Message::DataDirect { data } => data.len(),
        }
    }
}

fn read_key(buf: &mut &[u8]) -> Result<AddrKey, WireError> {
    if buf.remaining() < ADDR_KEY_LEN {
        return Err(WireError::Truncated { need: ADDR_KEY_LEN, have: buf.remaining() });
    }
    // Length just checked; read_from only fails on a size mismatch.
    let key = AddrKey::read_from(&buf[..ADDR_KEY_LEN]).ok_or(WireError::Truncated {
        need: ADDR_KEY_LEN,
        have: buf.remaining(),
    })?;
    buf.advance(ADDR_KEY_LEN);
    Ok(key)
}

fn take_rest(buf: &mut &[u8]) -> Bytes {
    let rest = Bytes::copy_from_slice(*buf);
    let len = buf.remaining();
    buf.advance(len);
    rest
}

// ── Tests ─────────────────────────────────────────────────────────────────────
