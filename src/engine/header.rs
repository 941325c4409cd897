//! Flood-header codec and two-phase validation.
//!
//! The wire header is one or two bytes:
//!
//! ```text
//! byte 0: [7:5] deployment tag | [4] sync flag | [3:0] n_tx_max (0 = unbounded)
//! byte 1: relay counter        (present iff sync flag set, or the deployment
//!                               always carries the relay counter)
//! ```
//!
//! Validation happens twice per frame. The header phase runs as soon as the
//! first byte and the radio's length byte are available, so a foreign or
//! malformed frame can be aborted mid-air. The full phase re-runs the same
//! checks on the completed frame after CRC verification; the length bound is
//! deliberately re-checked there because length signalling from radio
//! front-ends has proven unreliable.

use crate::config::{ALWAYS_RELAY_CNT, HEADER_TAG, MAX_PACKET_LEN};

/// Decoded flood header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FloodHeader {
    /// Whether this flood distributes a time reference.
    pub with_sync: bool,
    /// Per-node transmission budget carried on the wire; 0 means unbounded.
    pub n_tx_max: u8,
    /// Hop distance from the initiator, incremented by every retransmitter.
    pub relay_cnt: u8,
}

/// Locally expected header fields; `None` means not yet learned and accepts
/// whatever arrives.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpectedHeader {
    pub with_sync: Option<bool>,
    pub n_tx_max: Option<u8>,
    pub payload_len: Option<u8>,
}

/// Why an incoming frame was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderReject {
    /// Deployment tag mismatch.
    Tag,
    /// Sync flag differs from the flood in progress.
    SyncMode,
    /// Transmission budget differs from the flood in progress.
    TxMax,
    /// Frame length out of bounds or inconsistent with the known payload.
    Length,
}

/// Header length implied by the sync flag.
pub const fn header_len(with_sync: bool) -> usize {
    if with_sync || ALWAYS_RELAY_CNT { 2 } else { 1 }
}

impl FloodHeader {
    /// Number of header bytes this header occupies on the wire.
    pub const fn len(&self) -> usize {
        header_len(self.with_sync)
    }

    /// Encode into `buf`, returning the number of bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        buf[0] = (HEADER_TAG << 5) | ((self.with_sync as u8) << 4) | (self.n_tx_max & 0x0f);
        let len = self.len();
        if len == 2 {
            buf[1] = self.relay_cnt;
        }
        len
    }

    /// Decode from the start of a frame. The frame must already have passed
    /// [`check_frame`]; this only splits the bits back apart.
    pub fn decode(frame: &[u8]) -> FloodHeader {
        let with_sync = frame[0] & 0x10 != 0;
        let relay_cnt = if header_len(with_sync) == 2 { frame[1] } else { 0 };
        FloodHeader {
            with_sync,
            n_tx_max: frame[0] & 0x0f,
            relay_cnt,
        }
    }
}

/// Header-phase validation: first header byte plus the radio length byte.
pub fn check_first_byte(byte0: u8, pkt_len: u8, expected: &ExpectedHeader) -> Result<(), HeaderReject> {
    if byte0 >> 5 != HEADER_TAG {
        return Err(HeaderReject::Tag);
    }
    let with_sync = byte0 & 0x10 != 0;
    if expected.with_sync.is_some_and(|s| s != with_sync) {
        return Err(HeaderReject::SyncMode);
    }
    if expected.n_tx_max.is_some_and(|n| n != byte0 & 0x0f) {
        return Err(HeaderReject::TxMax);
    }
    let hlen = header_len(with_sync);
    let pkt_len = pkt_len as usize;
    if pkt_len > MAX_PACKET_LEN || pkt_len < hlen {
        return Err(HeaderReject::Length);
    }
    if expected
        .payload_len
        .is_some_and(|l| pkt_len - hlen != l as usize)
    {
        return Err(HeaderReject::Length);
    }
    Ok(())
}

/// Full-frame validation after CRC, returning the decoded header.
pub fn check_frame(frame: &[u8], expected: &ExpectedHeader) -> Result<FloodHeader, HeaderReject> {
    if frame.is_empty() || frame.len() > MAX_PACKET_LEN {
        return Err(HeaderReject::Length);
    }
    check_first_byte(frame[0], frame.len() as u8, expected)?;
    Ok(FloodHeader::decode(frame))
}
