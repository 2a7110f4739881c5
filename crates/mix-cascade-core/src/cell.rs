//! Fixed-size cell framing
//!
//! Every unit exchanged with the cascade is exactly [`CELL_LEN`] bytes:
//! a 4-byte channel id, a 2-byte flags field and [`PAYLOAD_LEN`] bytes
//! of payload. Outbound cells start out filled with cryptographically
//! random bytes so unused payload space is indistinguishable from
//! stream-cipher output.

use bytes::{Buf, BufMut, BytesMut};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Error;
use crate::sym::{SymCipher, SYM_STATE_LEN};

/// Total cell size on the wire (protocol constant, shared cascade-wide)
pub const CELL_LEN: usize = 998;

/// Cell header size: 4-byte channel id + 2-byte channel flags
pub const HEADER_LEN: usize = 6;

/// Payload bytes per cell
pub const PAYLOAD_LEN: usize = CELL_LEN - HEADER_LEN;

/// Plain data cell (no flag bits set)
pub const FLAG_DATA: u16 = 0x0000;

/// Last cell of a channel
pub const FLAG_CLOSE: u16 = 0x0001;

/// First cell of a channel
pub const FLAG_OPEN: u16 = 0x0008;

/// Mix-generated filler cell, dropped after decryption
pub const FLAG_DUMMY: u16 = 0x0010;

/// One wire cell
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MixCell {
    /// Channel id; an opaque 32-bit pattern, not an ordered magnitude
    pub channel_id: u32,
    /// Flags bitmask ([`FLAG_CLOSE`], [`FLAG_OPEN`], [`FLAG_DUMMY`])
    pub channel_flags: u16,
    /// Exactly [`PAYLOAD_LEN`] bytes
    pub payload: Vec<u8>,
}

impl MixCell {
    /// Create a data cell with random payload
    pub fn new(channel_id: u32) -> Self {
        let mut payload = vec![0u8; PAYLOAD_LEN];
        OsRng.fill_bytes(&mut payload);
        Self {
            channel_id,
            channel_flags: FLAG_DATA,
            payload,
        }
    }

    /// Create a cell from an already assembled payload
    pub fn with_payload(
        channel_id: u32,
        channel_flags: u16,
        payload: Vec<u8>,
    ) -> Result<Self, Error> {
        if payload.len() != PAYLOAD_LEN {
            return Err(Error::InvalidCellLength(HEADER_LEN + payload.len()));
        }
        Ok(Self {
            channel_id,
            channel_flags,
            payload,
        })
    }
}

/// Codec for fixed-size cells
///
/// Wire format:
/// - 4 bytes: channel id (big-endian)
/// - 2 bytes: channel flags (big-endian)
/// - 992 bytes: payload
///
/// An optional link cipher covers the first 16 bytes of every raw
/// cell (the header plus the leading payload bytes), as negotiated
/// with the first mix. Each direction owns its own cipher instance;
/// the codec only drives the send-direction state.
pub struct CellCodec {
    link_cipher: Option<SymCipher>,
}

impl CellCodec {
    /// Create a codec without a link cipher
    pub fn new() -> Self {
        Self { link_cipher: None }
    }

    /// Create a codec applying `link_cipher` to every cell's first 16 bytes
    pub fn with_link_cipher(link_cipher: SymCipher) -> Self {
        Self {
            link_cipher: Some(link_cipher),
        }
    }
}

impl Default for CellCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for CellCodec {
    type Item = MixCell;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < CELL_LEN {
            return Ok(None);
        }

        let mut raw = src.split_to(CELL_LEN);
        if let Some(cipher) = self.link_cipher.as_mut() {
            cipher.apply_send(&mut raw[..SYM_STATE_LEN]);
        }

        let channel_id = raw.get_u32();
        let channel_flags = raw.get_u16();
        let payload = raw.to_vec();

        Ok(Some(MixCell {
            channel_id,
            channel_flags,
            payload,
        }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(cell) => Ok(Some(cell)),
            None if src.is_empty() => Ok(None),
            // a short read mid-cell is fatal to the whole connection
            None => Err(Error::TruncatedCell(src.len())),
        }
    }
}

impl Encoder<MixCell> for CellCodec {
    type Error = Error;

    fn encode(&mut self, item: MixCell, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.payload.len() != PAYLOAD_LEN {
            return Err(Error::InvalidCellLength(HEADER_LEN + item.payload.len()));
        }

        let start = dst.len();
        dst.reserve(CELL_LEN);
        dst.put_u32(item.channel_id);
        dst.put_u16(item.channel_flags);
        dst.put_slice(&item.payload);

        if let Some(cipher) = self.link_cipher.as_mut() {
            cipher.apply_send(&mut dst[start..start + SYM_STATE_LEN]);
        }

        Ok(())
    }
}
