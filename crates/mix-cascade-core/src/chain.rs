//! Layered cascade encryption
//!
//! One [`HopCipher`] per mix, composed in cascade order. The first
//! cell ever encrypted for a hop bootstraps its session key through
//! the asymmetric block cipher; every later cell only advances the
//! hop's symmetric keystream. There is no re-keying mid-connection.

use crate::asym::RSA_BLOCK_LEN;
use crate::error::{Error, Result};
use crate::params::{MixParameters, REPLAY_OFFSET_LEN};
use crate::sym::{SymCipher, SYM_KEY_LEN};

/// Cipher state for a single hop
pub struct HopCipher {
    params: MixParameters,
    sym: SymCipher,
    first_cell: bool,
}

impl HopCipher {
    /// Create the hop cipher with a fresh random session key
    pub fn new(params: MixParameters) -> Self {
        Self {
            params,
            sym: SymCipher::random(),
            first_cell: true,
        }
    }

    /// Bootstrap bytes the next cell will consume (the embedded key)
    pub fn overhead(&self) -> usize {
        if self.first_cell {
            SYM_KEY_LEN
        } else {
            0
        }
    }

    /// Encrypt one layer.
    ///
    /// `virtual_len` is the length this layer must produce keystream
    /// for; when it exceeds the real length the extra filler keeps the
    /// hop's keystream synchronized and is cut off afterwards.
    fn encrypt(&mut self, cell: &[u8], virtual_len: usize) -> Result<Vec<u8>> {
        if self.first_cell {
            // finalize the session key: clear the leading bit so the
            // bootstrap block stays below the modulus, then splice in
            // the replay offset when the mix negotiated one
            let mut key = *self.sym.key();
            key[0] &= 0x7f;
            if let Some(replay) = &self.params.replay {
                let offset = replay.current_offset();
                key[SYM_KEY_LEN - REPLAY_OFFSET_LEN..].copy_from_slice(&offset);
            }
            self.sym.set_key(&key)?;

            let real_len = cell.len() + SYM_KEY_LEN;
            let mut buf = vec![0u8; real_len.max(virtual_len)];
            if buf.len() < RSA_BLOCK_LEN {
                return Err(Error::InvalidCellLength(buf.len()));
            }
            buf[..SYM_KEY_LEN].copy_from_slice(&key);
            buf[SYM_KEY_LEN..real_len].copy_from_slice(cell);

            let block: [u8; RSA_BLOCK_LEN] = buf[..RSA_BLOCK_LEN]
                .try_into()
                .expect("slice is RSA_BLOCK_LEN bytes");
            let encrypted_block = self.params.asym.encrypt_block(&block)?;
            buf[..RSA_BLOCK_LEN].copy_from_slice(&encrypted_block);
            self.sym.apply_send(&mut buf[RSA_BLOCK_LEN..]);

            buf.truncate(real_len);
            self.first_cell = false;
            Ok(buf)
        } else {
            let real_len = cell.len();
            let mut buf = vec![0u8; real_len.max(virtual_len)];
            buf[..real_len].copy_from_slice(cell);
            self.sym.apply_send(&mut buf);
            buf.truncate(real_len);
            Ok(buf)
        }
    }

    /// Remove this hop's layer from a downstream payload
    fn decrypt(&mut self, payload: &mut [u8]) {
        self.sym.apply_recv(payload);
    }
}

/// The full onion cipher stack for one channel
pub struct MixCipherChain {
    /// Hops in cascade order: index 0 is the first mix
    hops: Vec<HopCipher>,
}

impl MixCipherChain {
    /// Build a chain with fresh session keys for every cascade hop
    pub fn new(cascade: &[MixParameters]) -> Self {
        Self {
            hops: cascade.iter().cloned().map(HopCipher::new).collect(),
        }
    }

    /// Number of hops
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    /// Whether the chain has no hops at all
    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// Total bootstrap overhead the next cell will carry
    pub fn next_cell_overhead(&self) -> usize {
        self.hops.iter().map(HopCipher::overhead).sum()
    }

    /// Onion-encrypt one channel cell.
    ///
    /// Layers are applied innermost-first so the first mix strips the
    /// outermost one; each hop's target length leaves room for the
    /// bootstrap blocks the hops outside it still have to add. The
    /// result is exactly `virtual_len` bytes when the input fills its
    /// budget.
    pub fn encrypt_cell(&mut self, cell: &[u8], virtual_len: usize) -> Result<Vec<u8>> {
        let mut current = cell.to_vec();
        for index in (0..self.hops.len()).rev() {
            let outer_overhead: usize = self.hops[..index].iter().map(HopCipher::overhead).sum();
            let target_len = virtual_len.saturating_sub(outer_overhead);
            current = self.hops[index].encrypt(&current, target_len)?;
        }
        Ok(current)
    }

    /// Remove every hop's layer from a downstream payload, in cascade
    /// order (the first mix encrypted last on the way back)
    pub fn decrypt_cell(&mut self, payload: &mut [u8]) {
        for hop in self.hops.iter_mut() {
            hop.decrypt(payload);
        }
    }
}
