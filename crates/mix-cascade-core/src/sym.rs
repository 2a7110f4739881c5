//! Per-hop symmetric stream cipher
//!
//! A keyed AES-128 block cipher drives a self-clocking keystream: each
//! step encrypts the current 16-byte state and feeds the keystream
//! output back in as the next state (OFB-style, independent of the
//! data), so both ends stay synchronized from the state evolution
//! alone. Two independent states decouple the send and receive
//! directions even though they share one key.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{Error, Result};

/// Symmetric session key length in bytes
pub const SYM_KEY_LEN: usize = 16;

/// Keystream block / running state length in bytes
pub const SYM_STATE_LEN: usize = 16;

/// Directional stream cipher state shared with one mix
pub struct SymCipher {
    engine: Aes128,
    key: [u8; SYM_KEY_LEN],
    /// Send-direction running state
    iv_send: [u8; SYM_STATE_LEN],
    /// Receive-direction running state
    iv_recv: [u8; SYM_STATE_LEN],
}

impl SymCipher {
    /// Create a cipher from key material.
    ///
    /// 16 bytes set only the key (both states start zeroed); 32 bytes
    /// set the key and both directional states from bytes 16..32.
    pub fn new(key_material: &[u8]) -> Result<Self> {
        let mut cipher = Self {
            engine: Aes128::new(GenericArray::from_slice(&[0u8; SYM_KEY_LEN])),
            key: [0u8; SYM_KEY_LEN],
            iv_send: [0u8; SYM_STATE_LEN],
            iv_recv: [0u8; SYM_STATE_LEN],
        };
        cipher.set_key(key_material)?;
        Ok(cipher)
    }

    /// Create a cipher with a fresh random session key and zeroed states
    pub fn random() -> Self {
        let mut key = [0u8; SYM_KEY_LEN];
        OsRng.fill_bytes(&mut key);
        // 16-byte material cannot fail
        Self::new(&key).expect("fresh 16-byte key")
    }

    /// Re-key the cipher. Accepts the same material as [`SymCipher::new`];
    /// with 16-byte material both running states are reset to zero.
    pub fn set_key(&mut self, key_material: &[u8]) -> Result<()> {
        match key_material.len() {
            SYM_KEY_LEN => {
                self.key.copy_from_slice(key_material);
                self.iv_send = [0u8; SYM_STATE_LEN];
                self.iv_recv = [0u8; SYM_STATE_LEN];
            }
            32 => {
                self.key.copy_from_slice(&key_material[..SYM_KEY_LEN]);
                self.iv_send.copy_from_slice(&key_material[SYM_KEY_LEN..]);
                self.iv_recv.copy_from_slice(&key_material[SYM_KEY_LEN..]);
            }
            n => return Err(Error::InvalidKeyLength(n)),
        }
        self.engine = Aes128::new(GenericArray::from_slice(&self.key));
        Ok(())
    }

    /// The current session key
    pub fn key(&self) -> &[u8; SYM_KEY_LEN] {
        &self.key
    }

    /// Overwrite the receive-direction state
    pub fn set_recv_state(&mut self, state: [u8; SYM_STATE_LEN]) {
        self.iv_recv = state;
    }

    /// XOR the send-direction keystream over `data` in place
    pub fn apply_send(&mut self, data: &mut [u8]) {
        Self::apply(&self.engine, &mut self.iv_send, data);
    }

    /// XOR the receive-direction keystream over `data` in place
    pub fn apply_recv(&mut self, data: &mut [u8]) {
        Self::apply(&self.engine, &mut self.iv_recv, data);
    }

    fn apply(engine: &Aes128, state: &mut [u8; SYM_STATE_LEN], data: &mut [u8]) {
        for chunk in data.chunks_mut(SYM_STATE_LEN) {
            // next keystream block becomes the next state
            let mut block = GenericArray::clone_from_slice(state);
            engine.encrypt_block(&mut block);
            state.copy_from_slice(&block);
            // a trailing partial block consumes only the leading bytes
            for (byte, key_byte) in chunk.iter_mut().zip(state.iter()) {
                *byte ^= key_byte;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_roundtrip() {
        let key = [7u8; 16];
        let mut enc = SymCipher::new(&key).unwrap();
        let mut dec = SymCipher::new(&key).unwrap();

        let plaintext: Vec<u8> = (0..100u8).collect();
        let mut buf = plaintext.clone();
        enc.apply_send(&mut buf);
        assert_ne!(buf, plaintext);

        // the keystream is XOR, so applying the same evolution decrypts
        dec.apply_send(&mut buf);
        assert_eq!(buf, plaintext);
    }

    #[test]
    fn test_directions_independent() {
        let key = [3u8; 16];
        let mut a = SymCipher::new(&key).unwrap();
        let mut b = SymCipher::new(&key).unwrap();

        // drive the send direction of `a` only
        let mut noise = [0u8; 64];
        a.apply_send(&mut noise);

        // the receive direction must be unperturbed
        let mut recv_a = [0u8; 32];
        let mut recv_b = [0u8; 32];
        a.apply_recv(&mut recv_a);
        b.apply_recv(&mut recv_b);
        assert_eq!(recv_a, recv_b);
    }

    #[test]
    fn test_partial_block_advances_full_state() {
        let key = [9u8; 16];
        let mut a = SymCipher::new(&key).unwrap();
        let mut b = SymCipher::new(&key).unwrap();

        // 20 bytes = one full block plus a 4-byte partial block
        let mut first = [0u8; 20];
        a.apply_send(&mut first);

        // 32 bytes in one call on the reference instance
        let mut reference = [0u8; 32];
        b.apply_send(&mut reference);

        // the third block must match no matter how the earlier data was chunked
        let mut third = [0u8; 16];
        a.apply_send(&mut third);
        let mut b_third = [0u8; 16];
        b.apply_send(&mut b_third);
        assert_eq!(third, b_third);
    }

    #[test]
    fn test_key_material_with_states() {
        let mut material = [0u8; 32];
        material[16..].copy_from_slice(&[0xAA; 16]);
        let a = SymCipher::new(&material).unwrap();
        assert_eq!(a.iv_send, [0xAA; 16]);
        assert_eq!(a.iv_recv, [0xAA; 16]);

        assert!(SymCipher::new(&[0u8; 17]).is_err());
    }
}
