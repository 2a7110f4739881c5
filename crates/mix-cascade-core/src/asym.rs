//! Asymmetric bootstrap cipher
//!
//! Raw fixed-block RSA used exactly once per hop and channel: the
//! first cell sent towards a mix carries that mix's symmetric session
//! key inside one modular-exponentiation block. No padding scheme is
//! involved; the caller guarantees the block's numeric value is below
//! the modulus by clearing the leading bit of the key material.

use rsa::hazmat::rsa_encrypt;
use rsa::{BigUint, RsaPublicKey};

use crate::error::{Error, Result};

/// Bootstrap block size in bytes (input and output)
pub const RSA_BLOCK_LEN: usize = 128;

/// Public-key transform for one mix
#[derive(Clone)]
pub struct RsaMixCipher {
    public_key: RsaPublicKey,
}

impl RsaMixCipher {
    /// Build the cipher from raw big-endian modulus and exponent bytes.
    ///
    /// The modulus must occupy exactly [`RSA_BLOCK_LEN`] bytes so that
    /// every bootstrap block maps onto a block of the same size.
    pub fn from_components(modulus: &[u8], exponent: &[u8]) -> Result<Self> {
        let n = BigUint::from_bytes_be(modulus);
        let modulus_len = (n.bits() + 7) / 8;
        if modulus_len != RSA_BLOCK_LEN {
            return Err(Error::InvalidModulusSize(modulus_len));
        }
        let e = BigUint::from_bytes_be(exponent);
        let public_key = RsaPublicKey::new(n, e)?;
        Ok(Self { public_key })
    }

    /// Encrypt exactly one block.
    ///
    /// The result is left-padded with zeros back to the fixed block
    /// size when the numeric value is short.
    pub fn encrypt_block(&self, input: &[u8; RSA_BLOCK_LEN]) -> Result<[u8; RSA_BLOCK_LEN]> {
        let m = BigUint::from_bytes_be(input);
        let c = rsa_encrypt(&self.public_key, &m)?;
        let bytes = c.to_bytes_be();
        let mut output = [0u8; RSA_BLOCK_LEN];
        output[RSA_BLOCK_LEN - bytes.len()..].copy_from_slice(&bytes);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{private_transform, test_mix_key};

    #[test]
    fn test_block_roundtrip_via_private_exponent() {
        let cipher = test_mix_key();

        let mut input = [0u8; RSA_BLOCK_LEN];
        for (i, byte) in input.iter_mut().enumerate() {
            *byte = i as u8;
        }
        // keep the numeric value below the modulus
        input[0] &= 0x7f;

        let output = cipher.encrypt_block(&input).unwrap();
        assert_ne!(&output[..], &input[..]);

        // the relay recovers the block with its private exponent
        assert_eq!(private_transform(&output), input);
    }

    #[test]
    fn test_modulus_size_enforced() {
        // a 64-byte modulus cannot carry 128-byte blocks
        let short = [0xFFu8; 64];
        assert!(RsaMixCipher::from_components(&short, &[0x01, 0x00, 0x01]).is_err());
    }
}
