//! MixCascade transport core
//!
//! Cell framing and layered cascade cryptography for the MixCascade
//! client protocol:
//!
//! - [`cell`]: fixed-size wire cells and the tokio codec for them
//! - [`sym`]: the self-clocking per-hop symmetric stream cipher
//! - [`asym`]: the fixed-block asymmetric bootstrap cipher
//! - [`params`]: opaque per-hop cascade parameters
//! - [`chain`]: onion layering of one cipher per cascade hop
//! - [`error`]: error types
//!
//! Everything above the cell payload (stream framing, directory
//! lookups, key exchange) lives in other layers; this crate only
//! moves and transforms cells.

pub mod asym;
pub mod cell;
pub mod chain;
pub mod error;
pub mod params;
pub mod sym;

pub use asym::{RsaMixCipher, RSA_BLOCK_LEN};
pub use cell::{
    CellCodec, MixCell, CELL_LEN, FLAG_CLOSE, FLAG_DATA, FLAG_DUMMY, FLAG_OPEN, HEADER_LEN,
    PAYLOAD_LEN,
};
pub use chain::{HopCipher, MixCipherChain};
pub use error::{Error, Result};
pub use params::{MixParameters, ReplayTimestamp};
pub use sym::{SymCipher, SYM_KEY_LEN};

#[cfg(test)]
pub(crate) mod testing {
    //! Fixed RSA-1024 vector shared by the cipher tests

    use crate::asym::{RsaMixCipher, RSA_BLOCK_LEN};
    use rsa::BigUint;

    pub(crate) const TEST_MODULUS: &str = "d8fff63004c2ef1e3ebd84e62fe4fa2a08cbc2ccbf893d649d50de3d99d8ab80f39f616c89c7e2732d59dcc486fafbb19a9d6ab1995f3299bb94b11212cf3c6ede461b028caffe1e2cfb1b4ca3e0ecfec0d155423a9b00e7b6de3ce14f46b7120566af7e49beda035f9d9a2be5f4630a2f467439c3328dc295bd6cbb2511bc4f";

    pub(crate) const TEST_PRIVATE_EXPONENT: &str = "59ed2101df47453ebc735f9ae0e83c3fa52b83cbc3e844d7e855b5f3c348c6320743da64d7684d50bbcf8caca8df63e4c3154f3cd0396247d1339a79c9efb5b3dcd2a725cb17d95ee3bd8bdd74783329a2771c531cd714a7b409ad935c494d430161e0cd173a616606c83a8fe14d5575fa16266f7d405cdcaeb2c13e1a013119";

    pub(crate) fn test_mix_key() -> RsaMixCipher {
        let modulus = hex::decode(TEST_MODULUS).unwrap();
        RsaMixCipher::from_components(&modulus, &[0x01, 0x00, 0x01]).unwrap()
    }

    /// Relay-side private transform: block^d mod n, left-padded
    pub(crate) fn private_transform(block: &[u8]) -> [u8; RSA_BLOCK_LEN] {
        let n = BigUint::from_bytes_be(&hex::decode(TEST_MODULUS).unwrap());
        let d = BigUint::from_bytes_be(&hex::decode(TEST_PRIVATE_EXPONENT).unwrap());
        let m = BigUint::from_bytes_be(block).modpow(&d, &n);
        let bytes = m.to_bytes_be();
        let mut out = [0u8; RSA_BLOCK_LEN];
        out[RSA_BLOCK_LEN - bytes.len()..].copy_from_slice(&bytes);
        out
    }
}
