//! Per-layer keystream cipher and the AES-CBC signature protocol.
//!
//! # Keystream cipher
//! A deterministic linear-congruential byte generator, XORed over a layer's
//! RLE bytes:
//!
//! ```text
//! init    = seed * C1 + C2
//! key     = (layer_index * C3 + C4) * init
//! byte[i] = key >> (8 * (i mod 4));   key += init every 4 bytes
//! ```
//!
//! The cipher is self-inverse; that is the only validity check most formats
//! have (no MAC).  Different container formats ship numerically different
//! constant sets (see [`KEYRING_CTB`], [`KEYRING_PHZ`]) but the generator
//! shape is identical — the constants are per-format configuration, not
//! behavioural variants.  A seed of 0 disables the cipher.
//!
//! # Signature protocol
//! `digest = SHA-256(little-endian bytes of the u64 header checksum field)`;
//! `signature = AES-256-CBC-encrypt(digest, SIGNATURE_KEY, SIGNATURE_IV)`
//! with no padding.  Verification re-derives the signature from the freshly
//! computed digest and compares ciphertext to ciphertext; files in the wild
//! are sealed that way, so decrypt-and-compare would be a compatibility
//! break, not a fix.

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use thiserror::Error;

use crate::checksum::sha256_digest;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES block size in bytes; encrypted windows must be multiples of this.
pub const AES_BLOCK_LEN: usize = 16;

/// Static signature key.  A plain constant table — the original ships it as
/// an opaque static blob, not derived at runtime.
pub const SIGNATURE_KEY: [u8; 32] = [0u8; 32];

/// Static signature IV.
pub const SIGNATURE_IV: [u8; 16] = [0u8; 16];

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("AES payload length {len} is not a multiple of the {AES_BLOCK_LEN}-byte block size")]
    BlockAlignment { len: usize },
    #[error("container signature mismatch")]
    SignatureMismatch,
    #[error("encrypted window {offset}+{length} exceeds the {blob_len}-byte blob")]
    WindowOutOfRange { offset: usize, length: usize, blob_len: usize },
}

// ── Keystream cipher ─────────────────────────────────────────────────────────

/// One constant set for the keystream generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRingProfile {
    pub c1: u32,
    pub c2: u32,
    pub c3: u32,
    pub c4: u32,
}

/// Constants used by the CTB family.
pub const KEYRING_CTB: KeyRingProfile = KeyRingProfile {
    c1: 0x2d83_cdac,
    c2: 0xd8a8_3423,
    c3: 0x1e15_30cd,
    c4: 0xec3d_47cd,
};

/// Constants used by the PHZ family.
pub const KEYRING_PHZ: KeyRingProfile = KeyRingProfile {
    c1: 0x34a3_2231,
    c2: 0x0000_0000,
    c3: 0x4910_913d,
    c4: 0x3fad_2212,
};

/// The keystream generator.  A pure function of `(profile, seed,
/// layer_index)`; no state survives between layers.
pub struct KeyRing {
    init:  u32,
    key:   u32,
    index: u32,
}

impl KeyRing {
    pub fn new(profile: &KeyRingProfile, seed: u32, layer_index: u32) -> Self {
        let init = seed.wrapping_mul(profile.c1).wrapping_add(profile.c2);
        let key = layer_index
            .wrapping_mul(profile.c3)
            .wrapping_add(profile.c4)
            .wrapping_mul(init);
        Self { init, key, index: 0 }
    }

    /// Next keystream byte.
    #[inline]
    pub fn next_byte(&mut self) -> u8 {
        let k = (self.key >> (8 * self.index)) as u8;
        self.index += 1;
        if self.index & 3 == 0 {
            self.key = self.key.wrapping_add(self.init);
            self.index = 0;
        }
        k
    }

    /// XOR the keystream over `data` in place.
    pub fn apply(&mut self, data: &mut [u8]) {
        for b in data.iter_mut() {
            *b ^= self.next_byte();
        }
    }
}

/// Transform a layer's bytes in place.  Seed 0 means the format has the
/// cipher disabled; the call is a no-op.
pub fn crypt_layer(profile: &KeyRingProfile, seed: u32, layer_index: u32, data: &mut [u8]) {
    if seed == 0 {
        return;
    }
    KeyRing::new(profile, seed, layer_index).apply(data);
}

// ── AES-CBC ──────────────────────────────────────────────────────────────────

/// AES-256-CBC encrypt with no padding.  `data` must be block-aligned.
pub fn aes_cbc_encrypt(data: &[u8], key: &[u8; 32], iv: &[u8; 16]) -> Result<Vec<u8>, CryptoError> {
    if data.len() % AES_BLOCK_LEN != 0 {
        return Err(CryptoError::BlockAlignment { len: data.len() });
    }
    Ok(Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<NoPadding>(data))
}

/// AES-256-CBC decrypt with no padding.  `data` must be block-aligned.
pub fn aes_cbc_decrypt(data: &[u8], key: &[u8; 32], iv: &[u8; 16]) -> Result<Vec<u8>, CryptoError> {
    if data.len() % AES_BLOCK_LEN != 0 {
        return Err(CryptoError::BlockAlignment { len: data.len() });
    }
    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<NoPadding>(data)
        .map_err(|_| CryptoError::BlockAlignment { len: data.len() })
}

/// Decrypt an encrypted window of a layer blob in place.
pub fn decrypt_layer_window(blob: &mut [u8], offset: usize, length: usize) -> Result<(), CryptoError> {
    let window = window_range(blob, offset, length)?;
    let plain = aes_cbc_decrypt(&blob[window.clone()], &SIGNATURE_KEY, &SIGNATURE_IV)?;
    blob[window].copy_from_slice(&plain);
    Ok(())
}

/// Encrypt a window of a layer blob in place (the encode-side mirror of
/// [`decrypt_layer_window`]).
pub fn encrypt_layer_window(blob: &mut [u8], offset: usize, length: usize) -> Result<(), CryptoError> {
    let window = window_range(blob, offset, length)?;
    let cipher = aes_cbc_encrypt(&blob[window.clone()], &SIGNATURE_KEY, &SIGNATURE_IV)?;
    blob[window].copy_from_slice(&cipher);
    Ok(())
}

fn window_range(
    blob: &[u8],
    offset: usize,
    length: usize,
) -> Result<std::ops::Range<usize>, CryptoError> {
    match offset.checked_add(length) {
        Some(end) if end <= blob.len() => Ok(offset..end),
        _ => Err(CryptoError::WindowOutOfRange { offset, length, blob_len: blob.len() }),
    }
}

// ── Signature protocol ───────────────────────────────────────────────────────

/// Produce the container signature for a header checksum field.
pub fn compute_signature(checksum_value: u64) -> Result<Vec<u8>, CryptoError> {
    let digest = sha256_digest(&checksum_value.to_le_bytes());
    aes_cbc_encrypt(&digest, &SIGNATURE_KEY, &SIGNATURE_IV)
}

/// Verify a stored signature against a freshly computed checksum value.
///
/// Comparison happens on the ciphertext side, mirroring how files are
/// sealed; the stored signature is never decrypted.
pub fn verify_signature(checksum_value: u64, stored: &[u8]) -> Result<(), CryptoError> {
    let expected = compute_signature(checksum_value)?;
    if expected != stored {
        return Err(CryptoError::SignatureMismatch);
    }
    Ok(())
}
