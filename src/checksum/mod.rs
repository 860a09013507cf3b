//! Checksum and digest engine.
//!
//! Three families live here:
//!
//! - **CRC-16** — table-driven, reflected polynomial `0xA001`, combined into
//!   the final value by a two-lookup finishing step.  The finish is part of
//!   the wire format: the output is NOT a plain CRC-16 and must not be
//!   "corrected" to one.
//! - **CRC-32** — reflected IEEE polynomial `0xEDB88320`, used over a whole
//!   container minus the trailing 4-byte slot that stores the value itself.
//! - **SHA-1 / SHA-256** — content keys for layer deduplication and the
//!   digest input of the AES signature protocol (see [`crate::crypto`]).
//!
//! Each container format statically selects exactly one digest kind; see
//! [`crate::format`].

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use sha2::Sha256;

// ── CRC-16 ───────────────────────────────────────────────────────────────────

/// Lookup table for the reflected polynomial `0xA001`
/// (x^16 + x^15 + x^2 + 1).
pub const CRC16_TABLE: [u16; 256] = [
    0x0000, 0xc0c1, 0xc181, 0x0140, 0xc301, 0x03c0, 0x0280, 0xc241,
    0xc601, 0x06c0, 0x0780, 0xc741, 0x0500, 0xc5c1, 0xc481, 0x0440,
    0xcc01, 0x0cc0, 0x0d80, 0xcd41, 0x0f00, 0xcfc1, 0xce81, 0x0e40,
    0x0a00, 0xcac1, 0xcb81, 0x0b40, 0xc901, 0x09c0, 0x0880, 0xc841,
    0xd801, 0x18c0, 0x1980, 0xd941, 0x1b00, 0xdbc1, 0xda81, 0x1a40,
    0x1e00, 0xdec1, 0xdf81, 0x1f40, 0xdd01, 0x1dc0, 0x1c80, 0xdc41,
    0x1400, 0xd4c1, 0xd581, 0x1540, 0xd701, 0x17c0, 0x1680, 0xd641,
    0xd201, 0x12c0, 0x1380, 0xd341, 0x1100, 0xd1c1, 0xd081, 0x1040,
    0xf001, 0x30c0, 0x3180, 0xf141, 0x3300, 0xf3c1, 0xf281, 0x3240,
    0x3600, 0xf6c1, 0xf781, 0x3740, 0xf501, 0x35c0, 0x3480, 0xf441,
    0x3c00, 0xfcc1, 0xfd81, 0x3d40, 0xff01, 0x3fc0, 0x3e80, 0xfe41,
    0xfa01, 0x3ac0, 0x3b80, 0xfb41, 0x3900, 0xf9c1, 0xf881, 0x3840,
    0x2800, 0xe8c1, 0xe981, 0x2940, 0xeb01, 0x2bc0, 0x2a80, 0xea41,
    0xee01, 0x2ec0, 0x2f80, 0xef41, 0x2d00, 0xedc1, 0xec81, 0x2c40,
    0xe401, 0x24c0, 0x2580, 0xe541, 0x2700, 0xe7c1, 0xe681, 0x2640,
    0x2200, 0xe2c1, 0xe381, 0x2340, 0xe101, 0x21c0, 0x2080, 0xe041,
    0xa001, 0x60c0, 0x6180, 0xa141, 0x6300, 0xa3c1, 0xa281, 0x6240,
    0x6600, 0xa6c1, 0xa781, 0x6740, 0xa501, 0x65c0, 0x6480, 0xa441,
    0x6c00, 0xacc1, 0xad81, 0x6d40, 0xaf01, 0x6fc0, 0x6e80, 0xae41,
    0xaa01, 0x6ac0, 0x6b80, 0xab41, 0x6900, 0xa9c1, 0xa881, 0x6840,
    0x7800, 0xb8c1, 0xb981, 0x7940, 0xbb01, 0x7bc0, 0x7a80, 0xba41,
    0xbe01, 0x7ec0, 0x7f80, 0xbf41, 0x7d00, 0xbdc1, 0xbc81, 0x7c40,
    0xb401, 0x74c0, 0x7580, 0xb541, 0x7700, 0xb7c1, 0xb681, 0x7640,
    0x7200, 0xb2c1, 0xb381, 0x7340, 0xb101, 0x71c0, 0x7080, 0xb041,
    0x5000, 0x90c1, 0x9181, 0x5140, 0x9301, 0x53c0, 0x5280, 0x9241,
    0x9601, 0x56c0, 0x5780, 0x9741, 0x5500, 0x95c1, 0x9481, 0x5440,
    0x9c01, 0x5cc0, 0x5d80, 0x9d41, 0x5f00, 0x9fc1, 0x9e81, 0x5e40,
    0x5a00, 0x9ac1, 0x9b81, 0x5b40, 0x9901, 0x59c0, 0x5880, 0x9841,
    0x8801, 0x48c0, 0x4980, 0x8941, 0x4b00, 0x8bc1, 0x8a81, 0x4a40,
    0x4e00, 0x8ec1, 0x8f81, 0x4f40, 0x8d01, 0x4dc0, 0x4c80, 0x8c41,
    0x4400, 0x84c1, 0x8581, 0x4540, 0x8701, 0x47c0, 0x4680, 0x8641,
    0x8201, 0x42c0, 0x4380, 0x8341, 0x4100, 0x81c1, 0x8081, 0x4040,
];

/// CRC-16 with the two-lookup finishing step.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &b in data {
        crc = (crc << 8) ^ CRC16_TABLE[((crc >> 8) ^ CRC16_TABLE[b as usize]) as usize & 0xff];
    }
    // Finishing step: swap halves through the table.  Wire format, not an
    // optimization.
    CRC16_TABLE[crc as usize & 0xff]
        .wrapping_mul(0x100)
        .wrapping_add(CRC16_TABLE[(crc >> 8) as usize & 0xff])
}

// ── CRC-32 ───────────────────────────────────────────────────────────────────

/// Plain reflected IEEE CRC-32 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Byte length of the CRC-32 slot at the end of a sealed container.
pub const CRC32_TRAILER_LEN: usize = 4;

/// CRC-32 over a serialized container, excluding the trailing 4-byte slot
/// that holds the checksum itself.  Returns `None` for inputs too short to
/// carry the slot.
pub fn container_crc32(file: &[u8]) -> Option<u32> {
    let body = file.len().checked_sub(CRC32_TRAILER_LEN)?;
    Some(crc32(&file[..body]))
}

// ── Digests ──────────────────────────────────────────────────────────────────

/// SHA-1 of `data` — the content key used for layer deduplication.
pub fn sha1_digest(data: &[u8]) -> [u8; 20] {
    let mut h = Sha1::new();
    h.update(data);
    h.finalize().into()
}

/// SHA-256 of `data`.
pub fn sha256_digest(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    h.finalize().into()
}

// ── Tagged digest values ─────────────────────────────────────────────────────

/// Which integrity scheme a container format pairs with its key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumKind {
    /// No container-level digest; the self-inverse cipher is the only check.
    None,
    Crc16,
    Crc32,
    Sha1,
    Sha256,
    /// AES-CBC-encrypted SHA-256 of the header checksum field; verified
    /// ciphertext-to-ciphertext.  See [`crate::crypto`].
    AesSignature,
}

impl ChecksumKind {
    /// Digest a serialized container body (the byte range excluding the
    /// trailing slot that stores the digest).
    ///
    /// Returns `None` for [`ChecksumKind::None`] and for
    /// [`ChecksumKind::AesSignature`] — the signature is derived from the
    /// header checksum field, not the byte range, and lives in
    /// [`crate::crypto::compute_signature`].
    pub fn digest(self, body: &[u8]) -> Option<ChecksumDigest> {
        match self {
            ChecksumKind::None | ChecksumKind::AesSignature => None,
            ChecksumKind::Crc16 => Some(ChecksumDigest::Crc16(crc16(body))),
            ChecksumKind::Crc32 => Some(ChecksumDigest::Crc32(crc32(body))),
            ChecksumKind::Sha1 => Some(ChecksumDigest::Sha1(sha1_digest(body))),
            ChecksumKind::Sha256 => Some(ChecksumDigest::Sha256(sha256_digest(body))),
        }
    }
}

/// A computed digest, tagged with its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumDigest {
    Crc16(u16),
    Crc32(u32),
    Sha1([u8; 20]),
    Sha256([u8; 32]),
    /// Raw signature ciphertext.
    AesSignature(Vec<u8>),
}

impl ChecksumDigest {
    /// Hex rendering for diagnostics.
    pub fn to_hex(&self) -> String {
        match self {
            ChecksumDigest::Crc16(v) => format!("{v:04x}"),
            ChecksumDigest::Crc32(v) => format!("{v:08x}"),
            ChecksumDigest::Sha1(d) => hex::encode(d),
            ChecksumDigest::Sha256(d) => hex::encode(d),
            ChecksumDigest::AesSignature(d) => hex::encode(d),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_known_vectors() {
        // Values pinned against the reference finishing behaviour.
        assert_eq!(crc16(b""), 0x0000);
        assert_eq!(crc16(b"123456789"), 0x3740);
        assert_eq!(crc16(&[0x12, 0x34, 0x56]), 0x9d41);
    }

    #[test]
    fn crc16_is_not_the_plain_reflected_crc() {
        // The plain reflected CRC-16/ARC of "123456789" is 0xbb3d; the
        // finishing step must move us off that value.
        assert_ne!(crc16(b"123456789"), 0xbb3d);
    }

    #[test]
    fn crc32_check_vector() {
        assert_eq!(crc32(b"123456789"), 0xcbf4_3926);
    }

    #[test]
    fn container_crc32_skips_the_trailer_slot() {
        let mut file = b"container body".to_vec();
        let crc = crc32(&file);
        file.extend_from_slice(&crc.to_le_bytes());
        assert_eq!(container_crc32(&file), Some(crc));
        assert_eq!(container_crc32(&[0u8; 3]), None);
    }

    #[test]
    fn sha_digest_lengths() {
        assert_eq!(sha1_digest(b"abc").len(), 20);
        assert_eq!(
            hex::encode(sha1_digest(b"abc")),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            hex::encode(sha256_digest(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn kind_dispatch_matches_the_direct_functions() {
        let body = b"sealed container body";
        assert_eq!(ChecksumKind::None.digest(body), None);
        assert_eq!(ChecksumKind::AesSignature.digest(body), None);
        assert_eq!(ChecksumKind::Crc16.digest(body), Some(ChecksumDigest::Crc16(crc16(body))));
        assert_eq!(ChecksumKind::Crc32.digest(body), Some(ChecksumDigest::Crc32(crc32(body))));
        assert_eq!(ChecksumKind::Sha1.digest(body), Some(ChecksumDigest::Sha1(sha1_digest(body))));
    }

    #[test]
    fn single_byte_mutation_changes_crc() {
        let data: Vec<u8> = (0..64u8).collect();
        let c16 = crc16(&data);
        let c32 = crc32(&data);
        for i in 0..data.len() {
            let mut mutated = data.clone();
            mutated[i] ^= 0x5a;
            assert_ne!(crc16(&mutated), c16, "crc16 blind to mutation at {i}");
            assert_ne!(crc32(&mutated), c32, "crc32 blind to mutation at {i}");
        }
    }
}
