//! Hash values as they appear in a decompiled FIT descriptor (`.its`).
//!
//! `dtc -I dtb -O dts` renders a `hash-*` node's `value` property as a list
//! of 32-bit cells. The strings built here are used as literal search keys
//! in that text, so their shape must match exactly:
//!
//! - sha1: `<0x1a2b3c4d 0x5e6f 0x... 0x... 0x...>` (five words, no zero padding)
//! - crc32: `<0x0000abcd>` (always eight hex digits)

use sha1::Digest;

use crate::crc32;

/// Number of hex characters in a SHA-1 digest.
const SHA1_HEX_LEN: usize = 40;

/// Render the SHA-1 of `data` as a cell list.
pub fn sha1_string(data: &[u8]) -> String {
    let digest = sha1::Sha1::digest(data);
    debug_assert_eq!(digest.len() * 2, SHA1_HEX_LEN, "invalid sha1");

    let words: Vec<String> = digest
        .chunks_exact(4)
        .map(|c| format!("0x{:x}", u32::from_be_bytes([c[0], c[1], c[2], c[3]])))
        .collect();
    format!("<{}>", words.join(" "))
}

/// Render the CRC-32 of `data` as a single cell.
pub fn crc32_string(data: &[u8]) -> String {
    format!("<0x{:08x}>", crc32(data))
}

/// The sha1 and crc32 strings of one blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestPair {
    pub sha1: String,
    pub crc32: String,
}

impl DigestPair {
    pub fn of(data: &[u8]) -> Self {
        Self {
            sha1: sha1_string(data),
            crc32: crc32_string(data),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
