//! # itb-patch
//!
//! Rewrite the device tree embedded in a U-Boot FIT image (`.itb`) and
//! repair the integrity metadata so the image still boots.
//!
//! The flow is:
//!
//! - **Extract** the flat device tree sub-image from the FIT container
//! - **Patch** its textual source (via `dtc`) with a scope-aware line patcher
//! - **Recompile**, pad back to the original size, and recompute its
//!   `sha1` / `crc32` hash values
//! - **Splice** the recompiled descriptor and padded blob back into a copy
//!   of the original container bytes
//!
//! ## Example
//!
//! ```no_run
//! use itb_patch::{splice::{patch_itb, PatchParams}, toolchain::Dtc};
//!
//! let params = PatchParams {
//!     input: "firmware.itb".into(),
//!     output: "firmware-patched.itb".into(),
//!     work_dir: "build".into(),
//!     ..Default::default()
//! };
//! patch_itb(&params, &Dtc::default()).unwrap();
//! ```

pub mod digest;
pub mod dtb;
pub mod dts;
pub mod fit;
pub mod logger;
pub mod splice;
pub mod toolchain;

use std::io;

use crc32fast::Hasher;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ItbPatchError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{step}: dtc {status}")]
    Toolchain { step: &'static str, status: String },

    #[error("property '{property}' should have {expected} entries, found {found}")]
    MalformedProperty {
        property: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("node {} not found, patch incomplete", .0.join(", "))]
    TargetNotFound(Vec<&'static str>),

    #[error("node {0} appears more than once")]
    DuplicateTarget(&'static str),

    #[error("unbalanced '}};' on line {line}")]
    UnbalancedScope { line: usize },

    #[error("patched dtb is larger than original ({patched} > {original} bytes), unable to patch")]
    BlobTooLarge { patched: usize, original: usize },

    #[error("original dtb not found inside container")]
    BlobNotFound,

    #[error("{kind} {value} not found in container descriptor")]
    DigestNotFound { kind: &'static str, value: String },

    #[error("descriptor region 0..{header_end} overlaps dtb region {blob_start}..{blob_end}")]
    RegionOverlap {
        header_end: usize,
        blob_start: usize,
        blob_end: usize,
    },

    #[error("rebuilt descriptor is {rebuilt} bytes instead of {original}, image data would move")]
    DescriptorResized { original: usize, rebuilt: usize },

    #[error("region {start}..{end} is outside the container ({size} bytes)")]
    RegionOutOfBounds { start: usize, end: usize, size: usize },

    #[error("bad DTB magic")]
    BadMagic,

    #[error("image too small ({size} bytes, need at least {min})")]
    TooSmall { size: usize, min: usize },

    #[error("no image at position {position} ({count} images)")]
    ImageNotFound { position: usize, count: usize },

    #[error("image '{name}' has type '{found}', expected '{expected}'")]
    WrongImageType {
        name: String,
        expected: String,
        found: String,
    },

    #[error("image '{0}' has no data")]
    NoImageData(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ItbPatchError>;

// ---------------------------------------------------------------------------
// CRC-32 helper
// ---------------------------------------------------------------------------

/// Compute CRC-32 of a byte slice (IEEE polynomial, matching U-Boot's
/// `crc32()` and zlib).
pub fn crc32(data: &[u8]) -> u32 {
    let mut h = Hasher::new();
    h.update(data);
    h.finalize()
}
