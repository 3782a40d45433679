//! FIT (Flattened Image Tree) sub-image access.
//!
//! A `.itb` starts with an FDT descriptor. Each child of `/images` holds one
//! sub-image whose payload is either embedded (`data`) or stored after the
//! descriptor (`data-offset` relative to the 4-byte aligned end of the
//! descriptor, or `data-position` from the start of the file), as produced by
//! `mkimage -E`.

use std::fs;
use std::path::Path;

use log::{debug, info};

use crate::dtb::{self, DtNode};
use crate::{ItbPatchError, Result};

// ---------------------------------------------------------------------------
// FIT property / node name constants (matching U-Boot's image.h)
// ---------------------------------------------------------------------------

pub const FIT_IMAGES_PATH: &str = "/images";

pub const FIT_DATA_PROP: &str = "data";
pub const FIT_DATA_OFFSET_PROP: &str = "data-offset";
pub const FIT_DATA_POSITION_PROP: &str = "data-position";
pub const FIT_DATA_SIZE_PROP: &str = "data-size";
pub const FIT_TYPE_PROP: &str = "type";
pub const FIT_DESC_PROP: &str = "description";

/// Image type of a flattened device tree sub-image.
pub const FIT_TYPE_FLAT_DT: &str = "flat_dt";

/// Where a sub-image's payload lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLocation {
    /// Inside the descriptor, as the `data` property.
    Embedded,
    /// After the descriptor, at this absolute file offset.
    External { offset: usize },
}

/// Summary of one `/images` child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitImageInfo {
    pub name: String,
    pub image_type: String,
    pub description: String,
    pub size: usize,
    pub location: DataLocation,
}

/// A sub-image with its payload.
#[derive(Debug, Clone)]
pub struct FitImage {
    pub info: FitImageInfo,
    pub data: Vec<u8>,
}

fn image_nodes(root: &DtNode) -> Result<&[DtNode]> {
    root.find_node(FIT_IMAGES_PATH)
        .map(|n| n.children.as_slice())
        .ok_or_else(|| ItbPatchError::Other(format!("no {FIT_IMAGES_PATH} node in FIT")))
}

/// Resolve the payload range of `node` within `itb`.
fn data_range(itb: &[u8], node: &DtNode) -> Result<(DataLocation, usize, usize)> {
    if let Some(data) = node.get_property(FIT_DATA_PROP) {
        return Ok((DataLocation::Embedded, 0, data.len()));
    }

    let size = node
        .get_property_u32(FIT_DATA_SIZE_PROP)
        .ok_or_else(|| ItbPatchError::NoImageData(node.name.clone()))? as usize;
    let start = if let Some(pos) = node.get_property_u32(FIT_DATA_POSITION_PROP) {
        pos as usize
    } else if let Some(off) = node.get_property_u32(FIT_DATA_OFFSET_PROP) {
        let base = (dtb::fdt_totalsize(itb) + 3) & !3;
        base + off as usize
    } else {
        return Err(ItbPatchError::NoImageData(node.name.clone()));
    };

    let end = start + size;
    if end > itb.len() {
        return Err(ItbPatchError::RegionOutOfBounds {
            start,
            end,
            size: itb.len(),
        });
    }
    Ok((DataLocation::External { offset: start }, start, size))
}

fn image_info(itb: &[u8], node: &DtNode) -> Result<FitImageInfo> {
    let (location, _, size) = data_range(itb, node)?;
    Ok(FitImageInfo {
        name: node.name.clone(),
        image_type: node.get_property_str(FIT_TYPE_PROP).unwrap_or("").to_string(),
        description: node.get_property_str(FIT_DESC_PROP).unwrap_or("").to_string(),
        size,
        location,
    })
}

/// List every sub-image under `/images`, in descriptor order.
pub fn list_images(itb: &[u8]) -> Result<Vec<FitImageInfo>> {
    let root = dtb::parse_dtb(itb)?;
    image_nodes(&root)?
        .iter()
        .map(|node| image_info(itb, node))
        .collect()
}

/// Whether any external image is located by `data-offset`, i.e. relative
/// to the end of the descriptor.
pub fn has_relative_data(itb: &[u8]) -> Result<bool> {
    let root = dtb::parse_dtb(itb)?;
    Ok(image_nodes(&root)?.iter().any(|node| {
        node.get_property(FIT_DATA_PROP).is_none()
            && node.get_property(FIT_DATA_POSITION_PROP).is_none()
            && node.get_property(FIT_DATA_OFFSET_PROP).is_some()
    }))
}

/// Extract the sub-image at `position` (0-based, descriptor order).
///
/// With `expected_type`, the image's `type` property must match it.
pub fn extract_subimage_bytes(
    itb: &[u8],
    position: usize,
    expected_type: Option<&str>,
) -> Result<FitImage> {
    let root = dtb::parse_dtb(itb)?;
    let images = image_nodes(&root)?;
    let node = images.get(position).ok_or(ItbPatchError::ImageNotFound {
        position,
        count: images.len(),
    })?;

    let info = image_info(itb, node)?;
    if let Some(expected) = expected_type {
        if info.image_type != expected {
            return Err(ItbPatchError::WrongImageType {
                name: info.name,
                expected: expected.to_string(),
                found: info.image_type,
            });
        }
    }

    let data = match info.location {
        DataLocation::Embedded => node.get_property(FIT_DATA_PROP).unwrap_or(&[]).to_vec(),
        DataLocation::External { offset } => itb[offset..offset + info.size].to_vec(),
    };
    debug!(
        "image {} '{}': {} bytes ({:?})",
        position, info.name, info.size, info.location
    );
    Ok(FitImage { info, data })
}

/// Extract the sub-image at `position` from `itb_path` into `out_path`.
pub fn extract_subimage(
    itb_path: &Path,
    position: usize,
    expected_type: Option<&str>,
    out_path: &Path,
) -> Result<FitImage> {
    let itb = fs::read(itb_path)?;
    let image = extract_subimage_bytes(&itb, position, expected_type)?;
    fs::write(out_path, &image.data)?;
    info!(
        "extracted '{}' ({} bytes) to {}",
        image.info.name,
        image.data.len(),
        out_path.display()
    );
    Ok(image)
}

/// Print a dumpimage-style listing of the sub-images.
pub fn print_images(images: &[FitImageInfo]) {
    for (i, img) in images.iter().enumerate() {
        println!(" Image {} ({})", i, img.name);
        println!("  Description:  {}", img.description);
        println!("  Type:         {}", img.image_type);
        println!("  Data Size:    {} Bytes", img.size);
        match img.location {
            DataLocation::Embedded => println!("  Data:         embedded"),
            DataLocation::External { offset } => println!("  Data Offset:  0x{offset:08x}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
