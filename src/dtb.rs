//! Flattened device tree (DTB) reading and writing.
//!
//! Only what the FIT container needs: header validation and a small
//! in-memory tree parsed from a blob. Writing blobs is left to `dtc`; the
//! serializer here only builds test fixtures.
//! Parsing tolerates trailing bytes after `totalsize`, so it can be pointed
//! at a whole `.itb` file whose external image data follows the descriptor.

#[cfg(test)]
use std::collections::HashMap;

use crate::{ItbPatchError, Result};

// ---------------------------------------------------------------------------
// DTB constants
// ---------------------------------------------------------------------------

pub const FDT_MAGIC: u32 = 0xd00dfeed;
pub const FDT_BEGIN_NODE: u32 = 0x00000001;
pub const FDT_END_NODE: u32 = 0x00000002;
pub const FDT_PROP: u32 = 0x00000003;
pub const FDT_NOP: u32 = 0x00000004;
pub const FDT_END: u32 = 0x00000009;

// Header field offsets
pub const HDR_MAGIC: usize = 0;
pub const HDR_TOTALSIZE: usize = 4;
pub const HDR_OFF_DT_STRUCT: usize = 8;
pub const HDR_OFF_DT_STRINGS: usize = 12;
pub const HDR_SIZE: usize = 40;

/// Deepest node nesting accepted by [`parse_dtb`].
pub const FDT_MAX_DEPTH: usize = 64;

/// Version written by `serialize_dtb` (same as `dtc`).
#[cfg(test)]
const FDT_VERSION: u32 = 17;
#[cfg(test)]
const FDT_LAST_COMP_VERSION: u32 = 16;

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Read a big-endian u32 at `off`, or `None` past the end of `data`.
fn read_u32(data: &[u8], off: usize) -> Option<u32> {
    let b = data.get(off..off.checked_add(4)?)?;
    Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Read a big-endian u32 at `off`. Callers must have checked the header.
pub fn get_u32(data: &[u8], off: usize) -> u32 {
    read_u32(data, off).unwrap_or(0)
}

#[inline]
pub fn fdt_totalsize(dtb: &[u8]) -> usize {
    get_u32(dtb, HDR_TOTALSIZE) as usize
}
#[inline]
pub fn fdt_off_dt_struct(dtb: &[u8]) -> usize {
    get_u32(dtb, HDR_OFF_DT_STRUCT) as usize
}
#[inline]
pub fn fdt_off_dt_strings(dtb: &[u8]) -> usize {
    get_u32(dtb, HDR_OFF_DT_STRINGS) as usize
}

/// Check the magic and that `totalsize` fits within `dtb`.
pub fn fdt_check_header(dtb: &[u8]) -> Result<()> {
    if dtb.len() < HDR_SIZE {
        return Err(ItbPatchError::TooSmall {
            size: dtb.len(),
            min: HDR_SIZE,
        });
    }
    if get_u32(dtb, HDR_MAGIC) != FDT_MAGIC {
        return Err(ItbPatchError::BadMagic);
    }
    let total = fdt_totalsize(dtb);
    if total < HDR_SIZE || total > dtb.len() {
        return Err(ItbPatchError::TooSmall {
            size: dtb.len(),
            min: total.max(HDR_SIZE),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// In-memory tree
// ---------------------------------------------------------------------------

/// A property in the device tree: name → value bytes.
#[derive(Debug, Clone)]
pub struct DtProperty {
    pub name: String,
    pub value: Vec<u8>,
}

/// A node in the device tree.
#[derive(Debug, Clone)]
pub struct DtNode {
    pub name: String,
    pub properties: Vec<DtProperty>,
    pub children: Vec<DtNode>,
}

impl DtNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn get_property(&self, name: &str) -> Option<&[u8]> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_slice())
    }

    pub fn get_property_str(&self, name: &str) -> Option<&str> {
        self.get_property(name).and_then(|v| {
            let end = v.iter().position(|&b| b == 0).unwrap_or(v.len());
            std::str::from_utf8(&v[..end]).ok()
        })
    }

    /// First cell of a property.
    pub fn get_property_u32(&self, name: &str) -> Option<u32> {
        self.get_property(name).and_then(|v| read_u32(v, 0))
    }

    #[cfg(test)]
    pub(crate) fn set_property(&mut self, name: &str, value: Vec<u8>) {
        if let Some(prop) = self.properties.iter_mut().find(|p| p.name == name) {
            prop.value = value;
        } else {
            self.properties.push(DtProperty {
                name: name.to_string(),
                value,
            });
        }
    }

    #[cfg(test)]
    pub(crate) fn set_property_str(&mut self, name: &str, val: &str) {
        let mut v = val.as_bytes().to_vec();
        v.push(0);
        self.set_property(name, v);
    }

    #[cfg(test)]
    pub(crate) fn set_property_u32(&mut self, name: &str, val: u32) {
        self.set_property(name, val.to_be_bytes().to_vec());
    }

    pub fn child(&self, name: &str) -> Option<&DtNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Look up a node by absolute path, e.g. `/images/fdt-1`.
    pub fn find_node(&self, path: &str) -> Option<&DtNode> {
        path.split('/')
            .filter(|c| !c.is_empty())
            .try_fold(self, |node, component| node.child(component))
    }
}

// ---------------------------------------------------------------------------
// Parse DTB → tree
// ---------------------------------------------------------------------------

struct Parser<'a> {
    data: &'a [u8],
    strings_off: usize,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn truncated(&self) -> ItbPatchError {
        ItbPatchError::Other(format!("truncated DTB structure at offset {}", self.pos))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let v = read_u32(self.data, self.pos).ok_or_else(|| self.truncated())?;
        self.pos += 4;
        Ok(v)
    }

    fn align(&mut self) {
        self.pos = (self.pos + 3) & !3;
    }

    fn read_string_nul(&mut self) -> Result<String> {
        let rest = self.data.get(self.pos..).ok_or_else(|| self.truncated())?;
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| self.truncated())?;
        let s = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.pos += len + 1;
        self.align();
        Ok(s)
    }

    fn get_string(&self, off: usize) -> String {
        let tail = self.data.get(self.strings_off + off..).unwrap_or(&[]);
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        String::from_utf8_lossy(&tail[..end]).into_owned()
    }

    fn parse_node(&mut self, depth: usize) -> Result<DtNode> {
        if depth >= FDT_MAX_DEPTH {
            return Err(ItbPatchError::Other(format!(
                "DTB nodes nested deeper than {FDT_MAX_DEPTH} at offset {}",
                self.pos
            )));
        }
        let name = self.read_string_nul()?;
        let mut node = DtNode::new(&name);

        loop {
            let tag = self.read_u32()?;
            match tag {
                FDT_PROP => {
                    let len = self.read_u32()? as usize;
                    let nameoff = self.read_u32()? as usize;
                    let value = self
                        .data
                        .get(self.pos..self.pos + len)
                        .ok_or_else(|| self.truncated())?
                        .to_vec();
                    self.pos += len;
                    self.align();
                    node.properties.push(DtProperty {
                        name: self.get_string(nameoff),
                        value,
                    });
                }
                FDT_BEGIN_NODE => {
                    node.children.push(self.parse_node(depth + 1)?);
                }
                FDT_END_NODE => return Ok(node),
                FDT_NOP => {}
                _ => {
                    return Err(ItbPatchError::Other(format!(
                        "unexpected DTB tag 0x{:08x} at offset {}",
                        tag,
                        self.pos - 4
                    )));
                }
            }
        }
    }
}

/// Parse a DTB blob into an in-memory tree.
pub fn parse_dtb(data: &[u8]) -> Result<DtNode> {
    fdt_check_header(data)?;
    let total = fdt_totalsize(data);
    let mut parser = Parser {
        data: &data[..total],
        strings_off: fdt_off_dt_strings(data),
        pos: fdt_off_dt_struct(data),
    };
    if parser.read_u32()? != FDT_BEGIN_NODE {
        return Err(ItbPatchError::Other(
            "expected FDT_BEGIN_NODE for root".into(),
        ));
    }
    parser.parse_node(0)
}

// ---------------------------------------------------------------------------
// Serialize tree → DTB
// ---------------------------------------------------------------------------

#[cfg(test)]
#[derive(Default)]
struct Serializer {
    struct_buf: Vec<u8>,
    strings_buf: Vec<u8>,
    string_map: HashMap<String, u32>,
}

#[cfg(test)]
impl Serializer {
    fn write_u32(&mut self, v: u32) {
        self.struct_buf.extend_from_slice(&v.to_be_bytes());
    }

    fn pad(&mut self) {
        while self.struct_buf.len() % 4 != 0 {
            self.struct_buf.push(0);
        }
    }

    fn intern_string(&mut self, s: &str) -> u32 {
        if let Some(&off) = self.string_map.get(s) {
            return off;
        }
        let off = self.strings_buf.len() as u32;
        self.strings_buf.extend_from_slice(s.as_bytes());
        self.strings_buf.push(0);
        self.string_map.insert(s.to_string(), off);
        off
    }

    fn serialize_node(&mut self, node: &DtNode) {
        self.write_u32(FDT_BEGIN_NODE);
        self.struct_buf.extend_from_slice(node.name.as_bytes());
        self.struct_buf.push(0);
        self.pad();
        for prop in &node.properties {
            self.write_u32(FDT_PROP);
            self.write_u32(prop.value.len() as u32);
            let nameoff = self.intern_string(&prop.name);
            self.write_u32(nameoff);
            self.struct_buf.extend_from_slice(&prop.value);
            self.pad();
        }
        for child in &node.children {
            self.serialize_node(child);
        }
        self.write_u32(FDT_END_NODE);
    }
}

/// Serialize a tree, leaving `extra_space` zero bytes of padding at the end
/// (like `dtc -p`).
#[cfg(test)]
pub(crate) fn serialize_dtb(root: &DtNode, extra_space: usize) -> Vec<u8> {
    let mut ser = Serializer::default();
    ser.serialize_node(root);
    ser.write_u32(FDT_END);

    let struct_data = ser.struct_buf;
    let strings_data = ser.strings_buf;
    let mem_rsvmap = [0u8; 16];

    let off_mem_rsvmap = HDR_SIZE as u32;
    let off_dt_struct = off_mem_rsvmap + mem_rsvmap.len() as u32;
    let off_dt_strings = off_dt_struct + struct_data.len() as u32;
    let totalsize = off_dt_strings + strings_data.len() as u32 + extra_space as u32;

    let mut out = Vec::with_capacity(totalsize as usize);
    for field in [
        FDT_MAGIC,
        totalsize,
        off_dt_struct,
        off_dt_strings,
        off_mem_rsvmap,
        FDT_VERSION,
        FDT_LAST_COMP_VERSION,
        0, // boot_cpuid_phys
        strings_data.len() as u32,
        struct_data.len() as u32,
    ] {
        out.extend_from_slice(&field.to_be_bytes());
    }
    out.extend_from_slice(&mem_rsvmap);
    out.extend_from_slice(&struct_data);
    out.extend_from_slice(&strings_data);
    out.resize(totalsize as usize, 0);
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_simple_tree() -> DtNode {
        let mut root = DtNode::new("");
        root.set_property_str("compatible", "test");
        root.set_property_u32("#address-cells", 1);
        let mut child = DtNode::new("child");
        child.set_property_str("status", "okay");
        child.set_property("data", vec![1, 2, 3, 4]);
        root.children.push(child);
        root
    }

    #[test]
    fn serialized_tree_parses_back() {
        let dtb = serialize_dtb(&make_simple_tree(), 0);
        fdt_check_header(&dtb).unwrap();
        assert_eq!(fdt_totalsize(&dtb), dtb.len());

        let parsed = parse_dtb(&dtb).unwrap();
        assert_eq!(parsed.get_property_str("compatible"), Some("test"));
        assert_eq!(parsed.get_property_u32("#address-cells"), Some(1));
        let child = parsed.find_node("/child").unwrap();
        assert_eq!(child.get_property_str("status"), Some("okay"));
        assert_eq!(child.get_property("data"), Some([1u8, 2, 3, 4].as_slice()));
        assert!(parsed.find_node("/nonexistent").is_none());
        assert_eq!(parsed.find_node("/").map(|n| n.name.as_str()), Some(""));
    }

    #[test]
    fn padding_and_trailing_bytes() {
        let mut dtb = serialize_dtb(&make_simple_tree(), 64);
        let total = fdt_totalsize(&dtb);
        assert_eq!(total, dtb.len());
        assert!(dtb[total - 64..].iter().all(|&b| b == 0));

        // image data appended after the descriptor is ignored
        dtb.extend_from_slice(&[0xff; 32]);
        let parsed = parse_dtb(&dtb).unwrap();
        assert!(parsed.child("child").is_some());
    }

    #[test]
    fn header_errors() {
        assert!(matches!(
            fdt_check_header(&[0u8; 8]),
            Err(ItbPatchError::TooSmall { size: 8, min: HDR_SIZE })
        ));
        assert!(matches!(
            fdt_check_header(&[0u8; 64]),
            Err(ItbPatchError::BadMagic)
        ));

        let dtb = serialize_dtb(&make_simple_tree(), 0);
        assert!(matches!(
            fdt_check_header(&dtb[..dtb.len() - 4]),
            Err(ItbPatchError::TooSmall { .. })
        ));
    }

    #[test]
    fn truncated_structure_is_an_error() {
        let mut dtb = serialize_dtb(&make_simple_tree(), 0);
        // claim the struct block starts near the end
        let total = dtb.len() as u32;
        dtb[HDR_OFF_DT_STRUCT..HDR_OFF_DT_STRUCT + 4].copy_from_slice(&(total - 2).to_be_bytes());
        assert!(parse_dtb(&dtb).is_err());
    }

    fn nested(depth: usize) -> DtNode {
        (0..depth).fold(DtNode::new("leaf"), |inner, i| {
            let mut node = DtNode::new(&format!("n{i}"));
            node.children.push(inner);
            node
        })
    }

    #[test]
    fn nesting_depth_is_capped() {
        // 64 levels including root and leaf
        let ok = serialize_dtb(&nested(FDT_MAX_DEPTH - 1), 0);
        assert!(parse_dtb(&ok).is_ok());

        let deep = serialize_dtb(&nested(FDT_MAX_DEPTH * 4), 0);
        let err = parse_dtb(&deep).unwrap_err();
        assert!(err.to_string().contains("nested deeper than 64"), "{err}");
    }
}
