//! Line-level patcher for decompiled device tree source.
//!
//! `dtc -I dtb -O dts` output is regular enough that a node opens on a line
//! ending in `{` and closes on a line ending in `};`. The patcher walks the
//! source once, keeps the current node path on a stack, and rewrites lines
//! belonging to a small fixed set of nodes (matched by exact path):
//!
//! - `/ethernet@15100000`: any existing `mac@1` subtree is dropped and a new
//!   `mac@1` (2500base-x, in-band status) is appended before the node closes
//! - `/usb@11200000`: `phys` is cut down to the two USB 2.0 entries and a
//!   single `mediatek,u3p-dis-msk = <0x01>;` is appended
//! - `/__symbols__`: `gmac0` / `gmac1` aliases are added if missing
//! - `/`: the `model` string gets a ` with USB3SFP` suffix
//!
//! The patch only counts as applied when both the ethernet and the USB node
//! were found.

use log::{debug, warn};

use crate::{ItbPatchError, Result};

// ---------------------------------------------------------------------------
// Patch targets
// ---------------------------------------------------------------------------

pub const ROOT_PATH: &[&str] = &["/"];
pub const ETHERNET_PATH: &[&str] = &["/", "ethernet@15100000"];
pub const MAC1_PATH: &[&str] = &["/", "ethernet@15100000", "mac@1"];
pub const USB_PATH: &[&str] = &["/", "usb@11200000"];
pub const SYMBOLS_PATH: &[&str] = &["/", "__symbols__"];

/// Node names used in error messages.
pub const ETHERNET_NODE: &str = "/ethernet@15100000";
pub const USB_NODE: &str = "/usb@11200000";

const MODEL_PREFIX: &str = "model = \"";
const MODEL_SUFFIX: &str = " with USB3SFP";

const PHYS_PROP: &str = "phys";
const PHYS_COUNT: usize = 4;
const PHYS_KEEP: usize = 2;

const U3P_DIS_MSK_PROP: &str = "mediatek,u3p-dis-msk";
const U3P_DIS_MSK_LINE: &str = "mediatek,u3p-dis-msk = <0x01>;";

const GMAC0_SYMBOL: &str = "gmac0 = \"/ethernet@15100000/mac@0\";";
const GMAC1_SYMBOL: &str = "gmac1 = \"/ethernet@15100000/mac@1\";";

/// `mac@1` node appended to the ethernet controller, relative indentation.
const MAC1_NODE: &[&str] = &[
    "mac@1 {",
    "\tcompatible = \"mediatek,eth-mac\";",
    "\treg = <0x01>;",
    "\tphy-mode = \"2500base-x\";",
    "\tmanaged = \"in-band-status\";",
    "};",
];

// ---------------------------------------------------------------------------
// Scope path
// ---------------------------------------------------------------------------

/// Names of the nodes enclosing the current line, root first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopePath(Vec<String>);

impl ScopePath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str) {
        self.0.push(name.to_string());
    }

    pub fn pop(&mut self) -> Option<String> {
        self.0.pop()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Exact match against a target path.
    pub fn is(&self, target: &[&str]) -> bool {
        self.0.len() == target.len() && self.0.iter().zip(target).all(|(a, b)| a == b)
    }

    /// True for `target` itself and every node below it.
    pub fn within(&self, target: &[&str]) -> bool {
        self.0.len() >= target.len() && self.0.iter().zip(target).all(|(a, b)| a == b)
    }

    /// Indentation `dtc` uses for properties at this depth.
    fn indent(&self) -> String {
        "\t".repeat(self.0.len())
    }
}

// ---------------------------------------------------------------------------
// Line classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Line<'a> {
    /// `name {`
    Open(&'a str),
    /// `};`
    Close,
    Other,
}

fn classify(line: &str) -> Line<'_> {
    let trimmed = line.trim();
    if let Some(head) = trimmed.strip_suffix('{') {
        Line::Open(head.trim())
    } else if trimmed.ends_with("};") {
        Line::Close
    } else {
        Line::Other
    }
}

/// First whitespace-separated token of a property line.
fn property_key(line: &str) -> &str {
    line.trim().split(' ').next().unwrap_or("")
}

fn leading_whitespace(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// Keep the first two entries of a four-entry `phys` list.
///
/// Accepts both `<a b c d>` and `<a b>, <c d>`.
fn truncate_phys(line: &str) -> Result<String> {
    let cells: Vec<&str> = match (line.find('<'), line.rfind('>')) {
        (Some(l), Some(r)) if l < r => line[l + 1..r]
            .split(|c: char| c.is_whitespace() || matches!(c, '<' | '>' | ','))
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    };
    if cells.len() != PHYS_COUNT {
        return Err(ItbPatchError::MalformedProperty {
            property: PHYS_PROP,
            expected: PHYS_COUNT,
            found: cells.len(),
        });
    }
    Ok(format!(
        "{}{PHYS_PROP} = <{}>;",
        leading_whitespace(line),
        cells[..PHYS_KEEP].join(" ")
    ))
}

// ---------------------------------------------------------------------------
// Patcher
// ---------------------------------------------------------------------------

/// Which gated transformations have fired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchStatus {
    pub usb_patched: bool,
    pub ethernet_patched: bool,
}

impl PatchStatus {
    pub fn is_complete(&self) -> bool {
        self.usb_patched && self.ethernet_patched
    }

    fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.usb_patched {
            missing.push(USB_NODE);
        }
        if !self.ethernet_patched {
            missing.push(ETHERNET_NODE);
        }
        missing
    }
}

#[derive(Debug, Default)]
struct DtsPatcher {
    out: Vec<String>,
    path: ScopePath,
    status: PatchStatus,
    has_gmac0_symbol: bool,
    has_gmac1_symbol: bool,
}

impl DtsPatcher {
    fn emit(&mut self, line: impl Into<String>) {
        self.out.push(line.into());
    }

    fn open(&mut self, line: &str, name: &str) {
        self.path.push(name);
        if !self.path.within(MAC1_PATH) {
            self.emit(line);
        }
    }

    fn close(&mut self, line: &str, line_no: usize) -> Result<()> {
        if self.path.depth() == 0 {
            return Err(ItbPatchError::UnbalancedScope { line: line_no });
        }

        if self.path.is(ETHERNET_PATH) {
            if self.status.ethernet_patched {
                return Err(ItbPatchError::DuplicateTarget(ETHERNET_NODE));
            }
            let indent = self.path.indent();
            for l in MAC1_NODE {
                self.emit(format!("{indent}{l}"));
            }
            self.status.ethernet_patched = true;
            debug!("added mac@1 to {ETHERNET_NODE}");
        } else if self.path.is(USB_PATH) {
            if self.status.usb_patched {
                return Err(ItbPatchError::DuplicateTarget(USB_NODE));
            }
            self.emit(format!("{}{U3P_DIS_MSK_LINE}", self.path.indent()));
            self.status.usb_patched = true;
            debug!("disabled usb3 port on {USB_NODE}");
        } else if self.path.is(SYMBOLS_PATH) {
            let indent = self.path.indent();
            if !self.has_gmac0_symbol {
                self.emit(format!("{indent}{GMAC0_SYMBOL}"));
            }
            if !self.has_gmac1_symbol {
                self.emit(format!("{indent}{GMAC1_SYMBOL}"));
            }
        }

        if !self.path.within(MAC1_PATH) {
            self.emit(line);
        }
        self.path.pop();
        Ok(())
    }

    fn usb_line(&mut self, line: &str) -> Result<()> {
        match property_key(line) {
            PHYS_PROP => {
                let phys = truncate_phys(line)?;
                self.emit(phys);
            }
            // re-added once when the node closes
            U3P_DIS_MSK_PROP => {}
            _ => self.emit(line),
        }
        Ok(())
    }

    fn symbols_line(&mut self, line: &str) {
        match line.trim() {
            GMAC0_SYMBOL => self.has_gmac0_symbol = true,
            GMAC1_SYMBOL => self.has_gmac1_symbol = true,
            _ => {}
        }
        self.emit(line);
    }

    fn root_line(&mut self, line: &str) {
        if line.trim().starts_with(MODEL_PREFIX) {
            self.emit(line.replace("\";", &format!("{MODEL_SUFFIX}\";")));
        } else {
            self.emit(line);
        }
    }

    fn line(&mut self, line: &str, line_no: usize) -> Result<()> {
        match classify(line) {
            Line::Open(name) => self.open(line, name),
            Line::Close => self.close(line, line_no)?,
            Line::Other if self.path.within(MAC1_PATH) => {}
            Line::Other if self.path.is(USB_PATH) => self.usb_line(line)?,
            Line::Other if self.path.is(SYMBOLS_PATH) => self.symbols_line(line),
            Line::Other if self.path.is(ROOT_PATH) => self.root_line(line),
            Line::Other => self.emit(line),
        }
        Ok(())
    }
}

/// Scan `source` once and return the patched text together with the status
/// flags, without judging whether the patch is complete.
pub fn scan_dts(source: &str) -> Result<(String, PatchStatus)> {
    let mut patcher = DtsPatcher::default();
    for (idx, line) in source.lines().enumerate() {
        patcher.line(line, idx + 1)?;
    }
    if patcher.path.depth() != 0 {
        warn!("device tree source ends inside {} open node(s)", patcher.path.depth());
    }
    Ok((patcher.out.join("\n"), patcher.status))
}

/// Patch decompiled device tree source.
///
/// Fails unless both the ethernet and the USB controller were patched.
pub fn patch_dts(source: &str) -> Result<String> {
    let (patched, status) = scan_dts(source)?;
    if !status.is_complete() {
        return Err(ItbPatchError::TargetNotFound(status.missing()));
    }
    Ok(patched)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
