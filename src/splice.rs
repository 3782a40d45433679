//! Patch the device tree inside a FIT image and splice it back.
//!
//! Mirrors what one would do by hand with `dumpimage` and `dtc`:
//!
//! 1. Extract the `flat_dt` sub-image and decompile it
//! 2. Patch the source ([`crate::dts`]), recompile, zero-pad to the old size
//! 3. Decompile the FIT descriptor, swap the old sha1 / crc32 values for the
//!    new ones, recompile it
//! 4. Overwrite the descriptor and the device tree in a copy of the original
//!    file, at their original offsets
//!
//! Any failure aborts before the output file is touched.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::digest::DigestPair;
use crate::dtb;
use crate::dts;
use crate::fit::{self, FIT_TYPE_FLAT_DT};
use crate::toolchain::{DtCompiler, DtFormat};
use crate::{ItbPatchError, Result};

/// Position of the device tree under `/images` in the images we patch
/// (the kernel comes first).
pub const DEFAULT_FDT_POSITION: usize = 1;

// Scratch artifacts
pub const ORIG_DTB: &str = "orig.dtb";
pub const ORIG_DTS: &str = "orig.dts";
pub const PATCHED_DTS: &str = "patched.dts";
pub const PATCHED_DTB: &str = "patched.dtb";
pub const ORIG_ITS: &str = "orig_itb.its";
pub const PATCHED_ITS: &str = "patched_itb.its";
pub const PATCHED_ITB: &str = "patched_itb.itb";

const ARTIFACTS: &[&str] = &[
    ORIG_DTB,
    ORIG_DTS,
    PATCHED_DTS,
    PATCHED_DTB,
    ORIG_ITS,
    PATCHED_ITS,
    PATCHED_ITB,
];

// Collaborator steps, as reported in errors
pub const STEP_EXTRACT_DTS: &str = "extract dts";
pub const STEP_REBUILD_DTB: &str = "rebuild dtb";
pub const STEP_EXTRACT_ITS: &str = "extract itb its";
pub const STEP_REBUILD_ITB: &str = "rebuild itb";

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PatchParams {
    /// Original `.itb`.
    pub input: PathBuf,
    /// Where the patched `.itb` is written.
    pub output: PathBuf,
    /// Scratch directory for intermediate `.dtb` / `.dts` / `.its` files.
    pub work_dir: PathBuf,
    /// Index of the device tree among the `/images` children.
    pub fdt_position: usize,
    /// Leave the scratch files in place after a successful run.
    pub keep_work_dir: bool,
}

impl Default for PatchParams {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            output: PathBuf::new(),
            work_dir: PathBuf::from("build"),
            fdt_position: DEFAULT_FDT_POSITION,
            keep_work_dir: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Building blocks
// ---------------------------------------------------------------------------

/// Zero-pad `patched` to exactly `original_len` bytes.
pub fn pad_blob(mut patched: Vec<u8>, original_len: usize) -> Result<Vec<u8>> {
    if patched.len() > original_len {
        return Err(ItbPatchError::BlobTooLarge {
            patched: patched.len(),
            original: original_len,
        });
    }
    patched.resize(original_len, 0);
    Ok(patched)
}

/// Offset of the first occurrence of `blob` in `container`.
pub fn find_blob(container: &[u8], blob: &[u8]) -> Result<usize> {
    if blob.is_empty() {
        return Err(ItbPatchError::BlobNotFound);
    }
    container
        .windows(blob.len())
        .position(|w| w == blob)
        .ok_or(ItbPatchError::BlobNotFound)
}

/// Both digest strings of `digests` must occur in the descriptor text.
pub fn check_digests(its: &str, digests: &DigestPair) -> Result<()> {
    for (kind, value) in [("sha1", &digests.sha1), ("crc32", &digests.crc32)] {
        if !its.contains(value.as_str()) {
            return Err(ItbPatchError::DigestNotFound {
                kind,
                value: value.clone(),
            });
        }
    }
    Ok(())
}

/// Replace the digests of the original device tree with those of the
/// patched one.
pub fn substitute_digests(its: &str, orig: &DigestPair, new: &DigestPair) -> Result<String> {
    check_digests(its, orig)?;
    Ok(its.replace(&orig.sha1, &new.sha1).replace(&orig.crc32, &new.crc32))
}

/// The rebuilt descriptor may not grow into the image data behind it. While
/// any image is located by `data-offset`, the aligned end of the descriptor
/// may not move either.
pub fn check_descriptor_size(container: &[u8], header: &[u8]) -> Result<()> {
    let original = dtb::fdt_totalsize(container);
    let rebuilt = header.len().max(dtb::fdt_totalsize(header));
    let aligned = |n: usize| (n + 3) & !3;

    if rebuilt > original
        || (aligned(rebuilt) != aligned(original) && fit::has_relative_data(container)?)
    {
        return Err(ItbPatchError::DescriptorResized { original, rebuilt });
    }
    if rebuilt != original {
        warn!("descriptor shrank from {original} to {rebuilt} bytes");
    }
    Ok(())
}

/// Copy `container`, overwrite its start with `header` and the range at
/// `blob_offset` with `blob`.
pub fn splice(container: &[u8], header: &[u8], blob_offset: usize, blob: &[u8]) -> Result<Vec<u8>> {
    let size = container.len();
    let header_end = header.len();
    let blob_end = blob_offset + blob.len();

    if header_end > size {
        return Err(ItbPatchError::RegionOutOfBounds {
            start: 0,
            end: header_end,
            size,
        });
    }
    if blob_end > size {
        return Err(ItbPatchError::RegionOutOfBounds {
            start: blob_offset,
            end: blob_end,
            size,
        });
    }
    if header_end > blob_offset {
        return Err(ItbPatchError::RegionOverlap {
            header_end,
            blob_start: blob_offset,
            blob_end,
        });
    }

    let mut out = container.to_vec();
    out[..header_end].copy_from_slice(header);
    out[blob_offset..blob_end].copy_from_slice(blob);
    Ok(out)
}

/// Write `data` to `<path>.tmp` and rename it over `path`.
pub fn write_output(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, data)?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        ItbPatchError::Other(format!(
            "cannot rename '{}' → '{}': {e}",
            tmp.display(),
            path.display()
        ))
    })
}

fn remove_artifacts(work_dir: &Path) {
    for name in ARTIFACTS {
        let _ = fs::remove_file(work_dir.join(name));
    }
    // only succeeds if nothing else lives there
    let _ = fs::remove_dir(work_dir);
}

// ---------------------------------------------------------------------------
// Main pipeline
// ---------------------------------------------------------------------------

/// Patch `params.input` into `params.output`. Returns the output path.
pub fn patch_itb(params: &PatchParams, dtc: &dyn DtCompiler) -> Result<PathBuf> {
    fs::create_dir_all(&params.work_dir)?;
    let scratch = |name: &str| params.work_dir.join(name);

    // Step 1: pull the device tree out of the image
    let itb = fs::read(&params.input)?;
    let image = fit::extract_subimage_bytes(&itb, params.fdt_position, Some(FIT_TYPE_FLAT_DT))?;
    dtb::fdt_check_header(&image.data)?;
    let orig_dtb = image.data;
    fs::write(scratch(ORIG_DTB), &orig_dtb)?;
    info!(
        "extracted '{}' ({} bytes) from {}",
        image.info.name,
        orig_dtb.len(),
        params.input.display()
    );

    let blob_offset = find_blob(&itb, &orig_dtb)?;
    debug!("dtb at offset 0x{blob_offset:x}");

    // Step 2: patch the device tree source and rebuild it
    dtc.convert(
        STEP_EXTRACT_DTS,
        DtFormat::Dtb,
        DtFormat::Dts,
        &scratch(ORIG_DTB),
        &scratch(ORIG_DTS),
    )?;
    let orig_dts = fs::read_to_string(scratch(ORIG_DTS))?;
    let patched_dts = dts::patch_dts(&orig_dts)?;
    fs::write(scratch(PATCHED_DTS), &patched_dts)?;
    info!("patched device tree source");

    dtc.convert(
        STEP_REBUILD_DTB,
        DtFormat::Dts,
        DtFormat::Dtb,
        &scratch(PATCHED_DTS),
        &scratch(PATCHED_DTB),
    )?;
    let patched_dtb = fs::read(scratch(PATCHED_DTB))?;
    dtb::fdt_check_header(&patched_dtb)?;
    debug!(
        "patched dtb is {} bytes, original {}",
        patched_dtb.len(),
        orig_dtb.len()
    );
    let new_dtb = pad_blob(patched_dtb, orig_dtb.len())?;
    fs::write(scratch(PATCHED_DTB), &new_dtb)?;

    // Step 3: fix the hashes in the FIT descriptor
    dtc.convert(
        STEP_EXTRACT_ITS,
        DtFormat::Dtb,
        DtFormat::Dts,
        &params.input,
        &scratch(ORIG_ITS),
    )?;
    let orig_its = fs::read_to_string(scratch(ORIG_ITS))?;
    let orig_digests = DigestPair::of(&orig_dtb);
    let new_digests = DigestPair::of(&new_dtb);
    debug!("sha1 {} -> {}", orig_digests.sha1, new_digests.sha1);
    debug!("crc32 {} -> {}", orig_digests.crc32, new_digests.crc32);
    let patched_its = substitute_digests(&orig_its, &orig_digests, &new_digests)?;
    fs::write(scratch(PATCHED_ITS), &patched_its)?;

    dtc.convert(
        STEP_REBUILD_ITB,
        DtFormat::Dts,
        DtFormat::Dtb,
        &scratch(PATCHED_ITS),
        &scratch(PATCHED_ITB),
    )?;
    let new_header = fs::read(scratch(PATCHED_ITB))?;
    dtb::fdt_check_header(&new_header)?;
    check_descriptor_size(&itb, &new_header)?;
    info!("updated image hashes");

    // Step 4: splice both into a copy of the original
    let out = splice(&itb, &new_header, blob_offset, &new_dtb)?;
    write_output(&params.output, &out)?;

    if !params.keep_work_dir {
        remove_artifacts(&params.work_dir);
    }
    info!("patched ITB saved to {}", params.output.display());
    Ok(params.output.clone())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::dtb::{parse_dtb, serialize_dtb, DtNode};
    use crate::dts::tests::BPI_R3_DTS;
    use crate::fit::tests::build_external_fit;
    use crate::fit::{FIT_DATA_POSITION_PROP, FIT_DATA_SIZE_PROP};
    use tempfile::TempDir;

    const SOURCE_PROP: &str = "source";

    /// Compiler stand-in: a "dtb" is an FDT whose root carries the source
    /// text in one property.
    ///
    /// The FIT descriptor keeps the rest of its tree across the round trip,
    /// so `/images` and the data offsets survive the rebuild. Its rebuilt
    /// size only changes by `descriptor_growth`.
    #[derive(Default)]
    struct FakeDtc {
        fail_step: Option<&'static str>,
        descriptor_growth: usize,
        descriptor: RefCell<Option<DtNode>>,
    }

    fn source_blob(text: &str, padding: usize) -> Vec<u8> {
        let mut root = DtNode::new("");
        root.set_property_str(SOURCE_PROP, text);
        serialize_dtb(&root, padding)
    }

    fn blob_source(blob: &[u8]) -> String {
        let root = parse_dtb(blob).unwrap();
        root.get_property_str(SOURCE_PROP).unwrap().to_string()
    }

    impl DtCompiler for FakeDtc {
        fn convert(
            &self,
            step: &'static str,
            from: DtFormat,
            to: DtFormat,
            input: &Path,
            output: &Path,
        ) -> Result<()> {
            if self.fail_step == Some(step) {
                return Err(ItbPatchError::Toolchain {
                    step,
                    status: "failed with exit code 1".into(),
                });
            }
            match (from, to) {
                (DtFormat::Dtb, DtFormat::Dts) => {
                    let root = parse_dtb(&fs::read(input)?)?;
                    fs::write(output, root.get_property_str(SOURCE_PROP).unwrap_or(""))?;
                    if step == STEP_EXTRACT_ITS {
                        *self.descriptor.borrow_mut() = Some(root);
                    }
                }
                (DtFormat::Dts, DtFormat::Dtb) => {
                    let text = fs::read_to_string(input)?;
                    let blob = match self.descriptor.borrow_mut().take() {
                        Some(mut root) if step == STEP_REBUILD_ITB => {
                            // keep the property length so the tree size is stable
                            let old_len = root.get_property(SOURCE_PROP).map_or(0, <[u8]>::len);
                            let mut value = text.into_bytes();
                            value.push(0);
                            value.resize(value.len().max(old_len), 0);
                            root.set_property(SOURCE_PROP, value);
                            serialize_dtb(&root, self.descriptor_growth)
                        }
                        _ => source_blob(&text, 0),
                    };
                    fs::write(output, blob)?;
                }
                _ => {
                    fs::copy(input, output)?;
                }
            }
            Ok(())
        }
    }

    fn its_for(blob: &[u8]) -> String {
        let d = DigestPair::of(blob);
        format!(
            "/dts-v1/;\n\n/ {{\n\tdescription = \"test image\";\n\n\timages {{\n\t\tfdt-1 {{\n\t\t\ttype = \"flat_dt\";\n\n\t\t\thash-1 {{\n\t\t\t\tvalue = {};\n\t\t\t\talgo = \"sha1\";\n\t\t\t}};\n\n\t\t\thash-2 {{\n\t\t\t\tvalue = {};\n\t\t\t\talgo = \"crc32\";\n\t\t\t}};\n\t\t}};\n\t}};\n}};\n",
            d.sha1, d.crc32
        )
    }

    struct Fixture {
        _dir: TempDir,
        params: PatchParams,
        itb: Vec<u8>,
        kernel: Vec<u8>,
        orig_dtb: Vec<u8>,
        dtb_offset: usize,
    }

    /// FIT with a kernel and a device tree stored after the descriptor; the
    /// descriptor's source text lists the device tree's hashes, with NUL
    /// slack for digest strings that render longer.
    fn fixture(dts: &str, padding: usize, its: impl Fn(&[u8]) -> String) -> Fixture {
        let dir = TempDir::new().unwrap();
        let kernel = vec![0x5au8; 301];
        let orig_dtb = source_blob(dts, padding);
        let its_text = its(&orig_dtb);
        let mut its_prop = its_text.into_bytes();
        its_prop.resize(its_prop.len() + 64, 0);

        let (mut itb, offsets) = build_external_fit(
            &[(SOURCE_PROP, its_prop.as_slice())],
            &[
                ("kernel-1", "kernel", kernel.as_slice()),
                ("fdt-1", FIT_TYPE_FLAT_DT, orig_dtb.as_slice()),
            ],
        );
        itb.extend_from_slice(b"trailer");

        let input = dir.path().join("orig.itb");
        fs::write(&input, &itb).unwrap();
        let params = PatchParams {
            input,
            output: dir.path().join("patched.itb"),
            work_dir: dir.path().join("build"),
            ..Default::default()
        };
        Fixture {
            params,
            itb,
            kernel,
            orig_dtb,
            dtb_offset: offsets[1],
            _dir: dir,
        }
    }

    #[test]
    fn end_to_end_patch() {
        let fx = fixture(BPI_R3_DTS, 1024, its_for);
        let out_path = patch_itb(&fx.params, &FakeDtc::default()).unwrap();
        assert_eq!(out_path, fx.params.output);

        let out = fs::read(&out_path).unwrap();
        assert_eq!(out.len(), fx.itb.len());

        // device tree region: patched source, zero padded to the old size
        let off = fx.dtb_offset;
        let len = fx.orig_dtb.len();
        let region = &out[off..off + len];
        let patched = dts::patch_dts(BPI_R3_DTS).unwrap();
        assert_eq!(blob_source(region), patched);
        let used = dtb::fdt_totalsize(region);
        assert!(used < len);
        assert!(region[used..].iter().all(|&b| b == 0));

        // still a valid FIT with both images where they were
        let fdt = fit::extract_subimage_bytes(&out, DEFAULT_FDT_POSITION, Some(FIT_TYPE_FLAT_DT))
            .unwrap();
        assert_eq!(fdt.data, region);
        assert_eq!(fit::extract_subimage_bytes(&out, 0, None).unwrap().data, fx.kernel);

        // descriptor region: same size, hashes now describe the padded blob
        let header_len = dtb::fdt_totalsize(&out);
        assert_eq!(header_len, dtb::fdt_totalsize(&fx.itb));
        let its = blob_source(&out);
        let new_digests = DigestPair::of(region);
        let old_digests = DigestPair::of(&fx.orig_dtb);
        assert!(its.contains(&new_digests.sha1));
        assert!(its.contains(&new_digests.crc32));
        assert!(!its.contains(&old_digests.sha1));
        assert!(!its.contains(&old_digests.crc32));

        // everything else is untouched
        assert_eq!(out[header_len..off], fx.itb[header_len..off]);
        assert_eq!(out[off + len..], fx.itb[off + len..]);
        assert!(out.ends_with(b"trailer"));

        // scratch files cleaned up
        assert!(!fx.params.work_dir.exists());
    }

    #[test]
    fn grown_descriptor_aborts() {
        let fx = fixture(BPI_R3_DTS, 1024, its_for);
        let dtc = FakeDtc {
            descriptor_growth: 300,
            ..Default::default()
        };
        let err = patch_itb(&fx.params, &dtc).unwrap_err();
        let original = dtb::fdt_totalsize(&fx.itb);
        assert!(matches!(
            err,
            ItbPatchError::DescriptorResized { original: o, rebuilt } if o == original && rebuilt == original + 300
        ));
        assert!(!fx.params.output.exists());
    }

    #[test]
    fn descriptor_size_rules() {
        // images located by data-offset: the descriptor end may not move
        let (itb, _) = build_external_fit(&[], &[("kernel-1", "kernel", [7u8; 16].as_slice())]);
        let header_len = dtb::fdt_totalsize(&itb);
        assert!(check_descriptor_size(&itb, &itb[..header_len]).is_ok());
        let small = serialize_dtb(&DtNode::new(""), 0);
        assert!(small.len() < header_len);
        assert!(matches!(
            check_descriptor_size(&itb, &small),
            Err(ItbPatchError::DescriptorResized { .. })
        ));

        // absolute data-position: shrinking is fine, growing is not
        let mut root = DtNode::new("");
        let mut images = DtNode::new("images");
        let mut node = DtNode::new("kernel-1");
        node.set_property_u32(FIT_DATA_POSITION_PROP, 0);
        node.set_property_u32(FIT_DATA_SIZE_PROP, 4);
        images.children.push(node);
        root.children.push(images);
        let itb = serialize_dtb(&root, 64);
        assert!(check_descriptor_size(&itb, &serialize_dtb(&root, 0)).is_ok());
        assert!(matches!(
            check_descriptor_size(&itb, &serialize_dtb(&root, 128)),
            Err(ItbPatchError::DescriptorResized { .. })
        ));
    }

    #[test]
    fn keep_work_dir_leaves_artifacts() {
        let mut fx = fixture(BPI_R3_DTS, 1024, its_for);
        fx.params.keep_work_dir = true;
        patch_itb(&fx.params, &FakeDtc::default()).unwrap();
        for name in ARTIFACTS {
            assert!(fx.params.work_dir.join(name).exists(), "{name}");
        }
        let padded = fs::read(fx.params.work_dir.join(PATCHED_DTB)).unwrap();
        assert_eq!(padded.len(), fx.orig_dtb.len());
    }

    #[test]
    fn missing_digest_aborts_without_output() {
        let fx = fixture(BPI_R3_DTS, 1024, |_| "/dts-v1/;\n\n/ {\n};\n".to_string());
        let err = patch_itb(&fx.params, &FakeDtc::default()).unwrap_err();
        assert!(matches!(err, ItbPatchError::DigestNotFound { kind: "sha1", .. }));
        assert!(!fx.params.output.exists());
    }

    #[test]
    fn missing_crc_aborts() {
        let fx = fixture(BPI_R3_DTS, 1024, |blob: &[u8]| {
            format!("/ {{\n\tvalue = {};\n}};\n", DigestPair::of(blob).sha1)
        });
        let err = patch_itb(&fx.params, &FakeDtc::default()).unwrap_err();
        assert!(matches!(err, ItbPatchError::DigestNotFound { kind: "crc32", .. }));
        assert!(!fx.params.output.exists());
    }

    #[test]
    fn larger_dtb_aborts() {
        let fx = fixture(BPI_R3_DTS, 0, its_for);
        let err = patch_itb(&fx.params, &FakeDtc::default()).unwrap_err();
        assert!(matches!(err, ItbPatchError::BlobTooLarge { .. }));
        assert!(!fx.params.output.exists());
    }

    #[test]
    fn incomplete_patch_aborts() {
        let dts = BPI_R3_DTS.replace("usb@11200000", "usb@11210000");
        let fx = fixture(&dts, 1024, its_for);
        let err = patch_itb(&fx.params, &FakeDtc::default()).unwrap_err();
        assert!(matches!(err, ItbPatchError::TargetNotFound(_)));
        assert!(!fx.params.output.exists());
    }

    #[test]
    fn toolchain_failure_leaves_existing_output() {
        let fx = fixture(BPI_R3_DTS, 1024, its_for);
        fs::write(&fx.params.output, b"previous").unwrap();
        let dtc = FakeDtc {
            fail_step: Some(STEP_REBUILD_ITB),
            ..Default::default()
        };
        let err = patch_itb(&fx.params, &dtc).unwrap_err();
        assert!(matches!(err, ItbPatchError::Toolchain { step: STEP_REBUILD_ITB, .. }));
        assert_eq!(fs::read(&fx.params.output).unwrap(), b"previous");
        // intermediate files stay for inspection
        assert!(fx.params.work_dir.join(PATCHED_ITS).exists());
    }

    #[test]
    fn pad_blob_zero_fills() {
        let padded = pad_blob(vec![1, 2, 3], 8).unwrap();
        assert_eq!(padded, [1u8, 2, 3, 0, 0, 0, 0, 0]);
        assert_eq!(pad_blob(vec![1, 2], 2).unwrap(), [1u8, 2]);
        assert!(matches!(
            pad_blob(vec![0; 9], 8),
            Err(ItbPatchError::BlobTooLarge { patched: 9, original: 8 })
        ));
    }

    #[test]
    fn find_blob_offsets() {
        let container = b"headerXXblobYYblob";
        assert_eq!(find_blob(container, b"blob").unwrap(), 8);
        assert!(matches!(
            find_blob(container, b"missing"),
            Err(ItbPatchError::BlobNotFound)
        ));
        assert!(matches!(find_blob(container, b""), Err(ItbPatchError::BlobNotFound)));
    }

    #[test]
    fn substitute_replaces_both_digests() {
        let orig = DigestPair::of(b"old");
        let new = DigestPair::of(b"new");
        let its = format!("a = {};\nb = {};\nc = {};\n", orig.sha1, orig.crc32, orig.crc32);
        let out = substitute_digests(&its, &orig, &new).unwrap();
        assert_eq!(out, format!("a = {};\nb = {};\nc = {};\n", new.sha1, new.crc32, new.crc32));

        let err = substitute_digests("nothing here", &orig, &new).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("sha1 {} not found in container descriptor", orig.sha1)
        );
    }

    #[test]
    fn splice_regions() {
        let container = [0xeeu8; 16];
        let out = splice(&container, &[1, 2, 3], 8, &[9, 9, 0, 0]).unwrap();
        assert_eq!(
            out,
            [1u8, 2, 3, 0xee, 0xee, 0xee, 0xee, 0xee, 9, 9, 0, 0, 0xee, 0xee, 0xee, 0xee]
        );

        assert!(matches!(
            splice(&container, &[0; 9], 8, &[1]),
            Err(ItbPatchError::RegionOverlap { header_end: 9, blob_start: 8, blob_end: 9 })
        ));
        assert!(matches!(
            splice(&container, &[0; 4], 14, &[1, 2, 3]),
            Err(ItbPatchError::RegionOutOfBounds { start: 14, end: 17, size: 16 })
        ));
        assert!(matches!(
            splice(&container, &[0; 17], 0, &[]),
            Err(ItbPatchError::RegionOutOfBounds { start: 0, end: 17, size: 16 })
        ));
    }

    #[test]
    fn write_output_replaces_atomically() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.itb");
        fs::write(&path, b"old").unwrap();
        write_output(&path, b"new contents").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new contents");
        assert!(!dir.path().join("out.itb.tmp").exists());
    }
}
