//! Device tree compiler seam.
//!
//! Converting between `.dts` and `.dtb` is left to `dtc`. The pipeline only
//! talks to the [`DtCompiler`] trait so it can run against any compiler.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;

use crate::{ItbPatchError, Result};

/// Input / output format understood by `dtc -I` / `-O`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtFormat {
    Dts,
    Dtb,
}

impl DtFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            DtFormat::Dts => "dts",
            DtFormat::Dtb => "dtb",
        }
    }
}

impl fmt::Display for DtFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Blocking `from` → `to` conversion of `input` into `output`.
///
/// `step` names the conversion in error messages ("extract dts", …).
pub trait DtCompiler {
    fn convert(
        &self,
        step: &'static str,
        from: DtFormat,
        to: DtFormat,
        input: &Path,
        output: &Path,
    ) -> Result<()>;
}

/// The external `dtc` binary.
#[derive(Debug, Clone)]
pub struct Dtc {
    pub program: PathBuf,
    /// Discard dtc's warnings (decompiled sources always trigger some).
    pub quiet: bool,
}

impl Default for Dtc {
    fn default() -> Self {
        Self {
            program: PathBuf::from("dtc"),
            quiet: true,
        }
    }
}

impl Dtc {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }
}

impl DtCompiler for Dtc {
    fn convert(
        &self,
        step: &'static str,
        from: DtFormat,
        to: DtFormat,
        input: &Path,
        output: &Path,
    ) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-I", from.as_str(), "-O", to.as_str(), "-o"])
            .arg(output)
            .arg(input);
        if self.quiet {
            cmd.stderr(std::process::Stdio::null());
        }

        debug!(
            "running: {} -I {from} -O {to} -o {} {}",
            self.program.display(),
            output.display(),
            input.display()
        );

        let status = cmd.status().map_err(|e| ItbPatchError::Toolchain {
            step,
            status: format!("could not be started ({}): {e}", self.program.display()),
        })?;
        if !status.success() {
            return Err(ItbPatchError::Toolchain {
                step,
                status: match status.code() {
                    Some(code) => format!("failed with exit code {code}"),
                    None => "was terminated by a signal".to_string(),
                },
            });
        }
        Ok(())
    }
}
