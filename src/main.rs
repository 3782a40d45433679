use std::path::PathBuf;
use std::process;

use clap::Parser;
use itb_patch::splice::{self, PatchParams, DEFAULT_FDT_POSITION};
use itb_patch::toolchain::Dtc;

/// Patch the device tree inside a U-Boot FIT image (.itb): add the second
/// ethernet MAC, turn the USB 3 port into USB 2 only, and fix up the
/// image's sha1 / crc32 hashes.
#[derive(Parser, Debug)]
#[command(
    name = "itb-patch",
    version,
    about = "Patch the device tree embedded in a FIT image and repair its hashes"
)]
struct Cli {
    /// Position of the flat_dt image under /images (starting at 0)
    #[arg(short = 'p', long = "position", default_value_t = DEFAULT_FDT_POSITION)]
    position: usize,

    /// Directory for intermediate files (default: "build" next to OUTPUT)
    #[arg(short = 'w', long = "work-dir")]
    work_dir: Option<PathBuf>,

    /// Keep intermediate files after a successful run
    #[arg(long = "keep-work-dir")]
    keep_work_dir: bool,

    /// Device tree compiler to run
    #[arg(long = "dtc", env = "DTC", default_value = "dtc")]
    dtc: PathBuf,

    /// Verbose output (repeat for more)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// The original image file
    #[arg()]
    input: PathBuf,

    /// The patched image file to write
    #[arg()]
    output: PathBuf,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = itb_patch::logger::init(itb_patch::logger::level_from_flags(cli.verbose, cli.quiet)) {
        eprintln!("itb-patch: cannot install logger: {e}");
    }

    let work_dir = cli.work_dir.clone().unwrap_or_else(|| {
        cli.output
            .parent()
            .map(|p| p.join("build"))
            .unwrap_or_else(|| PathBuf::from("build"))
    });

    let params = PatchParams {
        input: cli.input.clone(),
        output: cli.output.clone(),
        work_dir,
        fdt_position: cli.position,
        keep_work_dir: cli.keep_work_dir,
    };
    let dtc = Dtc::new(&cli.dtc);

    match splice::patch_itb(&params, &dtc) {
        Ok(path) => {
            if !cli.quiet {
                println!("Patched ITB saved to {}", path.display());
            }
        }
        Err(e) => {
            eprintln!("itb-patch: {}: {}", cli.input.display(), e);
            process::exit(1);
        }
    }
}
