use std::fs;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use itb_patch::fit;

/// List and extract sub-images of a FIT image, like U-Boot's dumpimage.
#[derive(Parser, Debug)]
#[command(
    name = "itb-dump",
    version,
    about = "List and extract components from FIT images"
)]
struct Cli {
    /// List the images under /images
    #[arg(short = 'l')]
    list: bool,

    /// Only extract an image of this type (e.g. flat_dt)
    #[arg(short = 'T')]
    image_type: Option<String>,

    /// Extract component at this position (starting at 0)
    #[arg(short = 'p', default_value = "0")]
    position: usize,

    /// Extract component to this file
    #[arg(short = 'o')]
    outfile: Option<PathBuf>,

    /// Verbose output
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// The input image file
    #[arg()]
    imagefile: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    let _ = itb_patch::logger::init(itb_patch::logger::level_from_flags(cli.verbose, false));

    // -l and -o are mutually exclusive
    if cli.list && cli.outfile.is_some() {
        eprintln!("itb-dump: -l and -o are mutually exclusive");
        process::exit(1);
    }

    let result = match (cli.list, &cli.outfile) {
        (true, _) => fs::read(&cli.imagefile)
            .map_err(Into::into)
            .and_then(|itb| fit::list_images(&itb))
            .map(|images| fit::print_images(&images)),
        (false, Some(outfile)) => {
            fit::extract_subimage(&cli.imagefile, cli.position, cli.image_type.as_deref(), outfile)
                .map(|_| ())
        }
        (false, None) => {
            eprintln!(
                "Usage: itb-dump -l image\n\
                 \x20      itb-dump [-T type] [-p position] -o outfile image"
            );
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("itb-dump: {}: {}", cli.imagefile.display(), e);
        process::exit(1);
    }
}
