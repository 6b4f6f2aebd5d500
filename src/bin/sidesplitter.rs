//! sidesplitter — denoise a pair of cryo-EM half-maps by Fourier-shell
//! probability weighting (SIDESPLITTER / LAFTER-for-halfmaps).

use clap::Parser;
use log::info;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;

use ss_core::Volume;
use ss_fft::ParallelFor;
use ss_io::{read_volume, write_volume, HeaderError};
use ss_pipeline::{PipelineError, RunConfig};

#[derive(Parser)]
#[command(
    name = "sidesplitter",
    version,
    about = "Denoise a pair of cryo-EM half-maps, preserving their independence"
)]
struct Cli {
    /// First half-map (MRC, float32 cube)
    #[arg(long = "v1")]
    v1: PathBuf,

    /// Second half-map (MRC, float32 cube)
    #[arg(long = "v2")]
    v2: PathBuf,

    /// Output filename root; writes `<root>_halfmap1.mrc`/`<root>_halfmap2.mrc`
    #[arg(long = "o")]
    out: Option<String>,

    /// Soft mask (MRC); if omitted, a radial mask of radius N/4 is synthesised
    #[arg(long = "mask")]
    mask: Option<PathBuf>,

    /// Omit the final spectrum re-application pass
    #[arg(long = "spectrum", default_value_t = false)]
    spectrum: bool,

    /// Use the tapering (rather than hard-threshold) Pass 2 admission
    #[arg(long = "rotfl", default_value_t = false)]
    rotfl: bool,

    /// Override the worker count (takes priority over OMP_NUM_THREADS)
    #[arg(long = "threads")]
    threads: Option<usize>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("sidesplitter: {err}");
            ExitCode::FAILURE
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

fn load_mrc(path: &std::path::Path) -> Result<(ss_io::MrcHeader, Volume), CliError> {
    let mut reader = BufReader::new(File::open(path).map_err(HeaderError::Io)?);
    Ok(read_volume(&mut reader)?)
}

fn run(cli: Cli) -> Result<(), CliError> {
    let pf = match cli.threads {
        Some(n) => ParallelFor::with_workers(n),
        None => ParallelFor::from_environment(),
    };
    info!("using {} worker thread(s)", pf.workers());

    let (header1, vol1) = load_mrc(&cli.v1)?;
    let (_header2, vol2) = load_mrc(&cli.v2)?;
    let mask = match &cli.mask {
        Some(path) => {
            let (_, m) = load_mrc(path)?;
            Some(m)
        }
        None => None,
    };
    let apix = header1.apix();

    let config = RunConfig { omit_spectrum: cli.spectrum, rotfl: cli.rotfl };
    let outcome = ss_pipeline::run(vol1, vol2, mask, apix, &config, &pf)?;

    info!(
        "resolution cutoff: {:.3} A (maxres={:.4} cycles/voxel)",
        apix / outcome.maxres,
        outcome.maxres
    );

    let (name1, name2) = match &cli.out {
        Some(root) => (format!("{root}_halfmap1.mrc"), format!("{root}_halfmap2.mrc")),
        None => ("halfmap1.mrc".to_string(), "halfmap2.mrc".to_string()),
    };

    let mut out1 = BufWriter::new(File::create(&name1).map_err(HeaderError::Io)?);
    write_volume(&mut out1, &header1, &outcome.out1)?;
    let mut out2 = BufWriter::new(File::create(&name2).map_err(HeaderError::Io)?);
    write_volume(&mut out2, &header1, &outcome.out2)?;

    info!("wrote {name1} and {name2}");
    Ok(())
}
