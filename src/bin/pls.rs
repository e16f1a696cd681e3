//! `pls`: prints a pool's identity and dataset/subvolume summary.
//!
//! Grounded in `wtfrank-dump_btrfs`'s `main.rs` for the `clap`-derived CLI
//! shape; the summary itself is `ops::fsstat` run against every image file
//! found in the given directory.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use poolfs::ops;
use poolfs::pool::Pool;
use poolfs::poolinfo::PoolInfo;

/// Prints identity and dataset/subvolume summary for a ZFS or Btrfs pool.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    /// Directory containing the pool's member image files.
    image_dir: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("pls: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> poolfs::error::Result<()> {
    let info = PoolInfo::open(&args.image_dir)?;
    let pool = Pool::open(&info)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    ops::fsstat(&pool, None, None, &mut out)
}
