//! `pwalk`: recursively walks a ZFS dataset's directory tree, optionally
//! restoring regular file content to the host filesystem.
//!
//! Grounded in `wtfrank-dump_btrfs`'s `main.rs` for the `clap`-derived CLI
//! shape; the walk itself is `ops::fwalk`, which is ZFS-only (spec §4.10).
//! Restoration to disk is this binary's own concern — `ops::fwalk` only
//! hands reconstructed bytes to a [`RestoreSink`](poolfs::ops::RestoreSink).

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use poolfs::error::{PoolError, Result};
use poolfs::ops::{self, RestoreSink};
use poolfs::pool::Pool;
use poolfs::poolinfo::PoolInfo;

/// Recursively walks a ZFS pool's dataset, optionally restoring files.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    /// Enable debug-level tracing output.
    #[arg(short = 'd', long)]
    debug: bool,

    /// Dataset or subvolume to walk, `name[@snapshot]`. Defaults to the
    /// pool's root dataset.
    #[arg(short = 'S', long = "subvolume", value_name = "NAME")]
    subvolume: Option<String>,

    /// Select a specific transaction group's uberblock instead of the
    /// highest-txg one.
    #[arg(short = 'T', long = "txg")]
    txg: Option<u64>,

    /// Restore regular file content under this host directory.
    #[arg(short = 'R', long = "restore", value_name = "PATH")]
    restore: Option<PathBuf>,

    /// Directory containing the pool's member image files.
    image_dir: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("pwalk: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let info = PoolInfo::open(&args.image_dir)?;
    let mut pool = Pool::open(&info)?;

    if let Some(txg) = args.txg {
        match &mut pool {
            Pool::Zfs(zfs_pool) => zfs_pool.select_txg(Some(txg))?,
            Pool::Btrfs(_) => {
                return Err(PoolError::UnsupportedLayout(
                    "-T/--txg only applies to ZFS pools".to_string(),
                ))
            }
        }
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match &args.restore {
        Some(restore_dir) => {
            fs::create_dir_all(restore_dir)?;
            let mut sink = FilesystemRestoreSink::new(restore_dir);
            ops::fwalk(
                &pool,
                args.subvolume.as_deref(),
                args.txg,
                Some(&mut sink),
                &mut out,
            )
        }
        None => ops::fwalk(&pool, args.subvolume.as_deref(), args.txg, None, &mut out),
    }
}

/// Writes restored file content under a fixed host directory, mirroring
/// the walked pool's own path layout.
struct FilesystemRestoreSink {
    root: PathBuf,
}

impl FilesystemRestoreSink {
    fn new(root: &Path) -> Self {
        Self { root: root.to_path_buf() }
    }
}

impl RestoreSink for FilesystemRestoreSink {
    fn restore_file(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let relative = path.trim_start_matches('/');
        let dest = self.root.join(relative);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&dest, data)?;
        Ok(())
    }
}
