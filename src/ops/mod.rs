//! The operations layer: `fsstat`, `fls`, `istat`, `icat`, `fwalk`.
//!
//! Shared, format-agnostic entry points over a [`Pool`], dispatching to
//! whichever of the two on-disk formats the pool actually is. Every
//! operation writes through a caller-supplied [`Sink`] rather than
//! touching `stdout` directly (Design Notes' "replace global writes with
//! a caller-supplied sink" redesign) so the CLI binaries, and tests, can
//! capture output without process-wide side effects.

mod dataset;
mod fls;
mod fsstat;
mod fwalk;
mod icat;
mod istat;
mod support;

pub use dataset::DatasetName;
pub use fwalk::RestoreSink;

use std::io::Write;

use crate::error::Result;
use crate::pool::Pool;

/// Where operation output goes. A thin alias over `std::io::Write` so
/// callers can point it at `stdout`, a `String` buffer in tests, or
/// anything else.
pub trait Sink: Write {}
impl<T: Write> Sink for T {}

/// `fsstat`: prints pool/superblock identity and enumerates
/// datasets/subvolumes and their snapshots.
pub fn fsstat(pool: &Pool, dataset: Option<&str>, txg: Option<u64>, out: &mut dyn Sink) -> Result<()> {
    fsstat::run(pool, dataset, txg, out)
}

/// `fls`: recursively lists directory contents (`type glyph  inode  name`
/// per line) for a dataset/subvolume's root, or a given starting inode.
pub fn fls(pool: &Pool, dataset: Option<&str>, txg: Option<u64>, out: &mut dyn Sink) -> Result<()> {
    fls::run(pool, dataset, txg, out)
}

/// `istat`: prints the on-disk inode/dnode record for a single object.
pub fn istat(
    pool: &Pool,
    inode: u64,
    dataset: Option<&str>,
    txg: Option<u64>,
    out: &mut dyn Sink,
) -> Result<()> {
    istat::run(pool, inode, dataset, txg, out)
}

/// `icat`: streams an object's reconstructed content.
pub fn icat(
    pool: &Pool,
    inode: u64,
    dataset: Option<&str>,
    txg: Option<u64>,
    out: &mut dyn Sink,
) -> Result<()> {
    icat::run(pool, inode, dataset, txg, out)
}

/// `fwalk`: ZFS-only recursive directory walk, with optional restoration
/// of file content to a caller-supplied sink per path.
pub fn fwalk(
    pool: &Pool,
    dataset: Option<&str>,
    txg: Option<u64>,
    restore: Option<&mut dyn RestoreSink>,
    out: &mut dyn Sink,
) -> Result<()> {
    fwalk::run(pool, dataset, txg, restore, out)
}
