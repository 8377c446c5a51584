//! Export: reconstruct a text range list from an xdb file.
//!
//! The exporter sweeps the IPv4 space through a searcher at a fixed
//! stride, coalescing adjacent probes that report the same region into
//! runs. Because probing skips `stride` addresses at a time, any region
//! narrower than the stride that falls entirely between two probes is
//! missed; the exported list approximates the source to stride
//! granularity.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::xdb::format::u32_to_ip;
use crate::xdb::searcher::Searcher;
use crate::xdb::segment::Segment;
use crate::{Error, Result};

/// Default sweep stride in addresses.
pub const DEFAULT_STRIDE: u32 = 256;

/// Default first probed address: 1.0.0.0.
pub const DEFAULT_START_IP: u32 = 0x0100_0000;

/// Region recorded for probes no segment covers.
const EMPTY_REGION_PLACEHOLDER: &str = "0|0|0|0|0|0|0|0";

/// Output writer buffer size.
const WRITE_BUF_LEN: usize = 4 * 1024 * 1024;

/// Tuning knobs for an export sweep.
#[derive(Debug, Clone, Copy)]
pub struct ExportOptions {
    /// Addresses skipped between probes. Regions narrower than this can
    /// be missed entirely.
    pub stride: u32,
    /// First probed address.
    pub start_ip: u32,
    /// Upper sweep bound, inclusive; the final run ends here.
    pub last_ip: u32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            stride: DEFAULT_STRIDE,
            start_ip: DEFAULT_START_IP,
            last_ip: u32::MAX,
        }
    }
}

/// Open `xdb_path` with a vector-mode searcher and export its ranges to
/// `out_path`. Returns the number of runs written.
pub fn export_xdb<P: AsRef<Path>, Q: AsRef<Path>>(
    xdb_path: P,
    out_path: Q,
    options: ExportOptions,
    progress: impl FnMut(u32, u32, usize),
    cancel: &AtomicBool,
) -> Result<usize> {
    let searcher = Searcher::open_vector(xdb_path)?;
    export_with_searcher(&searcher, out_path, options, progress, cancel)
}

/// Export through an already opened searcher (vector or memory mode is
/// strongly recommended; a file-mode sweep issues millions of reads).
///
/// `progress` is invoked at every stride boundary with
/// `(current_ip, last_ip, runs_so_far)`. Cancellation is checked at every
/// stride and during the write phase; a cancelled export leaves no output
/// file behind.
pub fn export_with_searcher<P: AsRef<Path>>(
    searcher: &Searcher,
    out_path: P,
    options: ExportOptions,
    mut progress: impl FnMut(u32, u32, usize),
    cancel: &AtomicBool,
) -> Result<usize> {
    let runs = sweep(searcher, options, &mut progress, cancel)?;
    log::info!("sweep finished, {} runs found", runs.len());

    write_runs(&runs, out_path.as_ref(), cancel)?;
    Ok(runs.len())
}

fn sweep(
    searcher: &Searcher,
    options: ExportOptions,
    progress: &mut impl FnMut(u32, u32, usize),
    cancel: &AtomicBool,
) -> Result<Vec<Segment>> {
    let stride = options.stride.max(1);
    let last_ip = options.last_ip;

    let mut runs: Vec<Segment> = Vec::new();
    let mut current = options.start_ip;
    let mut run_start = current;
    let mut run_region = String::new();

    while current <= last_ip {
        if cancel.load(Ordering::Relaxed) {
            log::info!("export cancelled at {}", u32_to_ip(current));
            return Err(Error::Cancelled);
        }

        let (mut region, _) = searcher.search(current)?;
        if region.is_empty() {
            region = EMPTY_REGION_PLACEHOLDER.to_string();
        }

        if !run_region.is_empty() && region != run_region {
            runs.push(Segment::new(run_start, current - 1, run_region.clone()));
            run_start = current;
        }
        run_region = region;

        progress(current, last_ip, runs.len());

        match current.checked_add(stride) {
            Some(next) => current = next,
            None => break,
        }
    }

    if !run_region.is_empty() {
        runs.push(Segment::new(run_start, last_ip, run_region));
    }
    progress(last_ip, last_ip, runs.len());

    Ok(runs)
}

fn write_runs(runs: &[Segment], out_path: &Path, cancel: &AtomicBool) -> Result<()> {
    let mut out = BufWriter::with_capacity(WRITE_BUF_LEN, File::create(out_path)?);

    for run in runs {
        if cancel.load(Ordering::Relaxed) {
            drop(out);
            let _ = std::fs::remove_file(out_path);
            return Err(Error::Cancelled);
        }
        writeln!(out, "{}", run)?;
    }

    out.flush()?;
    log::info!("wrote {} runs to {}", runs.len(), out_path.display());
    Ok(())
}
