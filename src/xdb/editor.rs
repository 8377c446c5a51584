//! Range-list editor over a text range file.
//!
//! The editor keeps the file's ranges in memory as an ordered, contiguous
//! list. Overwrites split the touched ranges so the list stays contiguous:
//! the left and right shoulders of the overwritten window keep their old
//! regions, fully covered interior ranges vanish.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::xdb::format::u32_to_ip;
use crate::xdb::maker::Maker;
use crate::xdb::parser::iterate_segments;
use crate::xdb::segment::Segment;
use crate::{Error, Result};

#[derive(Debug)]
pub struct Editor {
    src_path: PathBuf,
    handle: Option<File>,
    segments: Vec<Segment>,
    dirty: bool,
}

impl Editor {
    /// Open a text range file and load its ranges.
    ///
    /// The file must be contiguous: every range starts right after the
    /// previous one ends. Adjacent same-region ranges are kept separate.
    pub fn open<P: AsRef<Path>>(src_path: P) -> Result<Self> {
        let src_path = std::path::absolute(src_path.as_ref())?;
        let handle = File::open(&src_path)?;
        let segments = load_contiguous(&handle)?;

        Ok(Self {
            src_path,
            handle: Some(handle),
            segments,
            dirty: false,
        })
    }

    /// Number of ranges currently in memory.
    pub fn len(&self) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.segments.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.segments.is_empty())
    }

    /// Whether there are unsaved mutations.
    pub fn is_dirty(&self) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.dirty)
    }

    /// Up to `size` consecutive ranges starting at `offset`.
    pub fn slice(&self, offset: usize, size: usize) -> Result<&[Segment]> {
        self.ensure_open()?;
        if offset >= self.segments.len() {
            return Ok(&[]);
        }
        let end = offset.saturating_add(size).min(self.segments.len());
        Ok(&self.segments[offset..end])
    }

    /// Parse a `start|end|region` literal and overwrite the list with it.
    pub fn put(&mut self, literal: &str) -> Result<(usize, usize)> {
        let seg = Segment::parse(literal)?;
        self.put_segment(seg)
    }

    /// Overwrite the range list with `seg`.
    ///
    /// The contiguous window of existing ranges intersecting `seg` is
    /// replaced by: an optional left shoulder keeping the first range's
    /// region, `seg` itself, and an optional right shoulder keeping the
    /// last range's region. Returns `(replaced, produced)` counts.
    ///
    /// Fails with `NoContainingSegment` when no existing range contains
    /// `seg.start_ip`.
    pub fn put_segment(&mut self, seg: Segment) -> Result<(usize, usize)> {
        self.ensure_open()?;

        // the list is sorted by start ip, so the candidate host is the
        // last range starting at or before seg.start_ip
        let at = self
            .segments
            .partition_point(|s| s.start_ip <= seg.start_ip);
        if at == 0 || !self.segments[at - 1].contains(seg.start_ip) {
            return Err(Error::NoContainingSegment(u32_to_ip(seg.start_ip)));
        }

        let start_idx = at - 1;
        let mut end_idx = start_idx;
        while self.segments[end_idx].end_ip < seg.end_ip && end_idx + 1 < self.segments.len() {
            end_idx += 1;
        }

        let head = &self.segments[start_idx];
        let tail = &self.segments[end_idx];

        let mut replacement = Vec::with_capacity(3);
        if seg.start_ip > head.start_ip {
            replacement.push(Segment::new(
                head.start_ip,
                seg.start_ip - 1,
                head.region.clone(),
            ));
        }
        let (new_start, new_end) = (seg.start_ip, seg.end_ip);
        let tail_end = tail.end_ip;
        let tail_region = tail.region.clone();
        replacement.push(seg);
        if new_end < tail_end {
            replacement.push(Segment::new(new_end + 1, tail_end, tail_region));
        }

        let replaced = end_idx - start_idx + 1;
        let produced = replacement.len();
        self.segments.splice(start_idx..=end_idx, replacement);
        self.dirty = true;

        log::debug!(
            "put segment {}..{}: replaced {}, produced {}",
            u32_to_ip(new_start),
            u32_to_ip(new_end),
            replaced,
            produced
        );
        Ok((replaced, produced))
    }

    /// Stream a range file through [`Self::put_segment`], one range at a
    /// time. Returns the cumulative `(replaced, produced)` counts.
    pub fn put_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(usize, usize)> {
        self.ensure_open()?;
        let handle = File::open(path.as_ref())?;

        let mut replaced = 0usize;
        let mut produced = 0usize;

        // adjacent same-region input ranges are merged before application
        iterate_segments(&handle, true, &mut |seg| {
            let (r, p) = self.put_segment(seg)?;
            replaced += r;
            produced += p;
            Ok(())
        })?;
        Ok((replaced, produced))
    }

    /// Write the current ranges back to the source file and reload.
    /// A no-op when there are no unsaved mutations.
    pub fn save(&mut self) -> Result<()> {
        self.ensure_open()?;
        if !self.dirty {
            return Ok(());
        }

        // release the read handle before truncating the file
        self.handle = None;
        {
            let mut out = BufWriter::new(File::create(&self.src_path)?);
            for seg in &self.segments {
                writeln!(out, "{}", seg)?;
            }
            out.flush()?;
        }

        let handle = File::open(&self.src_path)?;
        self.segments = load_contiguous(&handle)?;
        self.handle = Some(handle);
        self.dirty = false;

        log::info!(
            "saved {} segments to {}",
            self.segments.len(),
            self.src_path.display()
        );
        Ok(())
    }

    /// Save pending mutations, then build an xdb from the source file.
    pub fn save_to_xdb<P: AsRef<Path>>(&mut self, dst_path: P) -> Result<()> {
        self.save()?;

        let mut maker = Maker::new(&self.src_path, dst_path.as_ref())?;
        maker.init()?;
        maker.start()?;
        maker.finish()?;
        Ok(())
    }

    /// Release the file handle and discard the in-memory list.
    pub fn close(&mut self) {
        self.handle = None;
        self.segments.clear();
        self.dirty = false;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.handle.is_none() {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

/// Load a range file without merging, enforcing contiguity.
fn load_contiguous(handle: &File) -> Result<Vec<Segment>> {
    let mut segments: Vec<Segment> = Vec::new();
    iterate_segments(handle, false, &mut |seg| {
        seg.after_check(segments.last())?;
        segments.push(seg);
        Ok(())
    })?;
    Ok(segments)
}
