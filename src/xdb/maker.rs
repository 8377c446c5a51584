//! xdb maker: builds the binary artifact from a text range file.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use ahash::AHashMap;

use crate::xdb::format::{
    read_u32_le, write_u32_le, Header, IndexPolicy, HEADER_LEN, MAX_REGION_LEN, SEGMENT_INDEX_LEN,
    VECTOR_CELL, VECTOR_COLS, VECTOR_LEN, VERSION_NO,
};
use crate::xdb::parser::iterate_segments;
use crate::xdb::segment::Segment;
use crate::{Error, Result};

/// Progress callback: `(segments_processed, segments_total)`.
pub type ProgressFn = Box<dyn FnMut(u64, u64) + Send>;

/// How many source segments between two progress reports.
const PROGRESS_EVERY: usize = 4096;

/// Builds an xdb file from a sorted, contiguous text range file.
pub struct Maker {
    src: Option<File>,
    dst: Option<File>,
    index_policy: IndexPolicy,
    segments: Vec<Segment>,
    region_pool: AHashMap<String, u32>,
    vector_index: Vec<u8>,
    cancel: Option<Arc<AtomicBool>>,
    deadline: Option<Instant>,
    progress: Option<ProgressFn>,
}

impl Maker {
    /// Open the source text file read-only and create/truncate the
    /// destination xdb file.
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(src_path: P, dst_path: Q) -> Result<Self> {
        let src = File::open(src_path.as_ref()).map_err(|source| Error::SrcOpen {
            path: src_path.as_ref().to_path_buf(),
            source,
        })?;

        let dst = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(dst_path.as_ref())
            .map_err(|source| Error::DstOpen {
                path: dst_path.as_ref().to_path_buf(),
                source,
            })?;

        Ok(Self {
            src: Some(src),
            dst: Some(dst),
            index_policy: IndexPolicy::Vector,
            segments: Vec::new(),
            region_pool: AHashMap::new(),
            vector_index: vec![0u8; VECTOR_LEN],
            cancel: None,
            deadline: None,
            progress: None,
        })
    }

    /// Attach a cooperative cancel flag, checked at every record write.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Fail the build with `DeadlineExceeded` once `deadline` passes.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Report progress after every batch of source segments.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Number of segments loaded from the source file.
    pub fn segments_count(&self) -> usize {
        self.segments.len()
    }

    /// Write the header skeleton and load all source segments.
    pub fn init(&mut self) -> Result<()> {
        self.init_db_header()?;
        self.load_segments()?;
        Ok(())
    }

    fn init_db_header(&mut self) -> Result<()> {
        log::info!("initializing the db header");

        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as u32;
        let header = Header {
            version: VERSION_NO,
            index_policy: self.index_policy.as_u16(),
            created_at,
            start_index_ptr: 0,
            end_index_ptr: 0,
        };

        let dst = self.dst.as_mut().ok_or(Error::Closed)?;
        dst.seek(SeekFrom::Start(0))?;
        dst.write_all(&header.encode())?;
        Ok(())
    }

    fn load_segments(&mut self) -> Result<()> {
        let started = Instant::now();
        let src = self.src.as_ref().ok_or(Error::Closed)?;

        let mut segments: Vec<Segment> = Vec::new();
        iterate_segments(src, true, &mut |seg| {
            seg.after_check(segments.last())?;
            segments.push(seg);
            Ok(())
        })?;

        // the contiguity check already implies start-ip order
        segments.sort_by_key(|seg| seg.start_ip);
        self.segments = segments;

        log::info!(
            "all segments loaded, length: {}, elapsed: {:?}",
            self.segments.len(),
            started.elapsed()
        );
        Ok(())
    }

    /// Emit the data payload, segment index, vector index, and header
    /// pointer fixup.
    pub fn start(&mut self) -> Result<()> {
        if self.segments.is_empty() {
            return Err(Error::EmptyInput);
        }

        let region_refs = self.write_data_payload()?;
        let (start_index_ptr, end_index_ptr) = self.write_segment_index(&region_refs)?;
        self.write_vector_index()?;
        self.fixup_header(start_index_ptr, end_index_ptr)?;
        Ok(())
    }

    /// Write each distinct region once and return the `(payload offset,
    /// byte length)` pair for every segment, in segment order.
    fn write_data_payload(&mut self) -> Result<Vec<(u32, u16)>> {
        log::info!("writing the data payload");
        self.dst
            .as_mut()
            .ok_or(Error::Closed)?
            .seek(SeekFrom::Start((HEADER_LEN + VECTOR_LEN) as u64))?;

        let mut refs = Vec::with_capacity(self.segments.len());
        for seg in &self.segments {
            if seg.region.len() > MAX_REGION_LEN {
                return Err(Error::RegionTooLong(seg.region.len()));
            }

            let ptr = match self.region_pool.get(&seg.region) {
                Some(ptr) => *ptr,
                None => {
                    let dst = self.dst.as_mut().ok_or(Error::Closed)?;
                    let pos = dst.stream_position()? as u32;
                    dst.write_all(seg.region.as_bytes())?;
                    self.region_pool.insert(seg.region.clone(), pos);
                    pos
                }
            };
            refs.push((ptr, seg.region.len() as u16));
        }
        Ok(refs)
    }

    /// Write the /16-split segment index records, updating the in-memory
    /// vector index as each record lands. Returns the file offsets of the
    /// first and last records.
    fn write_segment_index(&mut self, region_refs: &[(u32, u16)]) -> Result<(u32, u32)> {
        log::info!("writing the segment index");

        let segments = std::mem::take(&mut self.segments);
        let result = self.write_segment_records(&segments, region_refs);
        self.segments = segments;
        result
    }

    fn write_segment_records(
        &mut self,
        segments: &[Segment],
        region_refs: &[(u32, u16)],
    ) -> Result<(u32, u32)> {
        let total = segments.len() as u64;
        let mut record = [0u8; SEGMENT_INDEX_LEN];
        let mut start_index_ptr: Option<u32> = None;
        let mut end_index_ptr = 0u32;

        // the payload pass left the cursor at the segment index start
        for (i, seg) in segments.iter().enumerate() {
            self.check_interrupt()?;
            let (region_ptr, region_len) = region_refs[i];

            for sub in seg.split() {
                write_u32_le(&mut record, 0, sub.start_ip);
                write_u32_le(&mut record, 4, sub.end_ip);
                record[8..10].copy_from_slice(&region_len.to_le_bytes());
                write_u32_le(&mut record, 10, region_ptr);

                let dst = self.dst.as_mut().ok_or(Error::Closed)?;
                let pos = dst.stream_position()? as u32;
                dst.write_all(&record)?;

                self.set_vector_index(sub.start_ip, pos);
                start_index_ptr.get_or_insert(pos);
                end_index_ptr = pos;
            }

            if (i + 1) % PROGRESS_EVERY == 0 || i + 1 == segments.len() {
                if let Some(progress) = self.progress.as_mut() {
                    progress((i + 1) as u64, total);
                }
            }
        }

        Ok((start_index_ptr.unwrap_or(0), end_index_ptr))
    }

    fn write_vector_index(&mut self) -> Result<()> {
        log::info!("writing the vector index");
        let dst = self.dst.as_mut().ok_or(Error::Closed)?;
        dst.seek(SeekFrom::Start(HEADER_LEN as u64))?;
        dst.write_all(&self.vector_index)?;
        Ok(())
    }

    fn fixup_header(&mut self, start_index_ptr: u32, end_index_ptr: u32) -> Result<()> {
        let mut buf = [0u8; 8];
        write_u32_le(&mut buf, 0, start_index_ptr);
        write_u32_le(&mut buf, 4, end_index_ptr);

        let dst = self.dst.as_mut().ok_or(Error::Closed)?;
        dst.seek(SeekFrom::Start(8))?;
        dst.write_all(&buf)?;
        Ok(())
    }

    /// Record `ptr` in the vector cell for `ip`'s top two bytes.
    fn set_vector_index(&mut self, ip: u32, ptr: u32) {
        let idx = (((ip >> 24) & 0xFF) as usize * VECTOR_COLS + ((ip >> 16) & 0xFF) as usize)
            * VECTOR_CELL;
        if read_u32_le(&self.vector_index, idx) == 0 {
            write_u32_le(&mut self.vector_index, idx, ptr);
        }
        write_u32_le(
            &mut self.vector_index,
            idx + 4,
            ptr + SEGMENT_INDEX_LEN as u32,
        );
    }

    fn check_interrupt(&self) -> Result<()> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Flush the destination file to stable storage and close both files.
    ///
    /// The loaded segment list (and [`Self::segments_count`]) survives the
    /// close. Fails with `Closed` when called twice.
    pub fn finish(&mut self) -> Result<()> {
        let src = self.src.take();
        let dst = self.dst.take().ok_or(Error::Closed)?;
        dst.sync_all()?;
        drop(dst);
        drop(src);

        log::info!("xdb build finished, {} segments", self.segments.len());
        Ok(())
    }

    /// Release any file handles still open.
    pub fn close(self) {}
}
