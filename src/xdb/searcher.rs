//! xdb searcher with three loader modes.
//!
//! - **File**: every lookup reads the vector cell, the segment index
//!   probes, and the region bytes from disk.
//! - **Vector**: the 512 KiB vector index is preloaded, cutting one read
//!   per lookup; segment index and payload stay on disk.
//! - **Memory**: the whole file lives in one owned buffer and no file
//!   handle is retained; lookups never touch the disk.
//!
//! All file reads are positioned (`read_exact_at`), so a single searcher
//! is safe for concurrent lookups in every mode.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::str::FromStr;

use crate::xdb::format::{
    read_u16_le, read_u32_le, Header, HEADER_LEN, SEGMENT_INDEX_LEN, VECTOR_CELL, VECTOR_COLS,
    VECTOR_LEN,
};
use crate::{Error, Result};

/// Loader mode of a [`Searcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchMode {
    File,
    Vector,
    Memory,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::File => "file",
            SearchMode::Vector => "vector",
            SearchMode::Memory => "memory",
        }
    }
}

impl FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(SearchMode::File),
            "vector" => Ok(SearchMode::Vector),
            "memory" => Ok(SearchMode::Memory),
            other => Err(Error::UnsupportedSearchMode(other.to_string())),
        }
    }
}

/// Region lookup engine over an immutable xdb file.
pub struct Searcher {
    mode: SearchMode,
    handle: Option<File>,
    file_len: u64,
    vector_index: Option<Vec<u8>>,
    content: Option<Vec<u8>>,
    closed: bool,
}

impl Searcher {
    /// Open an xdb for on-demand reads. Nothing is preloaded.
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(path, SearchMode::File)
    }

    /// Open an xdb and preload the vector index into memory.
    pub fn open_vector<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(path, SearchMode::Vector)
    }

    /// Read the whole xdb into an owned buffer; no file handle is kept.
    pub fn open_memory<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(path, SearchMode::Memory)
    }

    /// Open an xdb in the given loader mode.
    pub fn open<P: AsRef<Path>>(path: P, mode: SearchMode) -> Result<Self> {
        let path = path.as_ref();

        if mode == SearchMode::Memory {
            let content = std::fs::read(path)?;
            check_min_len(content.len() as u64)?;
            Header::decode(&content)?;
            log::debug!(
                "opened {} in memory mode, {} bytes",
                path.display(),
                content.len()
            );
            return Ok(Self {
                mode,
                handle: None,
                file_len: content.len() as u64,
                vector_index: None,
                content: Some(content),
                closed: false,
            });
        }

        let handle = File::open(path)?;
        let file_len = handle.metadata()?.len();
        check_min_len(file_len)?;

        let mut header_buf = [0u8; HEADER_LEN];
        handle.read_exact_at(&mut header_buf, 0)?;
        Header::decode(&header_buf)?;

        let vector_index = if mode == SearchMode::Vector {
            let mut buf = vec![0u8; VECTOR_LEN];
            handle.read_exact_at(&mut buf, HEADER_LEN as u64)?;
            Some(buf)
        } else {
            None
        };

        log::debug!("opened {} in {} mode", path.display(), mode.as_str());
        Ok(Self {
            mode,
            handle: Some(handle),
            file_len,
            vector_index,
            content: None,
            closed: false,
        })
    }

    /// Find the region for `ip`.
    ///
    /// Returns the region string (empty when no segment covers `ip`) and
    /// the number of backing-file reads this lookup issued.
    pub fn search(&self, ip: u32) -> Result<(String, usize)> {
        if self.closed {
            return Err(Error::Closed);
        }

        let mut io_count = 0usize;

        // 1, locate the vector cell for the top two bytes
        let idx =
            (((ip >> 24) & 0xFF) as usize * VECTOR_COLS + ((ip >> 16) & 0xFF) as usize)
                * VECTOR_CELL;
        let (s_ptr, e_ptr) = if let Some(vector) = &self.vector_index {
            (read_u32_le(vector, idx), read_u32_le(vector, idx + 4))
        } else if let Some(content) = &self.content {
            let off = HEADER_LEN + idx;
            (read_u32_le(content, off), read_u32_le(content, off + 4))
        } else {
            let mut cell = [0u8; VECTOR_CELL];
            self.read_at(&mut cell, (HEADER_LEN + idx) as u64, &mut io_count)?;
            (read_u32_le(&cell, 0), read_u32_le(&cell, 4))
        };

        // an untouched (0, 0) cell falls under this check as well
        if s_ptr >= e_ptr {
            return Ok((String::new(), io_count));
        }
        if (e_ptr - s_ptr) as usize % SEGMENT_INDEX_LEN != 0 || e_ptr as u64 > self.total_len() {
            return Err(Error::CorruptXdb(format!(
                "vector cell run [{}, {}) is malformed",
                s_ptr, e_ptr
            )));
        }

        // 2, binary search the cell's segment index run
        let count = (e_ptr - s_ptr) as usize / SEGMENT_INDEX_LEN;
        let mut record = [0u8; SEGMENT_INDEX_LEN];
        let mut hit: Option<(usize, u32)> = None;
        let (mut low, mut high) = (0i64, count as i64 - 1);
        while low <= high {
            let mid = (low + high) >> 1;
            let offset = s_ptr as u64 + mid as u64 * SEGMENT_INDEX_LEN as u64;
            self.read_at(&mut record, offset, &mut io_count)?;

            let start_ip = read_u32_le(&record, 0);
            if ip < start_ip {
                high = mid - 1;
            } else if ip > read_u32_le(&record, 4) {
                low = mid + 1;
            } else {
                hit = Some((read_u16_le(&record, 8) as usize, read_u32_le(&record, 10)));
                break;
            }
        }

        let Some((region_len, region_ptr)) = hit else {
            return Ok((String::new(), io_count));
        };
        if region_len == 0 {
            return Ok((String::new(), io_count));
        }

        // 3, load the region bytes from the data payload
        let mut region_buf = vec![0u8; region_len];
        self.read_at(&mut region_buf, region_ptr as u64, &mut io_count)?;
        let region = String::from_utf8(region_buf)
            .map_err(|_| Error::CorruptXdb(format!("region at {} is not UTF-8", region_ptr)))?;

        Ok((region, io_count))
    }

    /// Parse a dotted-quad IP and search for its region.
    pub fn search_ip(&self, ip_text: &str) -> Result<(String, usize)> {
        let ip = crate::xdb::format::ip2u32(ip_text)?;
        self.search(ip)
    }

    /// Release the file handle and any owned buffers. Idempotent.
    pub fn close(&mut self) {
        self.handle = None;
        self.vector_index = None;
        self.content = None;
        self.closed = true;
    }

    /// Whether this searcher serves lookups from an owned buffer.
    pub fn is_memory_mode(&self) -> bool {
        self.mode == SearchMode::Memory
    }

    /// Whether the vector index is addressable without file reads.
    pub fn is_vector_index_loaded(&self) -> bool {
        !self.closed && (self.vector_index.is_some() || self.content.is_some())
    }

    /// Size of the in-memory content buffer, or the backing file size.
    pub fn content_buffer_size(&self) -> u64 {
        if self.closed {
            return 0;
        }
        match &self.content {
            Some(content) => content.len() as u64,
            None => self.file_len,
        }
    }

    /// Bytes of vector index held in memory.
    pub fn vector_index_size(&self) -> usize {
        if self.closed {
            return 0;
        }
        match (&self.vector_index, &self.content) {
            (Some(vector), _) => vector.len(),
            (None, Some(_)) => VECTOR_LEN,
            (None, None) => 0,
        }
    }

    /// Loader mode this searcher was opened with.
    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    fn total_len(&self) -> u64 {
        match &self.content {
            Some(content) => content.len() as u64,
            None => self.file_len,
        }
    }

    /// Fill `buf` from the backing store at `offset`, counting file reads.
    fn read_at(&self, buf: &mut [u8], offset: u64, io_count: &mut usize) -> Result<()> {
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or_else(|| Error::CorruptXdb(format!("read offset {} overflows", offset)))?;
        if end > self.total_len() {
            return Err(Error::CorruptXdb(format!(
                "read of {} bytes at {} runs past end of data ({} bytes)",
                buf.len(),
                offset,
                self.total_len()
            )));
        }

        if let Some(content) = &self.content {
            buf.copy_from_slice(&content[offset as usize..end as usize]);
            return Ok(());
        }

        let handle = self.handle.as_ref().ok_or(Error::Closed)?;
        *io_count += 1;
        handle.read_exact_at(buf, offset)?;
        Ok(())
    }
}

fn check_min_len(len: u64) -> Result<()> {
    let min = (HEADER_LEN + VECTOR_LEN) as u64;
    if len < min {
        return Err(Error::TruncatedFile {
            expected: min,
            actual: len,
        });
    }
    Ok(())
}
