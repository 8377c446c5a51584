//! ipxdb - An offline IPv4-to-region lookup engine.
//!
//! This crate builds, queries, edits and exports "xdb" files: compact,
//! self-describing binary databases mapping IPv4 ranges to opaque region
//! strings.
//!
//! # Features
//!
//! - **Three loader modes**: on-demand file reads, preloaded vector
//!   index, or fully in-memory lookups
//! - **Maker**: compiles a sorted, contiguous text range file into an xdb
//! - **Editor**: overwrites ranges in a text file with automatic
//!   split/merge so the list stays contiguous
//! - **Export**: reconstructs a text range list from an xdb by sweeping
//!   the address space
//! - **Task registry**: status, progress and cooperative cancellation
//!   for long-running builds and exports
//! - **Thread-safe lookups**: positioned reads, no shared cursor
//!
//! # Quick Start
//!
//! ```ignore
//! use ipxdb::{Searcher, SearchMode};
//!
//! let searcher = Searcher::open_vector("ip2region.xdb")?;
//! let (region, io_count) = searcher.search_ip("1.2.3.4")?;
//! println!("{} ({} reads)", region, io_count);
//! ```
//!
//! # Building a database
//!
//! ```ignore
//! use ipxdb::Maker;
//!
//! let mut maker = Maker::new("ip.merge.txt", "ip2region.xdb")?;
//! maker.init()?;
//! maker.start()?;
//! maker.finish()?;
//! ```
//!
//! The text source has one `start|end|region` range per line, sorted by
//! start IP and contiguous: every range starts exactly one address after
//! the previous one ends. `#` comments and blank lines are ignored.

mod cache;
mod error;
mod task;

pub mod xdb;

// Re-export core types
pub use error::{Error, ParseError, Result};

// Re-export the engine surface
pub use xdb::{
    export_with_searcher, export_xdb, Editor, ExportOptions, Maker, SearchMode, Searcher, Segment,
};

// Re-export the task registry
pub use task::{
    spawn_build, spawn_export, task_registry, TaskHandle, TaskKind, TaskRegistry, TaskSnapshot,
    TaskStatus, BUILD_DEADLINE,
};

// Re-export the global searcher cache
pub use cache::{search_stats, search_with_mode, searcher_cache, CacheStatus, SearcherCache};
