//! Data Abstraction Layer (DAL): per-repo block storage backend.
//!
//! Each repo owns a private instance of a DAL backend, so that backend
//! options never bleed between repos. A backend produces per-block
//! stream contexts; a context is opened once for either a put or a get
//! and carries state across the put/get/sync/abort/close sequence.

use std::fmt;

pub mod posix;
pub mod noop;
pub mod mc;

#[derive(thiserror::Error, Debug)]
pub enum DalError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("context reused while still open (EBADF)")]
    BadFileDescriptor,
    #[error("operation timed out after {0}s")]
    Timeout(u16),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

pub type DalResult<T> = Result<T, DalError>;

bitflags::bitflags! {
    /// Per-context open-stream-flags, mirroring the `OSF_*` bits an
    /// implementer is expected to track on every block handle.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct OsFlags: u8 {
        const OPEN   = 0b0000_0001;
        const EOF    = 0b0000_0010;
        const ABORT  = 0b0000_0100;
        const CLOSED = 0b0000_1000;
        const PUT    = 0b0001_0000;
        const GET    = 0b0010_0000;
    }
}

/// Physical target of one block within an NE stripe: which repo/pod/cap
/// ("scatter" in MarFS terms -- one of the per-pod capacity units) and
/// which block index within the stripe it corresponds to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockLocation {
    pub repo: String,
    pub pod: usize,
    pub cap: usize,
    pub scatter: usize,
    pub block: usize,
    /// Backend-resolved physical path/key for this block, filled in by
    /// `update_object_location`. Must be recomputed before every new
    /// open -- it is not guaranteed stable across repacks/rebuilds.
    pub object_path: String,
}

impl fmt::Display for BlockLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/pod{}/cap{}/scatter{}/block{}",
            self.repo, self.pod, self.cap, self.scatter, self.block
        )
    }
}

/// One open block-stream handle. A context is produced fresh for every
/// open() and must not be reused once closed.
pub trait BlockStreamContext: Send {
    /// Allocate stream state and set the direction for this context.
    /// Returns `BadFileDescriptor` if this context is already open.
    fn open(
        &mut self,
        is_put: bool,
        chunk_offset: u64,
        content_len: u64,
        preserve_write_count: bool,
        timeout_secs: u16,
    ) -> DalResult<()>;

    /// Append `buf` to the stream, returning the number of bytes
    /// written (may be less than `buf.len()` on a short write).
    fn put(&mut self, buf: &[u8]) -> DalResult<usize>;

    /// Read up to `buf.len()` bytes, returning 0 at EOF.
    fn get(&mut self, buf: &mut [u8]) -> DalResult<usize>;

    /// Last point at which pending errors may surface before close.
    fn sync(&mut self) -> DalResult<()>;

    /// Cancel an open stream, leaving no persistent object behind.
    fn abort(&mut self) -> DalResult<()>;

    /// Finalize the stream. Further ops on this context fail with
    /// `BadFileDescriptor`.
    fn close(&mut self) -> DalResult<()>;

    fn flags(&self) -> OsFlags;
}

/// Per-repo storage backend. Implementations own whatever connection
/// state (open fds, socket pools, in-memory buffers) their storage
/// target needs; the DAL itself is otherwise stateless between calls.
pub trait DataAbstractionLayer: Send + Sync {
    /// Produce a fresh, unopened context targeting `location`.
    fn new_context(&self, location: &BlockLocation) -> Box<dyn BlockStreamContext>;

    /// Recompute the physical target for `location`. Must be called
    /// before every new open -- a backend may rotate physical targets
    /// (e.g. host-template randomization) between opens of the same
    /// logical block.
    fn update_object_location(&self, location: &mut BlockLocation) -> DalResult<()>;

    /// Remove an object and all of its blocks.
    fn delete(&self, location: &BlockLocation) -> DalResult<()>;

    /// Human-readable backend name, used in degraded-object logging.
    fn backend_name(&self) -> &'static str;
}

/// One line of the MC DAL's degraded-object log: everything a later,
/// asynchronous rebuild pass needs to locate and repair a stripe that
/// hit an I/O error during a prior open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DegradedEntry {
    pub object_path_template: String,
    pub n: u32,
    pub e: u32,
    pub start_block: u32,
    pub error_pattern: u32,
    pub repo: String,
    pub pod: u32,
    pub cap: u32,
}

impl DegradedEntry {
    /// `%s\t%d\t%d\t%d\t%d\t%s\t%d\t%d\t\n`
    pub fn to_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t\n",
            self.object_path_template,
            self.n,
            self.e,
            self.start_block,
            self.error_pattern,
            self.repo,
            self.pod,
            self.cap
        )
    }

    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\n', '\t']);
        let mut parts = line.split('\t');
        Some(Self {
            object_path_template: parts.next()?.to_string(),
            n: parts.next()?.parse().ok()?,
            e: parts.next()?.parse().ok()?,
            start_block: parts.next()?.parse().ok()?,
            error_pattern: parts.next()?.parse().ok()?,
            repo: parts.next()?.to_string(),
            pod: parts.next()?.parse().ok()?,
            cap: parts.next()?.parse().ok()?,
        })
    }
}

/// Capability a DAL backend may expose for recording degraded stripes,
/// so that the erasure engine can schedule asynchronous rebuilds
/// without needing to know it is talking to the MC backend specifically.
pub trait DegradedLogger: Send + Sync {
    fn record_degraded(&self, entry: DegradedEntry) -> DalResult<()>;
}

/// The backend variants a repo may be configured to use. SEMI and S3
/// transport are documented boundaries only: SEMI reuses the POSIX
/// xattr `md_path` to point at an external filesystem (moving a SEMI
/// object to trash is unsupported, see open question in DESIGN.md);
/// S3 delegates to the aws4c/S3 transport, which this core treats as
/// an external collaborator and does not implement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, num_enum::TryFromPrimitive, num_enum::IntoPrimitive, serde::Deserialize)]
#[repr(u8)]
#[serde(rename_all = "UPPERCASE")]
pub enum DalVariant {
    Posix = 0,
    Mc = 1,
    Noop = 2,
    S3 = 3,
    Direct = 4,
    Semi = 5,
}

impl fmt::Display for DalVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DalVariant::Posix => "POSIX",
            DalVariant::Mc => "MC",
            DalVariant::Noop => "NOOP",
            DalVariant::S3 => "S3",
            DalVariant::Direct => "DIRECT",
            DalVariant::Semi => "SEMI",
        };
        f.write_str(s)
    }
}
