//! Typed error kinds, per the five families the core distinguishes:
//! transient per-block I/O, unrecoverable stripe loss, invalid config,
//! WAL protocol violations, timeouts, and corruption. Library code
//! returns `MarfsResult`; only the CLI binary collapses these into
//! `anyhow` for display.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFrameError {
    ShortBuffer { need: usize, got: usize },
}

impl std::fmt::Display for WireFrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireFrameError::ShortBuffer { need, got } => {
                write!(f, "short buffer decoding wire frame: need {need} bytes, got {got}")
            }
        }
    }
}

impl std::error::Error for WireFrameError {}

#[derive(Error, Debug)]
pub enum MarfsError {
    /// Per-block DAL get/put failure, isolated to that block. NE
    /// reconstructs from parity when possible; this is not retried
    /// automatically.
    #[error("transient i/o error on block {block}: {source}")]
    TransientIo {
        block: usize,
        #[source]
        source: dal::DalError,
    },

    /// More than E blocks faulted: the handle is unusable for reads.
    #[error("unrecoverable: {faulted} of {n_plus_e} blocks faulted (max tolerable {max_tolerable})")]
    Unrecoverable {
        faulted: usize,
        n_plus_e: usize,
        max_tolerable: usize,
    },

    /// Cross-field contradiction at config load time. Fatal at init.
    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    /// Op-completion without a matching op-start, excessive op count,
    /// or FTAG mismatch across a WAL chain. Fatal for the log.
    #[error("resourcelog protocol violation: {0}")]
    ProtocolViolation(String),

    /// A wait-deadline on RESOURCEINPUT, a DAL op, or a lock expired.
    /// Non-fatal; the caller decides whether to retry.
    #[error("timeout after {0}s")]
    Timeout(u64),

    /// `RESOURCELOG::term` called while `outstandingcnt != 0` (EAGAIN
    /// in the original). Non-fatal; state is left intact.
    #[error("resourcelog has {0} outstanding operations, cannot terminate")]
    LogBusy(u64),

    /// A bad recovery-info trailer, bad CRC, or torn FTAG. Promotes to
    /// `TransientIo` for the owning block, or `Unrecoverable` if
    /// N-consensus cannot be reached.
    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("wire frame error: {0}")]
    WireFrame(#[from] WireFrameError),

    #[error(transparent)]
    Dal(#[from] dal::DalError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type MarfsResult<T> = Result<T, MarfsError>;
