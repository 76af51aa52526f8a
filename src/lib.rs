//! MarFS core: object-id/recovery-info wire formats, the FTAG/RTAG
//! stream descriptors, the weighted consistent-hash distributor, the
//! config/namespace model, the NE erasure engine, the MDAL metadata
//! trait, and the resource-manager WAL engine (opinfo/resourcelog/
//! resourceinput/resourcemgr) that batch-processes delete/rebuild/
//! repack work across ranks.
//!
//! Everything here is a library: the `verifyconf` binary is the one
//! in-scope CLI front end, wiring `clap` arguments to `Config`
//! loading and the MDAL/DAL health checks it runs.

pub mod config;
pub mod distributor;
pub mod error;
pub mod ftag;
pub mod mdal;
pub mod ne;
pub mod object_id;
pub mod opinfo;
pub mod recovery_info;
pub mod resourceinput;
pub mod resourcelog;
pub mod resourcemgr;

use lazy_static::lazy_static;
use mut_static::MutStatic;

lazy_static! {
    /// Distinguishes interactive (FUSE-mount style) access from batch
    /// (resource-manager) access for [`config::namespace::required_perms`];
    /// set once at process start by whichever binary links this crate.
    pub static ref MARFS_INTERACTIVE: MutStatic<bool> = MutStatic::from(false);
}

pub use error::{MarfsError, MarfsResult};
