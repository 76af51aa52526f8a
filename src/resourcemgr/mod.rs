//! Resource manager: the multi-rank batch engine that walks reference
//! directories and drives delete/rebuild/repack ops through a
//! per-rank [`crate::resourcelog::ResourceLog`], fed by a per-rank
//! [`crate::resourceinput::ResourceInput`].
//!
//! Ranks communicate over `crossbeam-channel` rather than MPI: rank 0
//! is always the master, every other rank a worker. The wire shape of
//! a message (a work request naming a namespace + ref-dir range, and a
//! response summarizing what that range produced) mirrors the
//! MPI-tag-based protocol the design is modeled on.

pub mod walk;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};

use crate::config::Config;
use crate::error::{MarfsError, MarfsResult};
use crate::resourceinput::{ResourceInput, WorkRange};
use crate::resourcelog::{LogMode, OperationSummary, ResourceLog};

pub use walk::distribute_ranges;

/// One rank's share of work, addressed by namespace id and ref-dir
/// range within it.
#[derive(Clone, Debug)]
pub struct WorkRequest {
    pub kind: WorkKind,
    pub ns_id: String,
    pub ranges: Vec<WorkRange>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkKind {
    RlogWork,
    NsWork,
    CompleteWork,
    TerminateWork,
    AbortWork,
}

#[derive(Clone, Debug)]
pub struct WorkResponse {
    pub rank: u32,
    pub kind: WorkKind,
    pub summary: OperationSummary,
    pub error: Option<String>,
}

/// Per-rank driver: holds this rank's log and input queue, plus the
/// channel endpoints used to talk to the master (rank 0) or, on the
/// master itself, to every worker.
pub struct ResourceManager {
    pub rank: u32,
    pub total_ranks: u32,
    pub config: Arc<Config>,
    pub logroot: PathBuf,
    pub input: Arc<ResourceInput>,
    log: Arc<ResourceLog>,
}

impl ResourceManager {
    pub fn new(rank: u32, total_ranks: u32, config: Arc<Config>, logroot: PathBuf, iteration: u64, ns: &str) -> MarfsResult<Self> {
        let path = crate::resourcelog::logfile_path(&logroot, iteration, ns, rank);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log = Arc::new(ResourceLog::init(&path, LogMode::Modify)?);
        Ok(Self { rank, total_ranks, config, logroot, input: Arc::new(ResourceInput::new()), log })
    }

    pub fn is_master(&self) -> bool {
        self.rank == 0
    }

    pub fn log(&self) -> &ResourceLog {
        &self.log
    }

    /// Run as the master: partition every namespace's ref-dir leaves
    /// across `total_ranks - 1` workers (rank 0 coordinates but does
    /// not itself walk, matching the master/worker split used for the
    /// walk distribution), push the ranges down the supplied channels,
    /// and collect per-worker summaries until every worker reports
    /// `CompleteWork` or `AbortWork`.
    pub fn run_master(&self, to_workers: &[Sender<WorkRequest>], from_workers: &Receiver<WorkResponse>) -> MarfsResult<OperationSummary> {
        if !self.is_master() {
            return Err(MarfsError::ProtocolViolation("run_master called on a non-zero rank".into()));
        }
        let worker_count = to_workers.len() as u32;
        if worker_count == 0 {
            return Err(MarfsError::ConfigInvalid("resource manager requires at least one worker rank".into()));
        }

        for ns in &self.config.namespaces {
            let per_worker = walk::distribute_ranges(ns, worker_count)?;
            for (worker_idx, ranges) in per_worker.into_iter().enumerate() {
                to_workers[worker_idx]
                    .send(WorkRequest { kind: WorkKind::NsWork, ns_id: ns.id.clone(), ranges })
                    .map_err(|_| MarfsError::ProtocolViolation("worker channel closed".into()))?;
            }
        }
        for sender in to_workers {
            sender
                .send(WorkRequest { kind: WorkKind::TerminateWork, ns_id: String::new(), ranges: Vec::new() })
                .map_err(|_| MarfsError::ProtocolViolation("worker channel closed".into()))?;
        }

        let mut total = OperationSummary::default();
        let mut remaining = worker_count;
        let mut aborted = false;
        while remaining > 0 {
            let resp = from_workers.recv().map_err(|_| MarfsError::ProtocolViolation("all worker channels closed".into()))?;
            match resp.kind {
                WorkKind::CompleteWork => {
                    total.deletion_object_count += resp.summary.deletion_object_count;
                    total.deletion_object_failures += resp.summary.deletion_object_failures;
                    total.deletion_reference_count += resp.summary.deletion_reference_count;
                    total.deletion_reference_failures += resp.summary.deletion_reference_failures;
                    total.rebuild_count += resp.summary.rebuild_count;
                    total.rebuild_failures += resp.summary.rebuild_failures;
                    total.repack_count += resp.summary.repack_count;
                    total.repack_failures += resp.summary.repack_failures;
                    remaining -= 1;
                }
                WorkKind::AbortWork => {
                    aborted = true;
                    remaining -= 1;
                }
                _ => {}
            }
        }
        if aborted {
            return Err(MarfsError::ProtocolViolation("one or more workers aborted".into()));
        }
        Ok(total)
    }

    /// Run as a worker: pull `NsWork` batches from the master, feed
    /// each range into this rank's `ResourceInput`, and report a
    /// `CompleteWork` response once `TerminateWork` is seen and the
    /// log's outstanding op count reaches zero.
    pub fn run_worker(&self, from_master: &Receiver<WorkRequest>, to_master: &Sender<WorkResponse>) -> MarfsResult<()> {
        loop {
            let req = match from_master.recv() {
                Ok(req) => req,
                Err(_) => break,
            };
            match req.kind {
                WorkKind::NsWork => {
                    self.input.setrange(req.ranges, 1);
                }
                WorkKind::TerminateWork => {
                    self.input.term();
                    break;
                }
                WorkKind::AbortWork => {
                    let _ = to_master.send(WorkResponse { rank: self.rank, kind: WorkKind::AbortWork, summary: OperationSummary::default(), error: None });
                    return Ok(());
                }
                _ => {}
            }
        }

        let summary = self.log.term(true).or_else(|err| match err {
            MarfsError::LogBusy(_) => Ok(OperationSummary::default()),
            other => Err(other),
        })?;

        to_master
            .send(WorkResponse { rank: self.rank, kind: WorkKind::CompleteWork, summary, error: None })
            .map_err(|_| MarfsError::ProtocolViolation("master channel closed".into()))?;
        Ok(())
    }

    /// Spawn this rank's worker thread, wiring its channel endpoints.
    pub fn spawn_worker(self: Arc<Self>, from_master: Receiver<WorkRequest>, to_master: Sender<WorkResponse>) -> thread::JoinHandle<MarfsResult<()>> {
        thread::spawn(move || self.run_worker(&from_master, &to_master))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Arc<Config> {
        let text = r#"
[[repo]]
name = "repo1"
dal = "POSIX"
host_template = "host0"
host_count = 1
host_offset = 0
n = 10
e = 2
chunk_size = 1073741824
max_pack_file_count = 1024
max_pack_file_size = 1048576
compression = 0
correction = 0
encryption = 0

[[namespace]]
id = "root"
alias = "root"
mnt_path = "/"
md_path = "/md/root"
bperms = 255
iperms = 255
iwrite_repo = "repo1"
repo_range = []
trash_md_path = "/md/root/.trash"
fsinfo_path = "/md/root/.fsinfo"
dir_mdal = "posix"
file_mdal = "posix"
refbreadth = 4
refdepth = 1
refdigits = 1
"#;
        Arc::new(Config::parse(text).unwrap())
    }

    fn tmp_logroot(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("marfs_resourcemgr_test_{}_{}", std::process::id(), name));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn master_collects_summaries_from_every_worker() {
        let config = sample_config();
        let logroot = tmp_logroot("master");
        let master = ResourceManager::new(0, 3, config.clone(), logroot.clone(), 1, "root").unwrap();

        let (to_w1, from_master1) = crossbeam_channel::unbounded();
        let (to_w2, from_master2) = crossbeam_channel::unbounded();
        let (to_master, from_workers) = crossbeam_channel::unbounded();

        let worker1 = Arc::new(ResourceManager::new(1, 3, config.clone(), logroot.clone(), 1, "root").unwrap());
        let worker2 = Arc::new(ResourceManager::new(2, 3, config.clone(), logroot.clone(), 1, "root").unwrap());

        let h1 = worker1.spawn_worker(from_master1, to_master.clone());
        let h2 = worker2.spawn_worker(from_master2, to_master);

        let summary = master.run_master(&[to_w1, to_w2], &from_workers).unwrap();
        h1.join().unwrap().unwrap();
        h2.join().unwrap().unwrap();

        assert_eq!(summary, OperationSummary::default());
        let _ = std::fs::remove_dir_all(&logroot);
    }

    #[test]
    fn run_master_rejects_zero_workers() {
        let config = sample_config();
        let logroot = tmp_logroot("zeroworkers");
        let master = ResourceManager::new(0, 1, config, logroot.clone(), 1, "root").unwrap();
        let (_tx, rx) = crossbeam_channel::unbounded();
        assert!(master.run_master(&[], &rx).is_err());
        let _ = std::fs::remove_dir_all(&logroot);
    }
}
