//! RESOURCELOG: the per-rank write-ahead log. Holds an in-memory
//! `inprogress` table of op-chains keyed by streamid, durably appends
//! each op line before it is considered planned, and replays a prior
//! log into a fresh one on resumption.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Condvar, Mutex};

use crate::error::{MarfsError, MarfsResult};
use crate::opinfo::{OpChain, OpInfo, OpType};

/// Each `printlogline` call must be a single `write()` of a
/// fully-formed buffer; exceeding this is a fatal implementer error,
/// not a runtime one, so it is asserted rather than returned.
pub const MAX_BUFFER: usize = 8192;

pub const RECORD_HEADER: &str = "RESOURCE-RECORD-LOGFILE\n";
pub const MODIFY_HEADER: &str = "RESOURCE-MODIFY-LOGFILE\n";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogMode {
    Record,
    Modify,
    Read,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OperationSummary {
    pub deletion_object_count: u64,
    pub deletion_object_failures: u64,
    pub deletion_reference_count: u64,
    pub deletion_reference_failures: u64,
    pub rebuild_count: u64,
    pub rebuild_failures: u64,
    pub repack_count: u64,
    pub repack_failures: u64,
}

impl OperationSummary {
    fn record(&mut self, ty: OpType, errval: i32) {
        let failed = errval != 0;
        match ty {
            OpType::DeleteObj => {
                self.deletion_object_count += 1;
                if failed {
                    self.deletion_object_failures += 1;
                }
            }
            OpType::DeleteRef => {
                self.deletion_reference_count += 1;
                if failed {
                    self.deletion_reference_failures += 1;
                }
            }
            OpType::Rebuild => {
                self.rebuild_count += 1;
                if failed {
                    self.rebuild_failures += 1;
                }
            }
            OpType::Repack => {
                self.repack_count += 1;
                if failed {
                    self.repack_failures += 1;
                }
            }
        }
    }

    pub fn has_failures(&self) -> bool {
        self.deletion_object_failures > 0
            || self.deletion_reference_failures > 0
            || self.rebuild_failures > 0
            || self.repack_failures > 0
    }
}

/// Result of feeding one op through `processop`: whether the chain it
/// belongs to is still awaiting more completions, or has just resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    InProgress,
    Success,
    Errors,
}

struct Inner {
    file: Option<File>,
    inprogress: HashMap<String, OpChain>,
    outstanding_cnt: u64,
    summary: OperationSummary,
}

pub struct ResourceLog {
    path: PathBuf,
    mode: LogMode,
    inner: Mutex<Inner>,
    nooutstanding: Condvar,
}

impl ResourceLog {
    /// Writes (Record/Modify) or verifies (Read) the header prefix and
    /// builds an empty in-progress table.
    pub fn init(path: impl Into<PathBuf>, mode: LogMode) -> MarfsResult<Self> {
        let path = path.into();
        let file = match mode {
            LogMode::Record | LogMode::Modify => {
                let mut f = OpenOptions::new().create(true).append(true).read(true).open(&path)?;
                let meta = f.metadata()?;
                if meta.len() == 0 {
                    let header = if mode == LogMode::Record { RECORD_HEADER } else { MODIFY_HEADER };
                    f.write_all(header.as_bytes())?;
                    f.flush()?;
                    f.sync_all()?;
                }
                Some(f)
            }
            LogMode::Read => {
                let f = File::open(&path)?;
                let mut reader = BufReader::new(&f);
                let mut header = String::new();
                reader.read_line(&mut header)?;
                if header != RECORD_HEADER && header != MODIFY_HEADER {
                    return Err(MarfsError::ProtocolViolation(format!("bad resourcelog header in {}", path.display())));
                }
                None
            }
        };
        Ok(Self {
            path,
            mode,
            inner: Mutex::new(Inner { file, inprogress: HashMap::new(), outstanding_cnt: 0, summary: OperationSummary::default() }),
        })
    }

    fn append_line(file: &mut File, line: &str) -> MarfsResult<()> {
        let mut buf = line.to_string();
        if !buf.ends_with('\n') {
            buf.push('\n');
        }
        assert!(buf.len() <= MAX_BUFFER, "resourcelog line exceeds MAX_BUFFER ({MAX_BUFFER})");
        file.write_all(buf.as_bytes())?;
        Ok(())
    }

    /// Feed one op through the log. For a MODIFY log this both
    /// appends the durable line and updates in-progress chain state;
    /// starts extend the chain, completions walk it and accumulate
    /// summary counters.
    pub fn processop(&self, op: OpInfo) -> MarfsResult<Progress> {
        if self.mode != LogMode::Modify {
            return Err(MarfsError::ProtocolViolation("processop requires a MODIFY log".into()));
        }
        let mut inner = self.inner.lock();
        let line = op.to_line();
        if let Some(file) = inner.file.as_mut() {
            Self::append_line(file, &line)?;
        }

        let key = op.ftag.clone();
        if op.is_start {
            inner.inprogress.entry(key).or_default().ops.push(op);
            inner.outstanding_cnt += 1;
            return Ok(Progress::InProgress);
        }

        let ty = op.op_type();
        let errval = op.errval;
        let chain = inner
            .inprogress
            .get_mut(&key)
            .ok_or_else(|| MarfsError::ProtocolViolation(format!("completion with no matching start for ftag '{key}'")))?;

        let slot = chain
            .ops
            .iter_mut()
            .find(|o| o.is_start && o.op_type() == ty && o.fileno == op.fileno && o.objno == op.objno)
            .ok_or_else(|| MarfsError::ProtocolViolation(format!("completion matches no outstanding op for ftag '{key}'")))?;

        if op.count > slot.count {
            return Err(MarfsError::ProtocolViolation(format!(
                "over-decrement: completion count {} exceeds outstanding count {} for ftag '{key}'",
                op.count, slot.count
            )));
        }
        slot.count -= op.count;
        let op_resolved = slot.count == 0;

        inner.summary.record(ty, errval);

        if op_resolved {
            chain.ops.retain(|o| !(o.is_start && o.op_type() == ty && o.fileno == op.fileno && o.objno == op.objno && o.count == 0));
        }

        let chain_inactive = !chain.is_active();
        if chain_inactive {
            inner.inprogress.remove(&key);
        }
        inner.outstanding_cnt -= 1;
        if inner.outstanding_cnt == 0 {
            self.nooutstanding.notify_all();
        }

        if !op_resolved {
            return Ok(Progress::InProgress);
        }
        Ok(if errval == 0 { Progress::Success } else { Progress::Errors })
    }

    /// Read every op line from `src`, optionally filtering, and
    /// re-process each one (as a MODIFY log) or re-emit it (as a
    /// RECORD log), then delete `src` on success.
    pub fn replay(dst: &ResourceLog, src: &Path, filter: Option<&dyn Fn(&OpInfo) -> bool>) -> MarfsResult<OperationSummary> {
        let file = File::open(src)?;
        let reader = BufReader::new(file);
        for line in reader.lines() {
            let line = line?;
            if line == RECORD_HEADER.trim_end() || line == MODIFY_HEADER.trim_end() || line.is_empty() {
                continue;
            }
            let op = OpInfo::parse_line(&line)?;
            if let Some(f) = filter {
                if !f(&op) {
                    continue;
                }
            }
            if dst.mode == LogMode::Modify {
                dst.processop(op)?;
            } else {
                let mut inner = dst.inner.lock();
                if let Some(file) = inner.file.as_mut() {
                    Self::append_line(file, &op.to_line())?;
                }
            }
        }
        std::fs::remove_file(src)?;
        Ok(dst.inner.lock().summary)
    }

    /// Fails if `outstandingcnt != 0`; otherwise returns the summary
    /// and conditionally unlinks the logfile and up to two parent dirs.
    pub fn term(&self, delete_if_clean: bool) -> MarfsResult<OperationSummary> {
        let inner = self.inner.lock();
        if inner.outstanding_cnt != 0 {
            return Err(MarfsError::LogBusy(inner.outstanding_cnt));
        }
        let summary = inner.summary;
        drop(inner);

        if delete_if_clean && !summary.has_failures() {
            let _ = std::fs::remove_file(&self.path);
            if let Some(parent) = self.path.parent() {
                let _ = std::fs::remove_dir(parent);
                if let Some(grandparent) = parent.parent() {
                    let _ = std::fs::remove_dir(grandparent);
                }
            }
        }
        Ok(summary)
    }

    pub fn outstanding_count(&self) -> u64 {
        self.inner.lock().outstanding_cnt
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `<logroot>/<iteration>/<ns-escaped>/resourcelog-<rank>`, escaping
/// `/` in the namespace id to `#`.
pub fn logfile_path(logroot: &Path, iteration: u64, ns: &str, rank: u32) -> PathBuf {
    let escaped = ns.replace('/', "#");
    logroot.join(iteration.to_string()).join(escaped).join(format!("resourcelog-{rank}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opinfo::ExtendedInfo;

    fn tmp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("marfs_resourcelog_test_{}_{}", std::process::id(), name))
    }

    fn start(ftag: &str, count: u64) -> OpInfo {
        OpInfo { is_start: true, count, errval: 0, ftag: ftag.into(), fileno: 0, objno: 0, extinfo: ExtendedInfo::DeleteObj { offset: 3 }, continues: false }
    }

    fn completion(ftag: &str, count: u64, errval: i32) -> OpInfo {
        OpInfo { is_start: false, count, errval, ftag: ftag.into(), fileno: 0, objno: 0, extinfo: ExtendedInfo::DeleteObj { offset: 3 }, continues: false }
    }

    /// A syntactically valid FTAG string (19 `|`-delimited fields), for
    /// tests that round-trip lines through `OpInfo::parse_line` (via
    /// `ResourceLog::replay`), which now parses the embedded FTAG for
    /// real fileno/objno rather than a bare opaque identifier.
    fn valid_ftag(tag: &str) -> String {
        format!("1.0|{tag}|{tag}|4|1024|1|1|1|0|0|0|0|4|2|0|64|100|100|0")
    }

    #[test]
    fn log_processing_scenario_matches_expected_summary() {
        let path = tmp_path("scenario4");
        let _ = std::fs::remove_file(&path);
        let log = ResourceLog::init(&path, LogMode::Modify).unwrap();

        assert_eq!(log.processop(start("f1", 4)).unwrap(), Progress::InProgress);
        assert_eq!(log.processop(completion("f1", 2, 0)).unwrap(), Progress::InProgress);
        assert_eq!(log.processop(completion("f1", 2, 0)).unwrap(), Progress::Success);

        let summary = log.term(false).unwrap();
        assert_eq!(summary.deletion_object_count, 2);
        assert_eq!(summary.deletion_object_failures, 0);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn term_fails_with_outstanding_operations() {
        let path = tmp_path("busy");
        let _ = std::fs::remove_file(&path);
        let log = ResourceLog::init(&path, LogMode::Modify).unwrap();
        log.processop(start("f1", 1)).unwrap();
        let err = log.term(false).unwrap_err();
        assert!(matches!(err, MarfsError::LogBusy(1)));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn completion_without_start_is_protocol_violation() {
        let path = tmp_path("noStart");
        let _ = std::fs::remove_file(&path);
        let log = ResourceLog::init(&path, LogMode::Modify).unwrap();
        let err = log.processop(completion("ghost", 1, 0)).unwrap_err();
        assert!(matches!(err, MarfsError::ProtocolViolation(_)));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn over_decrement_is_protocol_violation() {
        let path = tmp_path("overdec");
        let _ = std::fs::remove_file(&path);
        let log = ResourceLog::init(&path, LogMode::Modify).unwrap();
        log.processop(start("f1", 1)).unwrap();
        let err = log.processop(completion("f1", 2, 0)).unwrap_err();
        assert!(matches!(err, MarfsError::ProtocolViolation(_)));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn replay_twice_into_fresh_log_produces_identical_totals() {
        let src_path = tmp_path("replay_src");
        let _ = std::fs::remove_file(&src_path);
        let record = ResourceLog::init(&src_path, LogMode::Record).unwrap();
        drop(record);
        // seed a raw record log with one start/completion pair worth of lines
        let ftag = valid_ftag("f1");
        let mut f = OpenOptions::new().append(true).open(&src_path).unwrap();
        writeln!(f, "{}", start(&ftag, 2).to_line()).unwrap();
        drop(f);

        let dst1_path = tmp_path("replay_dst1");
        let _ = std::fs::remove_file(&dst1_path);
        let src_copy1 = tmp_path("replay_src_copy1");
        std::fs::copy(&src_path, &src_copy1).unwrap();
        let dst1 = ResourceLog::init(&dst1_path, LogMode::Modify).unwrap();
        ResourceLog::replay(&dst1, &src_copy1, None).unwrap();
        dst1.processop(completion(&ftag, 2, 0)).unwrap();
        let summary1 = dst1.term(false).unwrap();

        let dst2_path = tmp_path("replay_dst2");
        let _ = std::fs::remove_file(&dst2_path);
        let src_copy2 = tmp_path("replay_src_copy2");
        std::fs::copy(&src_path, &src_copy2).unwrap();
        let dst2 = ResourceLog::init(&dst2_path, LogMode::Modify).unwrap();
        ResourceLog::replay(&dst2, &src_copy2, None).unwrap();
        dst2.processop(completion(&ftag, 2, 0)).unwrap();
        let summary2 = dst2.term(false).unwrap();

        assert_eq!(summary1, summary2);

        let _ = std::fs::remove_file(&src_path);
        let _ = std::fs::remove_file(&dst1_path);
        let _ = std::fs::remove_file(&dst2_path);
    }
}
