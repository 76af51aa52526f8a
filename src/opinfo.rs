//! Operation records (opinfo): the four op kinds the resource manager
//! plans and the WAL durably logs, plus the extended per-type info
//! each carries and the chain structure linking compound ops together.

use crate::error::{MarfsError, MarfsResult};
use crate::ftag::Ftag;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpType {
    DeleteObj,
    DeleteRef,
    Rebuild,
    Repack,
}

impl OpType {
    fn tag(self) -> &'static str {
        match self {
            OpType::DeleteObj => "DEL-OBJ",
            OpType::DeleteRef => "DEL-REF",
            OpType::Rebuild => "REBUILD",
            OpType::Repack => "REPACK",
        }
    }

    fn from_tag(s: &str) -> MarfsResult<Self> {
        match s {
            "DEL-OBJ" => Ok(OpType::DeleteObj),
            "DEL-REF" => Ok(OpType::DeleteRef),
            "REBUILD" => Ok(OpType::Rebuild),
            "REPACK" => Ok(OpType::Repack),
            other => Err(MarfsError::ProtocolViolation(format!("unknown op type tag '{other}'"))),
        }
    }
}

/// Type-specific payload. `DeleteObj.offset` lets the master split
/// deletion of a multi-object stream across workers; `DeleteRef`'s
/// `delzero`/`eos` flags control object-existence and end-of-stream
/// transitions; `Rebuild`'s marker path is placed by a scanner, its
/// RTAG is optional because a rebuild may be requested without one
/// having been recorded yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtendedInfo {
    DeleteObj { offset: u64 },
    DeleteRef { prev_active_index: i64, delzero: bool, eos: bool },
    Rebuild { marker_path: String, rtag: Option<String> },
    Repack { total_bytes: u64 },
}

impl ExtendedInfo {
    fn op_type(&self) -> OpType {
        match self {
            ExtendedInfo::DeleteObj { .. } => OpType::DeleteObj,
            ExtendedInfo::DeleteRef { .. } => OpType::DeleteRef,
            ExtendedInfo::Rebuild { .. } => OpType::Rebuild,
            ExtendedInfo::Repack { .. } => OpType::Repack,
        }
    }

    fn to_field(&self) -> String {
        match self {
            ExtendedInfo::DeleteObj { offset } => offset.to_string(),
            ExtendedInfo::DeleteRef { prev_active_index, delzero, eos } => {
                format!("{prev_active_index} {} {}", if *delzero { "DZ" } else { "--" }, if *eos { "EOS" } else { "CNT" })
            }
            ExtendedInfo::Rebuild { marker_path, rtag } => match rtag {
                Some(r) => format!("{marker_path} {r}"),
                None => marker_path.clone(),
            },
            ExtendedInfo::Repack { total_bytes } => total_bytes.to_string(),
        }
    }

    fn from_field(ty: OpType, field: &str) -> MarfsResult<Self> {
        match ty {
            OpType::DeleteObj => Ok(ExtendedInfo::DeleteObj {
                offset: field.trim().parse().map_err(|_| MarfsError::ProtocolViolation(format!("bad DEL-OBJ offset '{field}'")))?,
            }),
            OpType::DeleteRef => {
                let parts: Vec<&str> = field.split_whitespace().collect();
                if parts.len() != 3 {
                    return Err(MarfsError::ProtocolViolation(format!("bad DEL-REF extinfo '{field}'")));
                }
                Ok(ExtendedInfo::DeleteRef {
                    prev_active_index: parts[0].parse().map_err(|_| MarfsError::ProtocolViolation(format!("bad prev_active_index '{}'", parts[0])))?,
                    delzero: parts[1] == "DZ",
                    eos: parts[2] == "EOS",
                })
            }
            OpType::Rebuild => {
                let mut parts = field.splitn(2, ' ');
                let marker_path = parts.next().unwrap_or_default().to_string();
                let rtag = parts.next().map(|s| s.to_string());
                Ok(ExtendedInfo::Rebuild { marker_path, rtag })
            }
            OpType::Repack => Ok(ExtendedInfo::Repack {
                total_bytes: field.trim().parse().map_err(|_| MarfsError::ProtocolViolation(format!("bad REPACK total_bytes '{field}'")))?,
            }),
        }
    }
}

/// One operation record: a planned start, optionally matched later by
/// a completion that carries the same FTAG/type/fileno/objno.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpInfo {
    pub is_start: bool,
    pub count: u64,
    pub errval: i32,
    pub ftag: String,
    pub fileno: u64,
    pub objno: u64,
    pub extinfo: ExtendedInfo,
    /// Trailing `-` continuation marker: this op shares its log line
    /// with the next op in the same chain.
    pub continues: bool,
}

impl OpInfo {
    pub fn op_type(&self) -> OpType {
        self.extinfo.op_type()
    }

    /// `TYPE { extinfo } S|E count errval FTAG-string [-]`
    pub fn to_line(&self) -> String {
        format!(
            "{} {{ {} }} {} {} {} {}{}",
            self.op_type().tag(),
            self.extinfo.to_field(),
            if self.is_start { 'S' } else { 'E' },
            self.count,
            self.errval,
            self.ftag,
            if self.continues { " -" } else { "" }
        )
    }

    pub fn parse_line(line: &str) -> MarfsResult<Self> {
        let continues = line.trim_end().ends_with('-');
        let line = if continues { line.trim_end().trim_end_matches('-').trim_end() } else { line.trim_end() };

        let open = line.find('{').ok_or_else(|| MarfsError::ProtocolViolation(format!("malformed opinfo line: {line}")))?;
        let close = line.find('}').ok_or_else(|| MarfsError::ProtocolViolation(format!("malformed opinfo line: {line}")))?;
        let tag = line[..open].trim();
        let ty = OpType::from_tag(tag)?;
        let extfield = line[open + 1..close].trim();
        let rest = line[close + 1..].trim();

        let mut parts = rest.splitn(4, ' ');
        let se = parts.next().ok_or_else(|| MarfsError::ProtocolViolation("missing S|E field".into()))?;
        let count: u64 = parts
            .next()
            .ok_or_else(|| MarfsError::ProtocolViolation("missing count field".into()))?
            .parse()
            .map_err(|_| MarfsError::ProtocolViolation("bad count field".into()))?;
        let errval: i32 = parts
            .next()
            .ok_or_else(|| MarfsError::ProtocolViolation("missing errval field".into()))?
            .parse()
            .map_err(|_| MarfsError::ProtocolViolation("bad errval field".into()))?;
        let ftag = parts.next().ok_or_else(|| MarfsError::ProtocolViolation("missing FTAG field".into()))?.to_string();
        let parsed_ftag = Ftag::parse(&ftag)?;

        Ok(Self {
            is_start: se == "S",
            count,
            errval,
            ftag,
            fileno: parsed_ftag.fileno,
            objno: parsed_ftag.objno,
            extinfo: ExtendedInfo::from_field(ty, extfield)?,
            continues,
        })
    }
}

/// An ordered sequence of ops representing one compound operation that
/// must complete atomically from the logger's perspective: either
/// every op in the chain is a start, or every op is a completion.
#[derive(Clone, Debug, Default)]
pub struct OpChain {
    pub ops: Vec<OpInfo>,
}

impl OpChain {
    pub fn validate_atomicity(&self) -> MarfsResult<()> {
        if self.ops.is_empty() {
            return Ok(());
        }
        let first_is_start = self.ops[0].is_start;
        if self.ops.iter().any(|op| op.is_start != first_is_start) {
            return Err(MarfsError::ProtocolViolation("mixed start/completion ops in one chain".into()));
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        !self.ops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A syntactically valid FTAG string (19 `|`-delimited fields) with
    /// caller-chosen fileno/objno, for tests that round-trip through
    /// `OpInfo::parse_line` (which parses the FTAG to recover them).
    fn sample_ftag_str(fileno: u64, objno: u64) -> String {
        format!("1.0|ctag|stream1|4|1024|1|1|1|{fileno}|{objno}|0|0|4|2|0|64|100|100|0")
    }

    #[test]
    fn parse_line_extracts_real_fileno_objno_from_ftag() {
        let op = OpInfo {
            is_start: true,
            count: 1,
            errval: 0,
            ftag: sample_ftag_str(5, 2),
            fileno: 0,
            objno: 0,
            extinfo: ExtendedInfo::Repack { total_bytes: 10 },
            continues: false,
        };
        let parsed = OpInfo::parse_line(&op.to_line()).unwrap();
        assert_eq!(parsed.fileno, 5);
        assert_eq!(parsed.objno, 2);
    }

    #[test]
    fn delete_obj_round_trips() {
        let op = OpInfo {
            is_start: true,
            count: 4,
            errval: 0,
            ftag: "1.0|c|s|1|1024|1|1|1|0|0|0|0|4|2|0|64|100|100|0".into(),
            fileno: 0,
            objno: 0,
            extinfo: ExtendedInfo::DeleteObj { offset: 3 },
            continues: false,
        };
        let line = op.to_line();
        let parsed = OpInfo::parse_line(&line).unwrap();
        assert_eq!(parsed.extinfo, op.extinfo);
        assert_eq!(parsed.is_start, op.is_start);
        assert_eq!(parsed.count, op.count);
        assert_eq!(parsed.ftag, op.ftag);
    }

    #[test]
    fn delete_ref_round_trips() {
        let op = OpInfo {
            is_start: true,
            count: 1,
            errval: 0,
            ftag: sample_ftag_str(0, 0),
            fileno: 0,
            objno: 0,
            extinfo: ExtendedInfo::DeleteRef { prev_active_index: 0, delzero: true, eos: false },
            continues: false,
        };
        let parsed = OpInfo::parse_line(&op.to_line()).unwrap();
        assert_eq!(parsed.extinfo, op.extinfo);
    }

    #[test]
    fn mixed_chain_rejected() {
        let start = OpInfo {
            is_start: true,
            count: 1,
            errval: 0,
            ftag: "f".into(),
            fileno: 0,
            objno: 0,
            extinfo: ExtendedInfo::Repack { total_bytes: 10 },
            continues: true,
        };
        let mut completion = start.clone();
        completion.is_start = false;
        let chain = OpChain { ops: vec![start, completion] };
        assert!(chain.validate_atomicity().is_err());
    }

    #[test]
    fn continuation_marker_round_trips() {
        let op = OpInfo {
            is_start: true,
            count: 1,
            errval: 0,
            ftag: sample_ftag_str(0, 0),
            fileno: 0,
            objno: 0,
            extinfo: ExtendedInfo::Repack { total_bytes: 4096 },
            continues: true,
        };
        let line = op.to_line();
        assert!(line.ends_with('-'));
        let parsed = OpInfo::parse_line(&line).unwrap();
        assert!(parsed.continues);
    }
}
