//! FTAG: the per-file stream descriptor persisted as an xattr on every
//! reference file, and RTAG: the rebuild-tag xattr a scanner leaves
//! behind to document a stripe's per-block failure pattern.

use bitflags::bitflags;

use crate::error::{MarfsError, MarfsResult};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct FtagState: u8 {
        const INITIALIZED = 0b0000_0001;
        const SIZED       = 0b0000_0010;
        const FINALIZED   = 0b0000_0100;
        const COMPLETE    = 0b0000_1000;
        const READABLE    = 0b0001_0000;
        const WRITABLE    = 0b0010_0000;
    }
}

/// One file's position within its stream, plus the erasure parameters
/// and sizing the reader needs to locate and decode its content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ftag {
    pub version_major: u16,
    pub version_minor: u16,
    pub ctag: String,
    pub streamid: String,
    pub objfiles: u64,
    pub objsize: u64,
    pub refbreadth: u32,
    pub refdepth: u32,
    pub refdigits: u32,
    pub fileno: u64,
    pub objno: u64,
    pub offset: u64,
    pub endofstream: bool,
    pub erasure_n: u32,
    pub erasure_e: u32,
    pub erasure_o: u32,
    pub partsz: u64,
    pub bytes: u64,
    pub availbytes: u64,
    pub recoverybytes: u64,
    pub state: FtagState,
}

const FTAG_FIELD_COUNT: usize = 19;

impl Ftag {
    pub fn to_string(&self) -> String {
        format!(
            "{}.{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.version_major,
            self.version_minor,
            self.ctag,
            self.streamid,
            self.objfiles,
            self.objsize,
            self.refbreadth,
            self.refdepth,
            self.refdigits,
            self.fileno,
            self.objno,
            self.offset,
            if self.endofstream { 1 } else { 0 },
            self.erasure_n,
            self.erasure_e,
            self.erasure_o,
            self.partsz,
            self.bytes,
            self.availbytes,
            self.recoverybytes,
        ) + &format!("|{}", self.state.bits())
    }

    pub fn parse(s: &str) -> MarfsResult<Self> {
        let fields: Vec<&str> = s.split('|').collect();
        if fields.len() != FTAG_FIELD_COUNT {
            return Err(MarfsError::Corruption(format!(
                "FTAG expected {FTAG_FIELD_COUNT} fields, got {}: {s}",
                fields.len()
            )));
        }
        let (maj_str, min_str) = fields[0]
            .split_once('.')
            .ok_or_else(|| MarfsError::Corruption(format!("FTAG version field malformed: {}", fields[0])))?;
        let parse_u32 = |i: usize, name: &str| -> MarfsResult<u32> {
            fields[i].parse().map_err(|_| MarfsError::Corruption(format!("FTAG field {name} not a u32: {}", fields[i])))
        };
        let parse_u64 = |i: usize, name: &str| -> MarfsResult<u64> {
            fields[i].parse().map_err(|_| MarfsError::Corruption(format!("FTAG field {name} not a u64: {}", fields[i])))
        };
        Ok(Self {
            version_major: maj_str.parse().map_err(|_| MarfsError::Corruption("bad FTAG major".into()))?,
            version_minor: min_str.parse().map_err(|_| MarfsError::Corruption("bad FTAG minor".into()))?,
            ctag: fields[1].to_string(),
            streamid: fields[2].to_string(),
            objfiles: parse_u64(3, "objfiles")?,
            objsize: parse_u64(4, "objsize")?,
            refbreadth: parse_u32(5, "refbreadth")?,
            refdepth: parse_u32(6, "refdepth")?,
            refdigits: parse_u32(7, "refdigits")?,
            fileno: parse_u64(8, "fileno")?,
            objno: parse_u64(9, "objno")?,
            offset: parse_u64(10, "offset")?,
            endofstream: fields[11] == "1",
            erasure_n: parse_u32(12, "erasure_n")?,
            erasure_e: parse_u32(13, "erasure_e")?,
            erasure_o: parse_u32(14, "erasure_o")?,
            partsz: parse_u64(15, "partsz")?,
            bytes: parse_u64(16, "bytes")?,
            availbytes: parse_u64(17, "availbytes")?,
            recoverybytes: 0,
            state: FtagState::from_bits_truncate(
                fields[18].parse().map_err(|_| MarfsError::Corruption("bad FTAG state bits".into()))?,
            ),
        })
    }

    /// Invariant: within one streamid, (fileno, objno, offset)
    /// monotonically advance.
    pub fn advances_from(&self, prev: &Ftag) -> bool {
        self.streamid == prev.streamid
            && (self.fileno, self.objno, self.offset) > (prev.fileno, prev.objno, prev.offset)
    }
}

/// Rebuild tag: documents a stripe's per-block failure pattern, left
/// behind by a scanner for a later rebuild worker to consume.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RebuildTag {
    pub n: u32,
    pub e: u32,
    pub failed_blocks: Vec<u32>,
}

impl RebuildTag {
    pub fn to_string(&self) -> String {
        let blocks = self
            .failed_blocks
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(",");
        format!("{}|{}|{}", self.n, self.e, blocks)
    }

    pub fn parse(s: &str) -> MarfsResult<Self> {
        let fields: Vec<&str> = s.split('|').collect();
        if fields.len() != 3 {
            return Err(MarfsError::Corruption(format!("RTAG expected 3 fields: {s}")));
        }
        let n: u32 = fields[0].parse().map_err(|_| MarfsError::Corruption("bad RTAG n".into()))?;
        let e: u32 = fields[1].parse().map_err(|_| MarfsError::Corruption("bad RTAG e".into()))?;
        let failed_blocks = if fields[2].is_empty() {
            Vec::new()
        } else {
            fields[2]
                .split(',')
                .map(|b| b.parse().map_err(|_| MarfsError::Corruption(format!("bad RTAG block index: {b}"))))
                .collect::<MarfsResult<Vec<u32>>>()?
        };
        Ok(Self { n, e, failed_blocks })
    }
}
