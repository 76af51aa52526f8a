//! Object-ID wire format: `<bucket>/<repo>-v<maj>.<min>-<ns>-<typechar>-
//! <cmp>-<cor>-<enc>-<inode-hex>-<md_ctime>-<obj_ctime>-<unique>-
//! <chunksize>-<chunkno>`.
//!
//! `bucket` is the namespace alias. Timestamps are formatted with
//! `MARFS_DATE_FORMAT` plus a single trailing DST-flag character per
//! `MARFS_DST_FORMAT`.

use chrono::{DateTime, TimeZone, Utc};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{MarfsError, MarfsResult};

/// Major/minor of the on-disk Object-ID format this build writes. A
/// parsed ID must carry an equal major and a minor no greater than
/// this value.
pub const MARFS_CONFIG_MAJOR: u16 = 1;
pub const MARFS_CONFIG_MINOR: u16 = 0;

pub const MARFS_DATE_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ObjectType {
    None = 0,
    Uni = 1,
    Multi = 2,
    Packed = 3,
    Semi = 4,
    Fuse = 5,
}

impl ObjectType {
    fn to_char(self) -> char {
        match self {
            ObjectType::None => '_',
            ObjectType::Uni => 'U',
            ObjectType::Multi => 'M',
            ObjectType::Packed => 'P',
            ObjectType::Semi => 'S',
            ObjectType::Fuse => 'F',
        }
    }

    fn from_char(c: char) -> MarfsResult<Self> {
        match c {
            '_' | 'N' => Ok(ObjectType::None),
            'U' => Ok(ObjectType::Uni),
            'M' => Ok(ObjectType::Multi),
            'P' => Ok(ObjectType::Packed),
            'S' => Ok(ObjectType::Semi),
            'F' => Ok(ObjectType::Fuse),
            other => Err(MarfsError::Corruption(format!("unknown object-id typechar '{other}'"))),
        }
    }
}

/// A timestamp as embedded in an Object-ID: `MARFS_DATE_FORMAT` plus a
/// single trailing DST-flag digit (`MARFS_DST_FORMAT`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarfsTimestamp {
    pub time: DateTime<Utc>,
    pub dst: bool,
}

impl MarfsTimestamp {
    pub fn to_string(&self) -> String {
        format!("{}{}", self.time.format(MARFS_DATE_FORMAT), if self.dst { '1' } else { '0' })
    }

    pub fn parse(s: &str) -> MarfsResult<Self> {
        if s.len() < 15 {
            return Err(MarfsError::Corruption(format!("object-id timestamp too short: {s}")));
        }
        let (date_part, dst_part) = s.split_at(s.len() - 1);
        let naive = chrono::NaiveDateTime::parse_from_str(date_part, MARFS_DATE_FORMAT)
            .map_err(|e| MarfsError::Corruption(format!("bad object-id timestamp '{s}': {e}")))?;
        let time = Utc.from_utc_datetime(&naive);
        let dst = match dst_part {
            "1" => true,
            "0" => false,
            other => return Err(MarfsError::Corruption(format!("bad DST flag '{other}' in timestamp"))),
        };
        Ok(Self { time, dst })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObjectId {
    pub bucket: String,
    pub repo: String,
    pub version_major: u16,
    pub version_minor: u16,
    pub ns: String,
    pub obj_type: ObjectType,
    pub compression: u8,
    pub correction: u8,
    pub encryption: u8,
    pub inode: u64,
    pub md_ctime: MarfsTimestamp,
    pub obj_ctime: MarfsTimestamp,
    pub unique: u64,
    pub chunk_size: u64,
    pub chunk_no: u64,
}

impl ObjectId {
    pub fn to_string(&self) -> String {
        format!(
            "{}/{}-v{}.{}-{}-{}-{}-{}-{}-{:x}-{}-{}-{}-{}-{}",
            self.bucket,
            self.repo,
            self.version_major,
            self.version_minor,
            self.ns,
            self.obj_type.to_char(),
            self.compression,
            self.correction,
            self.encryption,
            self.inode,
            self.md_ctime.to_string(),
            self.obj_ctime.to_string(),
            self.unique,
            self.chunk_size,
            self.chunk_no
        )
    }

    pub fn parse(s: &str) -> MarfsResult<Self> {
        let (bucket, rest) = s
            .split_once('/')
            .ok_or_else(|| MarfsError::Corruption(format!("object-id missing bucket separator: {s}")))?;
        let fields: Vec<&str> = rest.split('-').collect();
        if fields.len() != 13 {
            return Err(MarfsError::Corruption(format!(
                "object-id expected 13 dash-separated fields, got {}: {s}",
                fields.len()
            )));
        }
        let repo = fields[0].to_string();
        let vfield = fields[1];
        let vfield = vfield
            .strip_prefix('v')
            .ok_or_else(|| MarfsError::Corruption(format!("object-id version field missing 'v' prefix: {vfield}")))?;
        let (maj_str, min_str) = vfield
            .split_once('.')
            .ok_or_else(|| MarfsError::Corruption(format!("object-id version field malformed: {vfield}")))?;
        let version_major: u16 = maj_str
            .parse()
            .map_err(|_| MarfsError::Corruption(format!("bad major version: {maj_str}")))?;
        let version_minor: u16 = min_str
            .parse()
            .map_err(|_| MarfsError::Corruption(format!("bad minor version: {min_str}")))?;
        if version_major != MARFS_CONFIG_MAJOR || version_minor > MARFS_CONFIG_MINOR {
            return Err(MarfsError::Corruption(format!(
                "object-id version v{version_major}.{version_minor} unsupported (expected major {MARFS_CONFIG_MAJOR}, minor <= {MARFS_CONFIG_MINOR})"
            )));
        }
        let ns = fields[2].to_string();
        let obj_type = ObjectType::from_char(
            fields[3]
                .chars()
                .next()
                .ok_or_else(|| MarfsError::Corruption("empty object-id typechar".into()))?,
        )?;
        let compression: u8 = fields[4].parse().map_err(|_| MarfsError::Corruption(format!("bad compression field: {}", fields[4])))?;
        let correction: u8 = fields[5].parse().map_err(|_| MarfsError::Corruption(format!("bad correction field: {}", fields[5])))?;
        let encryption: u8 = fields[6].parse().map_err(|_| MarfsError::Corruption(format!("bad encryption field: {}", fields[6])))?;
        let inode = u64::from_str_radix(fields[7], 16).map_err(|_| MarfsError::Corruption(format!("bad inode hex: {}", fields[7])))?;
        let md_ctime = MarfsTimestamp::parse(fields[8])?;
        let obj_ctime = MarfsTimestamp::parse(fields[9])?;
        let unique: u64 = fields[10].parse().map_err(|_| MarfsError::Corruption(format!("bad unique field: {}", fields[10])))?;
        let chunk_size: u64 = fields[11].parse().map_err(|_| MarfsError::Corruption(format!("bad chunksize field: {}", fields[11])))?;
        let chunk_no: u64 = fields[12].parse().map_err(|_| MarfsError::Corruption(format!("bad chunkno field: {}", fields[12])))?;

        Ok(Self {
            bucket: bucket.to_string(),
            repo,
            version_major,
            version_minor,
            ns,
            obj_type,
            compression,
            correction,
            encryption,
            inode,
            md_ctime,
            obj_ctime,
            unique,
            chunk_size,
            chunk_no,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ObjectId {
        ObjectId {
            bucket: "ns1".into(),
            repo: "repo1".into(),
            version_major: MARFS_CONFIG_MAJOR,
            version_minor: MARFS_CONFIG_MINOR,
            ns: "ns1".into(),
            obj_type: ObjectType::Packed,
            compression: 0,
            correction: 1,
            encryption: 0,
            inode: 0xdead_beef,
            md_ctime: MarfsTimestamp { time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(), dst: false },
            obj_ctime: MarfsTimestamp { time: Utc.timestamp_opt(1_700_000_100, 0).unwrap(), dst: true },
            unique: 42,
            chunk_size: 1048576,
            chunk_no: 3,
        }
    }

    #[test]
    fn round_trip() {
        let id = sample();
        let s = id.to_string();
        let parsed = ObjectId::parse(&s).expect("parse");
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_future_minor_version() {
        let mut s = sample().to_string();
        s = s.replacen("-v1.0-", "-v1.9-", 1);
        assert!(ObjectId::parse(&s).is_err());
    }

    #[test]
    fn rejects_mismatched_major_version() {
        let mut s = sample().to_string();
        s = s.replacen("-v1.0-", "-v2.0-", 1);
        assert!(ObjectId::parse(&s).is_err());
    }

    #[test]
    fn type_chars_round_trip_for_every_variant() {
        for t in [
            ObjectType::None,
            ObjectType::Uni,
            ObjectType::Multi,
            ObjectType::Packed,
            ObjectType::Semi,
            ObjectType::Fuse,
        ] {
            let mut id = sample();
            id.obj_type = t;
            let s = id.to_string();
            let parsed = ObjectId::parse(&s).unwrap();
            assert_eq!(parsed.obj_type, t);
        }
    }
}
