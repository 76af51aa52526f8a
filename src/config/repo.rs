//! Repo: a storage pool description plus the DAL it owns.

use serde::Deserialize;

use dal::DalVariant;

use crate::error::{MarfsError, MarfsResult};

/// One `[begin, end)` file-size interval mapped to a repo; `end == -1`
/// means unbounded. Namespaces hold an ordered list of these; the
/// smallest covering range wins.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct RepoRange {
    pub min_size: u64,
    /// `None` means unbounded (the config's `-1`).
    pub max_size: Option<u64>,
}

impl RepoRange {
    pub fn covers(&self, size: u64) -> bool {
        size >= self.min_size && self.max_size.map_or(true, |max| size < max)
    }

    /// Width of the interval, used to pick the smallest covering range
    /// when more than one repo range matches a size.
    pub fn width(&self) -> u64 {
        self.max_size.map_or(u64::MAX, |max| max - self.min_size)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RepoConfig {
    pub name: String,
    pub dal: DalVariant,
    pub host_template: String,
    pub host_count: u32,
    pub host_offset: u32,
    pub n: u32,
    pub e: u32,
    pub chunk_size: u64,
    pub max_pack_file_count: u32,
    pub max_pack_file_size: u64,
    pub compression: u8,
    pub correction: u8,
    pub encryption: u8,
}

/// Recovery-info trailer size for a UNI (single-object) file: the
/// fixed header plus three empty-string terminators plus the trailing
/// length field. Config load rejects any repo whose `chunk_size` does
/// not exceed this, since a chunk must hold at least one recovery
/// trailer's worth of bytes beyond real data.
pub const MARFS_REC_UNI_SIZE: u64 = crate::recovery_info::RecoveryInfoHeader::WIRE_LEN as u64 + 3 + 8;

impl RepoConfig {
    pub fn validate(&self) -> MarfsResult<()> {
        if self.chunk_size <= MARFS_REC_UNI_SIZE {
            return Err(MarfsError::ConfigInvalid(format!(
                "repo '{}': chunk_size {} must exceed recovery_info_size {}",
                self.name, self.chunk_size, MARFS_REC_UNI_SIZE
            )));
        }
        if self.host_count == 0 {
            return Err(MarfsError::ConfigInvalid(format!("repo '{}': host_count must be >= 1", self.name)));
        }
        if self.host_count > 1 && !self.host_template.contains("%d") {
            return Err(MarfsError::ConfigInvalid(format!(
                "repo '{}': host_template must contain a '%d' substitution point when host_count > 1",
                self.name
            )));
        }
        if self.n == 0 {
            return Err(MarfsError::ConfigInvalid(format!("repo '{}': n must be >= 1", self.name)));
        }
        Ok(())
    }

    /// Resolve the host template against a randomly-chosen host index
    /// in `[host_offset, host_offset + host_count)`. The original
    /// carries disabled hash-pinned/paired alternatives; only the
    /// random-per-request policy is implemented per the open question
    /// in the design notes.
    pub fn pick_host(&self) -> String {
        use rand::Rng;
        if self.host_count <= 1 {
            return self.host_template.replace("%d", &self.host_offset.to_string());
        }
        let idx = self.host_offset + rand::thread_rng().gen_range(0..self.host_count);
        self.host_template.replace("%d", &idx.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RepoConfig {
        RepoConfig {
            name: "repo1".into(),
            dal: DalVariant::Posix,
            host_template: "host%d".into(),
            host_count: 1,
            host_offset: 0,
            n: 10,
            e: 2,
            chunk_size: 1 << 30,
            max_pack_file_count: 1024,
            max_pack_file_size: 1 << 20,
            compression: 0,
            correction: 0,
            encryption: 0,
        }
    }

    #[test]
    fn rejects_chunk_size_at_recovery_floor() {
        let mut repo = base();
        repo.chunk_size = MARFS_REC_UNI_SIZE;
        let err = repo.validate().unwrap_err();
        assert!(matches!(err, MarfsError::ConfigInvalid(msg) if msg.contains("repo1")));
    }

    #[test]
    fn rejects_missing_host_substitution() {
        let mut repo = base();
        repo.host_count = 4;
        repo.host_template = "fixedhost".into();
        assert!(repo.validate().is_err());
    }

    #[test]
    fn repo_range_covers_and_width() {
        let bounded = RepoRange { min_size: 0, max_size: Some(1024) };
        assert!(bounded.covers(0));
        assert!(bounded.covers(1023));
        assert!(!bounded.covers(1024));
        assert_eq!(bounded.width(), 1024);

        let unbounded = RepoRange { min_size: 1024, max_size: None };
        assert!(unbounded.covers(u64::MAX));
        assert_eq!(unbounded.width(), u64::MAX);
    }
}
