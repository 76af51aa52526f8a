//! Namespace: a rooted metadata subtree with permissions, quotas, and
//! an MDAL pair. Namespaces and their ghost targets are arena-indexed
//! rather than linked by pointer, per the config-model redesign.

use bitflags::bitflags;
use serde::Deserialize;

use crate::config::repo::RepoRange;

bitflags! {
    /// R/W/T/U × {data, meta}: read, write, truncate, unlink, each
    /// split by whether the op touches file data or just metadata.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
    #[serde(transparent)]
    pub struct Perms: u8 {
        const READ_DATA   = 0b0000_0001;
        const WRITE_DATA  = 0b0000_0010;
        const TRUNC_DATA  = 0b0000_0100;
        const UNLINK_DATA = 0b0000_1000;
        const READ_META   = 0b0001_0000;
        const WRITE_META  = 0b0010_0000;
        const TRUNC_META  = 0b0100_0000;
        const UNLINK_META = 0b1000_0000;
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct Quotas {
    pub data_limit_bytes: Option<u64>,
    pub file_count_limit: Option<u64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NamespaceConfig {
    pub id: String,
    pub alias: String,
    pub mnt_path: String,
    pub md_path: String,
    pub bperms: Perms,
    pub iperms: Perms,
    #[serde(default)]
    pub quotas: Quotas,
    pub iwrite_repo: String,
    pub repo_range: Vec<(RepoRange, String)>,
    pub trash_md_path: String,
    pub fsinfo_path: String,
    pub dir_mdal: String,
    pub file_mdal: String,
    /// Name of another namespace this one transparently reroutes to.
    /// Resolved to an arena index at config-load time.
    pub ghost_target: Option<String>,
    pub refbreadth: u32,
    pub refdepth: u32,
    pub refdigits: u32,
}

impl NamespaceConfig {
    /// Smallest repo range covering `size`, per "smallest covering
    /// range wins".
    pub fn repo_for_size(&self, size: u64) -> Option<&str> {
        self.repo_range
            .iter()
            .filter(|(range, _)| range.covers(size))
            .min_by_key(|(range, _)| range.width())
            .map(|(_, repo)| repo.as_str())
    }

    pub fn is_ghost(&self) -> bool {
        self.ghost_target.is_some()
    }
}

/// Runtime flag distinguishing interactive (FUSE-mount style) access
/// from batch (resource-manager) access; both `bperms` and the
/// relevant overlay must admit an op for it to proceed.
pub fn required_perms(ns: &NamespaceConfig, interactive: bool) -> Perms {
    if interactive {
        ns.bperms & ns.iperms
    } else {
        ns.bperms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NamespaceConfig {
        NamespaceConfig {
            id: "ns1".into(),
            alias: "ns1".into(),
            mnt_path: "/ns1".into(),
            md_path: "/md/ns1".into(),
            bperms: Perms::all(),
            iperms: Perms::READ_DATA | Perms::READ_META,
            quotas: Quotas::default(),
            iwrite_repo: "repo1".into(),
            repo_range: vec![
                (RepoRange { min_size: 0, max_size: Some(1 << 20) }, "small-repo".into()),
                (RepoRange { min_size: 0, max_size: None }, "default-repo".into()),
            ],
            trash_md_path: "/md/ns1/.trash".into(),
            fsinfo_path: "/md/ns1/.fsinfo".into(),
            dir_mdal: "posix".into(),
            file_mdal: "posix".into(),
            ghost_target: None,
            refbreadth: 16,
            refdepth: 2,
            refdigits: 2,
        }
    }

    #[test]
    fn repo_for_size_picks_smallest_covering_range() {
        let ns = sample();
        assert_eq!(ns.repo_for_size(1024), Some("small-repo"));
        assert_eq!(ns.repo_for_size(2 << 20), Some("default-repo"));
    }

    #[test]
    fn interactive_perms_intersect_bperms_and_iperms() {
        let ns = sample();
        let perms = required_perms(&ns, true);
        assert!(perms.contains(Perms::READ_DATA));
        assert!(!perms.contains(Perms::WRITE_DATA));
    }

    #[test]
    fn batch_perms_ignore_iperms() {
        let ns = sample();
        let perms = required_perms(&ns, false);
        assert_eq!(perms, Perms::all());
    }
}
