//! Ref-dir range distribution: split one namespace's `breadth^depth`
//! reference-dir leaves evenly across the working ranks, giving the
//! remainder to the lowest-numbered ranks one leaf at a time so no
//! rank receives more than one extra leaf over another.

use crate::config::{NamespaceConfig, RefDirTree};
use crate::error::MarfsResult;
use crate::resourceinput::WorkRange;

/// `(refcount × refdist) / workingranks`, remainder distributed to
/// the first `refcount % workingranks` ranks.
pub fn distribute_ranges(ns: &NamespaceConfig, working_ranks: u32) -> MarfsResult<Vec<Vec<WorkRange>>> {
    let tree = RefDirTree::build(ns.refbreadth, ns.refdepth, ns.refdigits)?;
    let leaves = tree.leaves();
    let refcount = leaves.len() as u64;
    let working_ranks = working_ranks as u64;

    let base = refcount / working_ranks;
    let remainder = refcount % working_ranks;

    let mut out = vec![Vec::new(); working_ranks as usize];
    let mut cursor = 0usize;
    for rank in 0..working_ranks as usize {
        let share = base + if (rank as u64) < remainder { 1 } else { 0 };
        for leaf in &leaves[cursor..cursor + share as usize] {
            out[rank].push(WorkRange { ns_id: ns.id.clone(), leaf_path: leaf.clone() });
        }
        cursor += share as usize;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Perms, Quotas};

    fn sample_ns(refbreadth: u32, refdepth: u32) -> NamespaceConfig {
        NamespaceConfig {
            id: "ns1".into(),
            alias: "ns1".into(),
            mnt_path: "/ns1".into(),
            md_path: "/md/ns1".into(),
            bperms: Perms::all(),
            iperms: Perms::all(),
            quotas: Quotas::default(),
            iwrite_repo: "repo1".into(),
            repo_range: Vec::new(),
            trash_md_path: "/md/ns1/.trash".into(),
            fsinfo_path: "/md/ns1/.fsinfo".into(),
            dir_mdal: "posix".into(),
            file_mdal: "posix".into(),
            ghost_target: None,
            refbreadth,
            refdepth,
            refdigits: 2,
        }
    }

    #[test]
    fn splits_leaves_evenly_when_divisible() {
        let ns = sample_ns(4, 1);
        let shares = distribute_ranges(&ns, 2).unwrap();
        assert_eq!(shares[0].len(), 2);
        assert_eq!(shares[1].len(), 2);
    }

    #[test]
    fn remainder_goes_to_lowest_ranks_first() {
        let ns = sample_ns(5, 1);
        let shares = distribute_ranges(&ns, 2).unwrap();
        assert_eq!(shares[0].len(), 3);
        assert_eq!(shares[1].len(), 2);
    }

    #[test]
    fn every_leaf_assigned_exactly_once() {
        let ns = sample_ns(4, 2);
        let shares = distribute_ranges(&ns, 3).unwrap();
        let mut all: Vec<String> = shares.into_iter().flatten().map(|r| r.leaf_path).collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 16);
    }
}
