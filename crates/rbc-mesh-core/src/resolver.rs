//! Per-value conflict resolution
//!
//! [`resolve`] is the only rule nodes use to decide whose value survives.
//! It is a pure function of two (version, origin) observations, so every
//! node that sees the same pair of observations reaches the same verdict
//! without talking to anyone.

use crate::types::NodeAddr;

/// Why a remote observation was not applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Remote version is older than ours
    Outdated,
    /// Same version from the same origin (a rebroadcast of what we hold)
    Duplicate,
}

/// Which side wins an equal-version conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConflictWinner {
    Local,
    Remote,
}

/// Verdict for a remote observation of a handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Resolution {
    /// Remote is strictly newer, take it
    Accept,
    /// Keep ours
    Reject(RejectReason),
    /// Two origins produced the same version independently
    Conflict(ConflictWinner),
}

impl Resolution {
    /// Whether the remote payload replaces the local one.
    pub fn remote_wins(&self) -> bool {
        matches!(
            self,
            Resolution::Accept | Resolution::Conflict(ConflictWinner::Remote)
        )
    }

    /// Whether this observation tells the scheduler the neighbourhood disagrees.
    pub fn is_inconsistent(&self) -> bool {
        !matches!(self, Resolution::Reject(RejectReason::Duplicate))
    }
}

/// Decide between a local and a remote observation of the same handle.
///
/// Equal versions from different origins are settled by the numeric order
/// of the origin addresses: the higher address wins on every node.
pub fn resolve(
    local_version: u32,
    local_origin: NodeAddr,
    remote_version: u32,
    remote_origin: NodeAddr,
) -> Resolution {
    use std::cmp::Ordering;

    match remote_version.cmp(&local_version) {
        Ordering::Greater => Resolution::Accept,
        Ordering::Less => Resolution::Reject(RejectReason::Outdated),
        Ordering::Equal => match remote_origin.cmp(&local_origin) {
            Ordering::Equal => Resolution::Reject(RejectReason::Duplicate),
            Ordering::Greater => Resolution::Conflict(ConflictWinner::Remote),
            Ordering::Less => Resolution::Conflict(ConflictWinner::Local),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const A: NodeAddr = NodeAddr([0, 0, 0, 0, 0, 1]);
    const B: NodeAddr = NodeAddr([0, 0, 0, 0, 0, 2]);

    /// The verdict the other node reaches for the same pair of observations.
    fn mirrored(resolution: Resolution) -> Resolution {
        match resolution {
            Resolution::Accept => Resolution::Reject(RejectReason::Outdated),
            Resolution::Reject(RejectReason::Outdated) => Resolution::Accept,
            Resolution::Reject(RejectReason::Duplicate) => {
                Resolution::Reject(RejectReason::Duplicate)
            }
            Resolution::Conflict(ConflictWinner::Local) => {
                Resolution::Conflict(ConflictWinner::Remote)
            }
            Resolution::Conflict(ConflictWinner::Remote) => {
                Resolution::Conflict(ConflictWinner::Local)
            }
        }
    }

    #[test]
    fn test_newer_remote_is_accepted() {
        assert_eq!(resolve(1, A, 2, B), Resolution::Accept);
        assert_eq!(resolve(1, B, 2, A), Resolution::Accept);
        assert_eq!(resolve(0, NodeAddr::default(), 1, A), Resolution::Accept);
    }

    #[test]
    fn test_older_remote_is_rejected() {
        assert_eq!(resolve(3, A, 2, B), Resolution::Reject(RejectReason::Outdated));
    }

    #[test]
    fn test_same_origin_same_version_is_duplicate() {
        let r = resolve(5, A, 5, A);
        assert_eq!(r, Resolution::Reject(RejectReason::Duplicate));
        assert!(!r.is_inconsistent());
        assert!(!r.remote_wins());
    }

    #[test]
    fn test_conflict_goes_to_higher_origin() {
        assert_eq!(resolve(2, A, 2, B), Resolution::Conflict(ConflictWinner::Remote));
        assert_eq!(resolve(2, B, 2, A), Resolution::Conflict(ConflictWinner::Local));
        assert!(resolve(2, A, 2, B).remote_wins());
        assert!(!resolve(2, B, 2, A).remote_wins());
    }

    #[test]
    fn test_everything_but_duplicates_is_inconsistent() {
        assert!(Resolution::Accept.is_inconsistent());
        assert!(Resolution::Reject(RejectReason::Outdated).is_inconsistent());
        assert!(Resolution::Conflict(ConflictWinner::Local).is_inconsistent());
    }

    fn addr() -> impl Strategy<Value = NodeAddr> {
        any::<[u8; 6]>().prop_map(NodeAddr)
    }

    proptest! {
        #[test]
        fn prop_swapping_sides_mirrors_the_verdict(
            lv in 0u32..8,
            lo in addr(),
            rv in 0u32..8,
            ro in addr(),
        ) {
            let forward = resolve(lv, lo, rv, ro);
            let backward = resolve(rv, ro, lv, lo);
            prop_assert_eq!(mirrored(forward), backward);
        }

        #[test]
        fn prop_both_sides_keep_the_same_winner(
            version in any::<u32>(),
            lo in addr(),
            ro in addr(),
        ) {
            prop_assume!(lo != ro);
            let at_local = resolve(version, lo, version, ro);
            let at_remote = resolve(version, ro, version, lo);
            let winner_seen_locally = if at_local.remote_wins() { ro } else { lo };
            let winner_seen_remotely = if at_remote.remote_wins() { lo } else { ro };
            prop_assert_eq!(winner_seen_locally, winner_seen_remotely);
            prop_assert_eq!(winner_seen_locally, lo.max(ro));
        }
    }
}
