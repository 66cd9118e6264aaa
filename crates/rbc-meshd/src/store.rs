//! Versioned handle-value store

use rbc_mesh_core::resolver::{resolve, RejectReason, Resolution};
use rbc_mesh_core::types::*;
use rbc_mesh_core::{Error, Result};

/// One handle-value pair with its version metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValueSlot {
    handle: ValueHandle,
    payload: Payload,
    version: u32,
    origin: NodeAddr,
    allocated: bool,
    /// Losing `(version, origin)` of the last conflict on this value
    reported_conflict: Option<(u32, NodeAddr)>,
}

impl ValueSlot {
    fn empty(handle: ValueHandle) -> Self {
        Self {
            handle,
            payload: Payload::EMPTY,
            version: 0,
            origin: NodeAddr::default(),
            allocated: false,
            reported_conflict: None,
        }
    }

    pub fn handle(&self) -> ValueHandle {
        self.handle
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn origin(&self) -> NodeAddr {
        self.origin
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    /// The slot as it goes on the air.
    pub fn unit(&self) -> BroadcastUnit {
        BroadcastUnit {
            handle: self.handle,
            version: self.version,
            origin: self.origin,
            payload: self.payload,
        }
    }
}

/// Result of merging a remote observation into the store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergeOutcome {
    pub resolution: Resolution,
    /// Whether the slot held a value before the merge
    pub was_allocated: bool,
    /// Payload that lost an equal-version tie-break, if any
    pub contender: Option<Payload>,
    /// The same loser was already reported for the current value
    pub repeat_conflict: bool,
    /// Slot contents after the merge
    pub current: BroadcastUnit,
}

/// Fixed table of value slots, indexed by `handle - 1`
pub struct ValueStore {
    slots: Vec<ValueSlot>,
    local: NodeAddr,
}

impl ValueStore {
    /// Allocate every slot up front; the table never grows.
    pub fn new(handle_count: u8, local: NodeAddr) -> Self {
        let slots = (1..=u16::from(handle_count))
            .map(|h| ValueSlot::empty(ValueHandle(h)))
            .collect();
        Self { slots, local }
    }

    pub fn handle_count(&self) -> u16 {
        self.slots.len() as u16
    }

    pub fn local_addr(&self) -> NodeAddr {
        self.local
    }

    fn index(&self, handle: ValueHandle) -> Result<usize> {
        handle
            .index()
            .filter(|i| *i < self.slots.len())
            .ok_or(Error::InvalidAddress {
                handle: handle.0,
                handle_count: self.handle_count(),
            })
    }

    /// Slot metadata for a valid handle, allocated or not
    pub fn slot(&self, handle: ValueHandle) -> Result<&ValueSlot> {
        Ok(&self.slots[self.index(handle)?])
    }

    /// Replace a value locally, bumping its version and claiming it as ours.
    ///
    /// Fails with [`Error::VersionExhausted`] once the version is `u32::MAX`;
    /// the slot is left untouched.
    pub fn set_local(&mut self, handle: ValueHandle, data: &[u8]) -> Result<BroadcastUnit> {
        let index = self.index(handle)?;
        let payload = Payload::new(data)?;

        let slot = &mut self.slots[index];
        let version = slot
            .version
            .checked_add(1)
            .ok_or(Error::VersionExhausted(handle.0))?;
        *slot = ValueSlot {
            handle: slot.handle,
            payload,
            version,
            origin: self.local,
            allocated: true,
            reported_conflict: None,
        };
        Ok(slot.unit())
    }

    /// Current value of an allocated handle
    pub fn get(&self, handle: ValueHandle) -> Result<Payload> {
        let slot = self.slot(handle)?;
        if !slot.allocated {
            return Err(Error::Unallocated(handle.0));
        }
        Ok(slot.payload)
    }

    /// Broadcast unit for a handle, if it holds a value
    pub fn broadcast_unit(&self, handle: ValueHandle) -> Option<BroadcastUnit> {
        self.slot(handle)
            .ok()
            .filter(|slot| slot.allocated)
            .map(ValueSlot::unit)
    }

    /// Fold a remote observation into the store.
    ///
    /// The slot is rewritten as a whole (payload, version, origin) only when
    /// the resolver lets the remote side win.
    pub fn merge(&mut self, unit: &BroadcastUnit) -> Result<MergeOutcome> {
        let index = self.index(unit.handle)?;
        let slot = &mut self.slots[index];
        let was_allocated = slot.allocated;

        // Version 0 means "no value" and can never replace anything.
        let resolution = if unit.version == 0 {
            Resolution::Reject(RejectReason::Outdated)
        } else {
            resolve(slot.version, slot.origin, unit.version, unit.origin)
        };
        let (contender, loser) = match resolution {
            Resolution::Conflict(_) if resolution.remote_wins() => {
                (Some(slot.payload), Some((slot.version, slot.origin)))
            }
            Resolution::Conflict(_) => (Some(unit.payload), Some((unit.version, unit.origin))),
            _ => (None, None),
        };
        let repeat_conflict = loser.is_some() && loser == slot.reported_conflict;

        if resolution.remote_wins() {
            *slot = ValueSlot {
                handle: slot.handle,
                payload: unit.payload,
                version: unit.version,
                origin: unit.origin,
                allocated: true,
                reported_conflict: None,
            };
        }
        if loser.is_some() {
            slot.reported_conflict = loser;
        }

        Ok(MergeOutcome {
            resolution,
            was_allocated,
            contender,
            repeat_conflict,
            current: slot.unit(),
        })
    }

    /// Iterate over all slots in handle order
    pub fn slots(&self) -> impl Iterator<Item = &ValueSlot> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rbc_mesh_core::resolver::ConflictWinner;

    const LOCAL: NodeAddr = NodeAddr([0, 0, 0, 0, 0, 5]);
    const LOWER: NodeAddr = NodeAddr([0, 0, 0, 0, 0, 1]);
    const HIGHER: NodeAddr = NodeAddr([0, 0, 0, 0, 0, 9]);

    fn unit(handle: u16, version: u32, origin: NodeAddr, data: &[u8]) -> BroadcastUnit {
        BroadcastUnit {
            handle: ValueHandle(handle),
            version,
            origin,
            payload: Payload::new(data).unwrap(),
        }
    }

    #[test]
    fn test_set_local_bumps_version() {
        let mut store = ValueStore::new(10, LOCAL);

        let first = store.set_local(ValueHandle(3), &[0x01, 0x02]).unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.origin, LOCAL);
        assert_eq!(store.get(ValueHandle(3)).unwrap().as_slice(), &[0x01, 0x02]);

        let second = store.set_local(ValueHandle(3), &[]).unwrap();
        assert_eq!(second.version, 2);
        assert!(store.get(ValueHandle(3)).unwrap().is_empty());
    }

    #[test]
    fn test_handle_range() {
        let mut store = ValueStore::new(10, LOCAL);
        assert!(matches!(
            store.set_local(ValueHandle(0), &[1]),
            Err(Error::InvalidAddress { handle: 0, handle_count: 10 })
        ));
        assert!(matches!(
            store.set_local(ValueHandle(11), &[1]),
            Err(Error::InvalidAddress { handle: 11, .. })
        ));
        assert!(store.set_local(ValueHandle(10), &[1]).is_ok());
    }

    #[test]
    fn test_oversized_set_leaves_slot_unchanged() {
        let mut store = ValueStore::new(4, LOCAL);
        store.set_local(ValueHandle(2), &[7]).unwrap();

        let err = store.set_local(ValueHandle(2), &[0; MAX_VALUE_LEN + 1]).unwrap_err();
        assert!(matches!(err, Error::InvalidLength { .. }));

        let slot = store.slot(ValueHandle(2)).unwrap();
        assert_eq!(slot.version(), 1);
        assert_eq!(slot.payload().as_slice(), &[7]);
    }

    #[test]
    fn test_get_unallocated() {
        let store = ValueStore::new(4, LOCAL);
        assert!(matches!(store.get(ValueHandle(1)), Err(Error::Unallocated(1))));
        assert!(store.broadcast_unit(ValueHandle(1)).is_none());
    }

    #[test]
    fn test_merge_allocates_new_value() {
        let mut store = ValueStore::new(4, LOCAL);
        let outcome = store.merge(&unit(2, 4, LOWER, &[9])).unwrap();

        assert_eq!(outcome.resolution, Resolution::Accept);
        assert!(!outcome.was_allocated);
        assert_eq!(outcome.current.version, 4);

        let slot = store.slot(ValueHandle(2)).unwrap();
        assert!(slot.is_allocated());
        assert_eq!(slot.origin(), LOWER);
    }

    #[test]
    fn test_version_zero_never_allocates() {
        let mut store = ValueStore::new(4, LOCAL);
        let outcome = store.merge(&unit(1, 0, HIGHER, &[1])).unwrap();
        assert_eq!(outcome.resolution, Resolution::Reject(RejectReason::Outdated));
        assert!(!store.slot(ValueHandle(1)).unwrap().is_allocated());
    }

    #[test]
    fn test_merge_rejections_leave_slot_alone() {
        let mut store = ValueStore::new(4, LOCAL);
        store.merge(&unit(1, 3, LOWER, &[3])).unwrap();

        let stale = store.merge(&unit(1, 2, HIGHER, &[2])).unwrap();
        assert_eq!(stale.resolution, Resolution::Reject(RejectReason::Outdated));

        let dup = store.merge(&unit(1, 3, LOWER, &[3])).unwrap();
        assert_eq!(dup.resolution, Resolution::Reject(RejectReason::Duplicate));

        assert_eq!(store.slot(ValueHandle(1)).unwrap().unit(), unit(1, 3, LOWER, &[3]));
    }

    #[test]
    fn test_merge_conflicts() {
        let mut store = ValueStore::new(4, LOCAL);
        store.set_local(ValueHandle(1), &[0xAA]).unwrap();

        // Lower origin loses: we keep ours, the remote payload is reported.
        let lost = store.merge(&unit(1, 1, LOWER, &[0xBB])).unwrap();
        assert_eq!(lost.resolution, Resolution::Conflict(ConflictWinner::Local));
        assert_eq!(lost.contender.unwrap().as_slice(), &[0xBB]);
        assert_eq!(lost.current.payload.as_slice(), &[0xAA]);
        assert_eq!(lost.current.origin, LOCAL);

        // Higher origin wins: we take theirs, our old payload is reported.
        let won = store.merge(&unit(1, 1, HIGHER, &[0xCC])).unwrap();
        assert_eq!(won.resolution, Resolution::Conflict(ConflictWinner::Remote));
        assert_eq!(won.contender.unwrap().as_slice(), &[0xAA]);
        assert_eq!(won.current, unit(1, 1, HIGHER, &[0xCC]));
    }

    #[test]
    fn test_repeated_loser_is_flagged() {
        let mut store = ValueStore::new(4, LOCAL);
        store.set_local(ValueHandle(1), &[0xAA]).unwrap();

        let first = store.merge(&unit(1, 1, LOWER, &[0xBB])).unwrap();
        assert!(!first.repeat_conflict);
        let again = store.merge(&unit(1, 1, LOWER, &[0xBB])).unwrap();
        assert_eq!(again.resolution, Resolution::Conflict(ConflictWinner::Local));
        assert!(again.repeat_conflict);

        // Our old value keeps circulating after HIGHER took over.
        let won = store.merge(&unit(1, 1, HIGHER, &[0xCC])).unwrap();
        assert!(!won.repeat_conflict);
        let stale = store.merge(&unit(1, 1, LOCAL, &[0xAA])).unwrap();
        assert_eq!(stale.resolution, Resolution::Conflict(ConflictWinner::Local));
        assert!(stale.repeat_conflict);

        // A new value forgets the old loser.
        store.set_local(ValueHandle(1), &[0xDD]).unwrap();
        let fresh = store.merge(&unit(1, 2, LOWER, &[0xEE])).unwrap();
        assert!(!fresh.repeat_conflict);
    }

    #[test]
    fn test_set_local_at_version_ceiling() {
        let mut store = ValueStore::new(4, LOCAL);
        store.merge(&unit(1, u32::MAX, HIGHER, &[1])).unwrap();
        let before = *store.slot(ValueHandle(1)).unwrap();

        let err = store.set_local(ValueHandle(1), &[2]).unwrap_err();
        assert!(matches!(err, Error::VersionExhausted(1)));
        assert_eq!(*store.slot(ValueHandle(1)).unwrap(), before);
        assert_eq!(store.get(ValueHandle(1)).unwrap().as_slice(), &[1]);
    }

    proptest! {
        #[test]
        fn prop_version_never_decreases(
            ops in proptest::collection::vec((any::<bool>(), 0u32..6, 0u8..4), 1..40)
        ) {
            let mut store = ValueStore::new(1, LOCAL);
            let mut last = 0;
            for (local, version, origin) in ops {
                if local {
                    store.set_local(ValueHandle(1), &[version as u8]).unwrap();
                } else {
                    let origin = NodeAddr([0, 0, 0, 0, 0, origin]);
                    store.merge(&unit(1, version, origin, &[origin.0[5]])).unwrap();
                }
                let now = store.slot(ValueHandle(1)).unwrap().version();
                prop_assert!(now >= last);
                last = now;
            }
        }
    }
}
