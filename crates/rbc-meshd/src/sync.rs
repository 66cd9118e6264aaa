//! Synchronization controller
//!
//! Glue between the value store, the Trickle scheduler and the outside
//! world. A controller is built per event over borrowed state and holds
//! nothing itself.

use crate::observer::{MeshObserver, MeshSignal};
use crate::store::ValueStore;
use crate::trickle::TrickleScheduler;
use rbc_mesh_core::resolver::Resolution;
use rbc_mesh_core::types::*;
use rbc_mesh_core::{EventHandler, Result, Transport};
use tracing::debug;

/// Per-event orchestration over a store and its scheduler
pub struct SyncController<'a> {
    store: &'a mut ValueStore,
    scheduler: &'a mut TrickleScheduler,
    observer: &'a dyn MeshObserver,
}

impl<'a> SyncController<'a> {
    pub fn new(
        store: &'a mut ValueStore,
        scheduler: &'a mut TrickleScheduler,
        observer: &'a dyn MeshObserver,
    ) -> Self {
        Self {
            store,
            scheduler,
            observer,
        }
    }

    /// Dispatch anything heard on the air.
    ///
    /// Returns the resolver's verdict for values, `None` for requests.
    pub fn on_advertisement<E: EventHandler>(
        &mut self,
        adv: &Advertisement,
        now: u64,
        events: &mut E,
    ) -> Result<Option<Resolution>> {
        match adv {
            Advertisement::Value(unit) => self.on_packet_received(unit, now, events),
            Advertisement::Request(handle) => {
                self.on_request_received(*handle, now)?;
                Ok(None)
            }
        }
    }

    /// Merge a received value and react to the verdict.
    ///
    /// A version 0 value carries no data; it is handled as a request.
    pub fn on_packet_received<E: EventHandler>(
        &mut self,
        unit: &BroadcastUnit,
        now: u64,
        events: &mut E,
    ) -> Result<Option<Resolution>> {
        if unit.version == 0 {
            self.on_request_received(unit.handle, now)?;
            return Ok(None);
        }

        let outcome = self.store.merge(unit)?;
        let handle = unit.handle;
        self.observer.signal(MeshSignal::Rx(handle));
        debug!(
            "Handle {} v{} from {}: {:?}",
            handle, unit.version, unit.origin, outcome.resolution
        );

        let event_type = match outcome.resolution {
            Resolution::Accept if !outcome.was_allocated => Some(MeshEventType::NewVal),
            Resolution::Accept => Some(MeshEventType::UpdateVal),
            Resolution::Conflict(_) if outcome.repeat_conflict => None,
            Resolution::Conflict(_) => Some(MeshEventType::ConflictingVal),
            Resolution::Reject(_) => None,
        };

        // The slot is fully written before the application hears about it.
        if let Some(event_type) = event_type {
            events.on_event(MeshEvent {
                event_type,
                value_handle: handle,
                data: outcome.current.payload,
                version: outcome.current.version,
                originator: unit.origin,
                contender: outcome.contender,
            });
        }

        if outcome.resolution.is_inconsistent() {
            self.observer.signal(MeshSignal::Inconsistent(handle));
            if outcome.was_allocated {
                self.scheduler.on_inconsistent(handle, now, self.observer);
            } else {
                self.scheduler.start(handle, now, self.observer);
            }
        } else {
            self.observer.signal(MeshSignal::Consistent(handle));
            self.scheduler.on_consistent(handle);
        }

        Ok(Some(outcome.resolution))
    }

    /// A neighbour asked for a handle. Only matters if we hold it.
    pub fn on_request_received(&mut self, handle: ValueHandle, now: u64) -> Result<()> {
        let slot = self.store.slot(handle)?;
        self.observer.signal(MeshSignal::Rx(handle));
        if slot.is_allocated() {
            debug!("Handle {} requested by a neighbour", handle);
            self.observer.signal(MeshSignal::Inconsistent(handle));
            self.scheduler.on_inconsistent(handle, now, self.observer);
        }
        Ok(())
    }

    /// Apply a local write and make it propagate promptly.
    pub fn on_local_update(
        &mut self,
        handle: ValueHandle,
        data: &[u8],
        now: u64,
    ) -> Result<BroadcastUnit> {
        let unit = self.store.set_local(handle, data)?;
        self.scheduler.start(handle, now, self.observer);
        Ok(unit)
    }

    /// Ask neighbours to refresh a handle without touching its value.
    pub fn on_value_request(&mut self, handle: ValueHandle, now: u64) -> Result<()> {
        self.store.slot(handle)?;
        self.scheduler.request(handle, now, self.observer);
        Ok(())
    }

    /// Advance all timers and hand due advertisements to the transport.
    ///
    /// Returns the number of advertisements sent.
    pub fn on_tick<T: Transport>(&mut self, now: u64, transport: &mut T) -> usize {
        let Self {
            store,
            scheduler,
            observer,
        } = self;
        let store: &ValueStore = store;
        let observer: &dyn MeshObserver = *observer;

        scheduler.advance(now, observer, |handle, requesting| {
            let adv = match store.broadcast_unit(handle) {
                Some(unit) => Advertisement::Value(unit),
                None if requesting => Advertisement::Request(handle),
                None => return false,
            };
            observer.signal(MeshSignal::Tx(handle));
            transport.send(adv);
            true
        })
    }
}
