//! The mesh API
//!
//! [`Mesh`] is what an application holds: it owns the value store and the
//! Trickle scheduler once [`Mesh::init`] has succeeded, and routes every
//! call through a [`SyncController`].

use crate::observer::{MeshObserver, NoopObserver};
use crate::store::ValueStore;
use crate::sync::SyncController;
use crate::trickle::{TrickleConfig, TrickleScheduler, TrickleTimer, DEFAULT_REDUNDANCY};
use rbc_mesh_core::resolver::Resolution;
use rbc_mesh_core::types::*;
use rbc_mesh_core::{Error, EventHandler, Result, Transport};
use serde::Serialize;
use tracing::info;

/// Version metadata of one slot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SlotInfo {
    pub handle: ValueHandle,
    pub version: u32,
    pub origin: NodeAddr,
    pub allocated: bool,
}

struct MeshState {
    params: MeshParams,
    store: ValueStore,
    scheduler: TrickleScheduler,
}

/// A rebroadcast mesh node
pub struct Mesh {
    local: NodeAddr,
    seed: u64,
    redundancy: u8,
    observer: Box<dyn MeshObserver>,
    state: Option<MeshState>,
}

impl Mesh {
    /// Create an uninitialized node with a random scheduler seed.
    pub fn new(local: NodeAddr) -> Self {
        Self {
            local,
            seed: rand::random(),
            redundancy: DEFAULT_REDUNDANCY,
            observer: Box::new(NoopObserver),
            state: None,
        }
    }

    /// Fix the seed of the transmit point generator.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Redundancy threshold used by every timer; 0 disables suppression.
    pub fn with_redundancy(mut self, redundancy: u8) -> Self {
        self.redundancy = redundancy;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn MeshObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn local_addr(&self) -> NodeAddr {
        self.local
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Allocate the value table and park every timer in Idle.
    pub fn init(&mut self, params: MeshParams) -> Result<()> {
        if self.state.is_some() {
            return Err(Error::AlreadyInitialized);
        }
        params.validate()?;

        let config =
            TrickleConfig::from_adv_int(params.adv_int_ms).with_redundancy(self.redundancy);
        self.state = Some(MeshState {
            params,
            store: ValueStore::new(params.handle_count, self.local),
            scheduler: TrickleScheduler::new(params.handle_count, config, self.seed),
        });

        info!(
            "Mesh initialized: node {}, access address {:#010x}, channel {}, {} handles, \
             adv_int {} ms",
            self.local,
            params.access_addr,
            params.channel,
            params.handle_count,
            params.adv_int_ms
        );
        Ok(())
    }

    fn state(&self) -> Result<&MeshState> {
        self.state.as_ref().ok_or(Error::NotInitialized)
    }

    fn controller(&mut self) -> Result<SyncController<'_>> {
        let state = self.state.as_mut().ok_or(Error::NotInitialized)?;
        Ok(SyncController::new(
            &mut state.store,
            &mut state.scheduler,
            self.observer.as_ref(),
        ))
    }

    /// Set a value locally. Returns the new version.
    pub fn value_set(&mut self, handle: ValueHandle, data: &[u8], now: u64) -> Result<u32> {
        let unit = self.controller()?.on_local_update(handle, data, now)?;
        Ok(unit.version)
    }

    pub fn value_get(&self, handle: ValueHandle) -> Result<Payload> {
        self.state()?.store.get(handle)
    }

    /// Ask the neighbourhood to refresh a handle. Never changes the value.
    pub fn value_req(&mut self, handle: ValueHandle, now: u64) -> Result<()> {
        self.controller()?.on_value_request(handle, now)
    }

    /// A write from an external client (e.g. a connected peer writing over
    /// a point-to-point link). Behaves like [`Mesh::value_set`] and also
    /// tells the application.
    pub fn external_write<E: EventHandler>(
        &mut self,
        handle: ValueHandle,
        data: &[u8],
        now: u64,
        events: &mut E,
    ) -> Result<u32> {
        let was_allocated = self.state()?.store.slot(handle)?.is_allocated();
        let unit = self.controller()?.on_local_update(handle, data, now)?;
        events.on_event(MeshEvent {
            event_type: if was_allocated {
                MeshEventType::UpdateVal
            } else {
                MeshEventType::NewVal
            },
            value_handle: handle,
            data: unit.payload,
            version: unit.version,
            originator: unit.origin,
            contender: None,
        });
        Ok(unit.version)
    }

    pub fn access_address_get(&self) -> Result<u32> {
        Ok(self.state()?.params.access_addr)
    }

    pub fn channel_get(&self) -> Result<u8> {
        Ok(self.state()?.params.channel)
    }

    pub fn handle_count_get(&self) -> Result<u8> {
        Ok(self.state()?.params.handle_count)
    }

    pub fn adv_int_get(&self) -> Result<u32> {
        Ok(self.state()?.params.adv_int_ms)
    }

    pub fn params(&self) -> Result<MeshParams> {
        Ok(self.state()?.params)
    }

    /// Feed one received advertisement into the engine.
    pub fn handle_advertisement<E: EventHandler>(
        &mut self,
        adv: &Advertisement,
        now: u64,
        events: &mut E,
    ) -> Result<Option<Resolution>> {
        self.controller()?.on_advertisement(adv, now, events)
    }

    /// Run the timers up to `now`. Returns the number of advertisements sent.
    pub fn tick<T: Transport>(&mut self, now: u64, transport: &mut T) -> Result<usize> {
        Ok(self.controller()?.on_tick(now, transport))
    }

    pub fn slot_info(&self, handle: ValueHandle) -> Result<SlotInfo> {
        let slot = self.state()?.store.slot(handle)?;
        Ok(SlotInfo {
            handle,
            version: slot.version(),
            origin: slot.origin(),
            allocated: slot.is_allocated(),
        })
    }

    /// Metadata of every slot in handle order
    pub fn slot_infos(&self) -> Result<Vec<SlotInfo>> {
        Ok(self
            .state()?
            .store
            .slots()
            .map(|slot| SlotInfo {
                handle: slot.handle(),
                version: slot.version(),
                origin: slot.origin(),
                allocated: slot.is_allocated(),
            })
            .collect())
    }

    pub fn trickle_timer(&self, handle: ValueHandle) -> Result<TrickleTimer> {
        let state = self.state()?;
        state.store.slot(handle)?;
        state
            .scheduler
            .timer(handle)
            .copied()
            .ok_or(Error::InvalidAddress {
                handle: handle.0,
                handle_count: state.store.handle_count(),
            })
    }

    /// Current Trickle interval of a handle in milliseconds
    pub fn interval(&self, handle: ValueHandle) -> Result<u64> {
        Ok(self.trickle_timer(handle)?.current_interval())
    }
}
