//! State-transition hooks for instrumentation
//!
//! The engine reports what it is doing through [`MeshObserver`] instead of
//! toggling pins or printing inline. Observers must be cheap: they are
//! called while the mesh lock is held.

use crate::trickle::TrickleState;
use rbc_mesh_core::types::ValueHandle;
use tracing::trace;

/// Something the engine did that an observer may want to see.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeshSignal {
    /// Advertisement handed to the transport
    Tx(ValueHandle),
    /// Advertisement received for a handle
    Rx(ValueHandle),
    /// Neighbour agrees with us
    Consistent(ValueHandle),
    /// Neighbour disagrees with us
    Inconsistent(ValueHandle),
    /// Trickle timer moved between states
    Transition {
        handle: ValueHandle,
        from: TrickleState,
        to: TrickleState,
    },
}

pub trait MeshObserver: Send {
    fn signal(&self, signal: MeshSignal) {
        let _ = signal;
    }
}

/// Observer that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl MeshObserver for NoopObserver {}

/// Observer that logs every signal at trace level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl MeshObserver for TracingObserver {
    fn signal(&self, signal: MeshSignal) {
        match signal {
            MeshSignal::Tx(handle) => trace!(%handle, "tx"),
            MeshSignal::Rx(handle) => trace!(%handle, "rx"),
            MeshSignal::Consistent(handle) => trace!(%handle, "consistent"),
            MeshSignal::Inconsistent(handle) => trace!(%handle, "inconsistent"),
            MeshSignal::Transition { handle, from, to } => {
                trace!(%handle, ?from, ?to, "trickle transition")
            }
        }
    }
}
