//! rbc-meshd - Rebroadcast Mesh Synchronization Engine
//!
//! This crate provides:
//! - Versioned value store with per-handle conflict resolution
//! - Trickle broadcast scheduling, one timer per handle
//! - Synchronization controller tying store, scheduler and radio together
//! - The `Mesh` API (init, value set/get/request, parameter getters)
//! - A single-consumer server loop over an emulated broadcast radio

pub mod config;
pub mod console;
pub mod mesh;
pub mod observer;
pub mod server;
pub mod store;
pub mod sync;
pub mod trickle;

pub use config::Config;
pub use mesh::{Mesh, SlotInfo};
pub use observer::{MeshObserver, MeshSignal, NoopObserver, TracingObserver};
pub use server::{MeshHandle, MeshInput, Server, ServerError};
pub use store::ValueStore;
pub use sync::SyncController;
pub use trickle::{TrickleConfig, TrickleScheduler, TrickleState, TrickleTimer};
