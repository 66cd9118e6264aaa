//! Rebroadcast Mesh Core Library
//!
//! This crate provides the runtime-free building blocks of the rebroadcast
//! mesh: the data model shared by every node, the conflict resolution rule,
//! and the wire encoding of advertisements.
//!
//! # Modules
//!
//! - [`types`]: Handles, node addresses, payloads, advertisements and events
//! - [`resolver`]: Deterministic per-value conflict resolution
//! - [`wire`]: Canonical advertisement encoding
//! - [`traits`]: Collaborator interfaces (transport, application)
//! - [`error`]: Error types

pub mod error;
pub mod resolver;
pub mod traits;
pub mod types;
pub mod wire;

pub use error::{Error, Result};
pub use resolver::{resolve, ConflictWinner, RejectReason, Resolution};
pub use traits::{EventHandler, Transport};
pub use types::*;
