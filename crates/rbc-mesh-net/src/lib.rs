//! Radio primitives for the rebroadcast mesh
//!
//! This crate provides:
//! - Advertisement framing with access-address filtering
//! - A broadcast "radio" emulated over UDP multicast, one group port per channel

pub mod framing;
pub mod transport;

pub use framing::{AdvCodec, FrameError};
pub use transport::{RadioConfig, RadioStats, RadioTx, TransportError, UdpRadio};
