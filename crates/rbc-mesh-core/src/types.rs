//! Core data model for the rebroadcast mesh
//!
//! Everything here is plain data with a fixed size: no type in this module
//! allocates, so slots, advertisements and events can live in tables that
//! are sized once at init.

use crate::error::{Error, Result};
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// LIMITS
// =============================================================================

/// Maximum payload bytes carried by one handle-value pair.
pub const MAX_VALUE_LEN: usize = 28;

/// Upper bound on handle_count (advertising namespace limit).
pub const MAX_HANDLE_COUNT: u8 = 155;

/// Smallest allowed mesh advertise interval.
pub const ADV_INT_MIN_MS: u32 = 5;

/// Largest allowed mesh advertise interval.
pub const ADV_INT_MAX_MS: u32 = 60_000;

/// Valid radio channels.
pub const CHANNEL_MIN: u8 = 1;
pub const CHANNEL_MAX: u8 = 39;

/// Access address shared with ordinary BLE advertising.
pub const ACCESS_ADDRESS_BLE_ADV: u32 = 0x8E89_BED6;

// =============================================================================
// IDENTITY TYPES
// =============================================================================

/// Mesh-global value identifier, valid in `1..=handle_count`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueHandle(pub u16);

impl ValueHandle {
    /// Zero-based slot index, if the handle is not 0.
    pub fn index(self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }
}

impl fmt::Display for ValueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for ValueHandle {
    fn from(handle: u16) -> Self {
        Self(handle)
    }
}

/// 48-bit node address, most significant byte first.
///
/// Used only to break ties between equal versions; the derived ordering is
/// the numeric order of the address.
#[derive(
    Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct NodeAddr(pub [u8; 6]);

impl NodeAddr {
    /// Derive an address from a human readable node name.
    pub fn from_name(name: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"rbc-mesh-node-v1:");
        hasher.update(name.as_bytes());
        let digest = hasher.finalize();
        let mut addr = [0u8; 6];
        addr.copy_from_slice(&digest.as_bytes()[..6]);
        Self(addr)
    }

    /// Address as an integer.
    pub fn as_u64(&self) -> u64 {
        self.0.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{}", hex::encode([*byte]))?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeAddr({})", self)
    }
}

impl FromStr for NodeAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits: String = s.chars().filter(|c| *c != ':').collect();
        let mut addr = [0u8; 6];
        hex::decode_to_slice(&digits, &mut addr)
            .map_err(|e| Error::InvalidParam(format!("node address {s:?}: {e}")))?;
        Ok(Self(addr))
    }
}

// =============================================================================
// PAYLOAD
// =============================================================================

/// Inline value buffer holding at most [`MAX_VALUE_LEN`] bytes.
///
/// Bytes past `len` are always zero, so the derived equality only looks at
/// the live contents.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Payload {
    len: u8,
    bytes: [u8; MAX_VALUE_LEN],
}

impl Payload {
    /// The empty payload.
    pub const EMPTY: Payload = Payload {
        len: 0,
        bytes: [0; MAX_VALUE_LEN],
    };

    /// Copy `data` into a new payload.
    pub fn new(data: &[u8]) -> Result<Self> {
        if data.len() > MAX_VALUE_LEN {
            return Err(Error::InvalidLength {
                len: data.len(),
                max: MAX_VALUE_LEN,
            });
        }
        let mut bytes = [0u8; MAX_VALUE_LEN];
        bytes[..data.len()].copy_from_slice(data);
        Ok(Self {
            len: data.len() as u8,
            bytes,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl TryFrom<&[u8]> for Payload {
    type Error = Error;

    fn try_from(data: &[u8]) -> Result<Self> {
        Self::new(data)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({})", hex::encode(self.as_slice()))
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(self.as_slice())
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_bytes(PayloadVisitor)
    }
}

struct PayloadVisitor;

impl<'de> Visitor<'de> for PayloadVisitor {
    type Value = Payload;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at most {MAX_VALUE_LEN} bytes")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<Payload, E> {
        Payload::new(v).map_err(|_| E::invalid_length(v.len(), &self))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Payload, A::Error> {
        let mut bytes = [0u8; MAX_VALUE_LEN];
        let mut len = 0;
        while let Some(byte) = seq.next_element::<u8>()? {
            if len == MAX_VALUE_LEN {
                return Err(de::Error::invalid_length(len + 1, &self));
            }
            bytes[len] = byte;
            len += 1;
        }
        Ok(Payload {
            len: len as u8,
            bytes,
        })
    }
}

// =============================================================================
// MESH PARAMETERS
// =============================================================================

/// Mesh-wide parameters passed to init. Must match on every node.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MeshParams {
    pub access_addr: u32,
    pub channel: u8,
    pub handle_count: u8,
    pub adv_int_ms: u32,
}

impl MeshParams {
    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<()> {
        if !(CHANNEL_MIN..=CHANNEL_MAX).contains(&self.channel) {
            return Err(Error::InvalidParam(format!(
                "channel {} outside {CHANNEL_MIN}..={CHANNEL_MAX}",
                self.channel
            )));
        }
        if self.handle_count == 0 || self.handle_count > MAX_HANDLE_COUNT {
            return Err(Error::InvalidParam(format!(
                "handle_count {} outside 1..={MAX_HANDLE_COUNT}",
                self.handle_count
            )));
        }
        if !(ADV_INT_MIN_MS..=ADV_INT_MAX_MS).contains(&self.adv_int_ms) {
            return Err(Error::InvalidParam(format!(
                "adv_int_ms {} outside {ADV_INT_MIN_MS}..={ADV_INT_MAX_MS}",
                self.adv_int_ms
            )));
        }
        Ok(())
    }
}

// =============================================================================
// ADVERTISEMENTS
// =============================================================================

/// One versioned handle-value pair as it travels on the air.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BroadcastUnit {
    pub handle: ValueHandle,
    pub version: u32,
    pub origin: NodeAddr,
    pub payload: Payload,
}

/// Everything a node ever broadcasts.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Advertisement {
    /// Current value of a handle
    Value(BroadcastUnit),
    /// Ask neighbours to re-advertise a handle we have never seen
    Request(ValueHandle),
}

impl Advertisement {
    pub fn handle(&self) -> ValueHandle {
        match self {
            Advertisement::Value(unit) => unit.handle,
            Advertisement::Request(handle) => *handle,
        }
    }
}

// =============================================================================
// APPLICATION EVENTS
// =============================================================================

/// Identifies framework generated events.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MeshEventType {
    /// Another node has updated the value
    UpdateVal,
    /// Another node holds a conflicting value with the same version
    ConflictingVal,
    /// A previously unallocated value has been received and allocated
    NewVal,
}

/// Change to one value, delivered to the application.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MeshEvent {
    pub event_type: MeshEventType,
    pub value_handle: ValueHandle,
    /// Value the slot holds after the change
    pub data: Payload,
    pub version: u32,
    /// Origin carried by the advertisement that caused the event
    pub originator: NodeAddr,
    /// Tie-break loser, only set for [`MeshEventType::ConflictingVal`]
    pub contender: Option<Payload>,
}
