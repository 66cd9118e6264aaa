//! Configuration for rbc-meshd

use clap::Parser;
use rbc_mesh_core::types::*;
use rbc_mesh_net::transport::{DEFAULT_GROUP, DEFAULT_PORT_BASE};
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

/// rbc-meshd - Rebroadcast Mesh Node
#[derive(Parser, Debug, Clone)]
#[command(name = "rbc-meshd")]
#[command(about = "Rebroadcast mesh node over an emulated broadcast radio")]
pub struct Config {
    /// Mesh access address (hex)
    #[arg(
        long,
        env = "RBC_MESH_ACCESS_ADDR",
        default_value = "0x8E89BED6",
        value_parser = parse_access_addr
    )]
    pub access_addr: u32,

    /// Radio channel (1-39)
    #[arg(short, long, env = "RBC_MESH_CHANNEL", default_value = "38")]
    pub channel: u8,

    /// Number of value handles in the mesh
    #[arg(long, env = "RBC_MESH_HANDLE_COUNT", default_value = "10")]
    pub handle_count: u8,

    /// Minimum advertise interval in milliseconds
    #[arg(long, env = "RBC_MESH_ADV_INT_MS", default_value = "100")]
    pub adv_int_ms: u32,

    /// Node address (aa:bb:cc:dd:ee:ff)
    #[arg(long, env = "RBC_MESH_NODE_ADDR", conflicts_with = "node_name")]
    pub node_addr: Option<NodeAddr>,

    /// Node name, hashed into a node address
    #[arg(long, env = "RBC_MESH_NODE_NAME")]
    pub node_name: Option<String>,

    /// Multicast group emulating the radio medium
    #[arg(long, default_value_t = DEFAULT_GROUP)]
    pub group: Ipv4Addr,

    /// Base UDP port; the channel number is added to it
    #[arg(long, default_value_t = DEFAULT_PORT_BASE)]
    pub port_base: u16,

    /// Scheduler tick in milliseconds (default: adv_int_ms / 5)
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Consistent observations that suppress a transmission (0 = never)
    #[arg(long, default_value = "3")]
    pub redundancy: u8,

    /// Seed for the transmit point generator
    #[arg(long)]
    pub seed: Option<u64>,

    /// Initial value, HANDLE=HEX (repeatable)
    #[arg(long = "set", value_name = "HANDLE=HEX")]
    pub initial_values: Vec<InitialValue>,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    /// Validate the daemon options. Mesh parameters are checked by
    /// [`crate::Mesh::init`].
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_ms == Some(0) {
            anyhow::bail!("Tick interval must be at least 1 ms");
        }
        if u32::from(self.port_base) + u32::from(self.channel) > u32::from(u16::MAX) {
            anyhow::bail!(
                "Port base {} leaves no room for channel {}",
                self.port_base,
                self.channel
            );
        }
        if !self.group.is_multicast() {
            anyhow::bail!("Group {} is not a multicast address", self.group);
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!("Unknown log format {:?} (expected pretty or json)", self.log_format);
        }
        for value in &self.initial_values {
            if value.handle.0 == 0 || value.handle.0 > u16::from(self.handle_count) {
                anyhow::bail!(
                    "Initial value for handle {} outside 1..={}",
                    value.handle,
                    self.handle_count
                );
            }
        }
        Ok(())
    }

    /// Mesh parameters passed to init
    pub fn params(&self) -> MeshParams {
        MeshParams {
            access_addr: self.access_addr,
            channel: self.channel,
            handle_count: self.handle_count,
            adv_int_ms: self.adv_int_ms,
        }
    }

    /// Our node address: explicit, derived from the name, or random.
    pub fn local_addr(&self) -> NodeAddr {
        match (&self.node_addr, &self.node_name) {
            (Some(addr), _) => *addr,
            (None, Some(name)) => NodeAddr::from_name(name),
            (None, None) => NodeAddr(rand::random()),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        let ms = self
            .tick_ms
            .unwrap_or(u64::from(self.adv_int_ms) / 5)
            .max(1);
        Duration::from_millis(ms)
    }
}

/// Parse an access address, with or without a `0x` prefix.
pub fn parse_access_addr(s: &str) -> Result<u32, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid access address {s:?}: {e}"))
}

/// A `--set HANDLE=HEX` value applied right after init
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitialValue {
    pub handle: ValueHandle,
    pub data: Vec<u8>,
}

impl FromStr for InitialValue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (handle, data) = s
            .split_once('=')
            .ok_or_else(|| format!("expected HANDLE=HEX, got {s:?}"))?;
        let handle: u16 = handle
            .trim()
            .parse()
            .map_err(|e| format!("invalid handle {handle:?}: {e}"))?;
        let data = hex::decode(data.trim()).map_err(|e| format!("invalid hex {data:?}: {e}"))?;
        if data.len() > MAX_VALUE_LEN {
            return Err(format!(
                "value for handle {handle} is {} bytes (max {MAX_VALUE_LEN})",
                data.len()
            ));
        }
        Ok(Self {
            handle: ValueHandle(handle),
            data,
        })
    }
}
