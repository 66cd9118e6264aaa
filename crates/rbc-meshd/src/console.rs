//! Line-oriented operator console
//!
//! Reads commands from stdin and prints results to stdout. Application
//! events are printed as one JSON object per line.

use crate::server::MeshHandle;
use anyhow::{bail, Context};
use rbc_mesh_core::types::{MeshEvent, ValueHandle};
use serde_json::json;
use std::fmt::Write as _;
use std::str::FromStr;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

/// Console command
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `set <handle> <hex>`
    Set(ValueHandle, Vec<u8>),
    /// `get <handle>`
    Get(ValueHandle),
    /// `req <handle>`
    Req(ValueHandle),
    /// `write <handle> <hex>`, an external client write
    Write(ValueHandle, Vec<u8>),
    /// `info`
    Info,
}

fn parse_handle(arg: Option<&str>) -> anyhow::Result<ValueHandle> {
    let arg = arg.context("missing handle")?;
    let handle: u16 = arg.parse().with_context(|| format!("invalid handle {arg:?}"))?;
    Ok(ValueHandle(handle))
}

fn parse_hex(arg: Option<&str>) -> anyhow::Result<Vec<u8>> {
    match arg {
        Some(arg) => hex::decode(arg).with_context(|| format!("invalid hex {arg:?}")),
        None => Ok(Vec::new()),
    }
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> anyhow::Result<Self> {
        let mut words = line.split_whitespace();
        let command = match words.next() {
            Some("set") => Command::Set(parse_handle(words.next())?, parse_hex(words.next())?),
            Some("get") => Command::Get(parse_handle(words.next())?),
            Some("req") => Command::Req(parse_handle(words.next())?),
            Some("write") => Command::Write(parse_handle(words.next())?, parse_hex(words.next())?),
            Some("info") => Command::Info,
            Some(other) => bail!("unknown command {other:?} (set, get, req, write, info)"),
            None => bail!("empty command"),
        };
        if let Some(extra) = words.next() {
            bail!("unexpected argument {extra:?}");
        }
        Ok(command)
    }
}

impl Command {
    /// Run the command against a mesh and render the result.
    pub fn execute(&self, mesh: &MeshHandle) -> anyhow::Result<String> {
        Ok(match self {
            Command::Set(handle, data) => {
                let version = mesh.value_set(*handle, data)?;
                format!("handle {handle} set (v{version})")
            }
            Command::Get(handle) => {
                let value = mesh.value_get(*handle)?;
                let info = mesh.slot_info(*handle)?;
                format!(
                    "handle {handle} = {} (v{} from {})",
                    hex::encode(value.as_slice()),
                    info.version,
                    info.origin
                )
            }
            Command::Req(handle) => {
                mesh.value_req(*handle)?;
                format!("handle {handle} requested")
            }
            Command::Write(handle, data) => {
                let version = mesh.external_write(*handle, data)?;
                format!("handle {handle} written (v{version})")
            }
            Command::Info => {
                let params = mesh.params()?;
                let mut out = format!(
                    "node {} access {:#010x} channel {} handles {} adv_int {} ms",
                    mesh.local_addr(),
                    params.access_addr,
                    params.channel,
                    params.handle_count,
                    params.adv_int_ms
                );
                for slot in mesh.slot_infos()?.iter().filter(|s| s.allocated) {
                    let interval = mesh.interval(slot.handle)?;
                    write!(
                        out,
                        "\n  {}: v{} from {} interval {} ms",
                        slot.handle, slot.version, slot.origin, interval
                    )?;
                }
                out
            }
        })
    }
}

/// Render an application event as a JSON line.
pub fn event_json(event: &MeshEvent) -> String {
    json!({
        "event": format!("{:?}", event.event_type),
        "handle": event.value_handle.0,
        "version": event.version,
        "originator": event.originator.to_string(),
        "data": hex::encode(event.data.as_slice()),
        "contender": event.contender.map(|c| hex::encode(c.as_slice())),
    })
    .to_string()
}

/// Read commands from stdin until EOF.
pub async fn run_console(mesh: MeshHandle) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<String>(16);

    // Blocking stdin reads live on a plain thread so they never hold up
    // runtime shutdown.
    std::thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        })?;

    while let Some(line) = rx.recv().await {
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Command>().and_then(|cmd| cmd.execute(&mesh)) {
            Ok(out) => println!("{out}"),
            Err(e) => println!("error: {e:#}"),
        }
    }
    Ok(())
}

/// Print application events until the channel closes.
pub async fn print_events(mut events: broadcast::Receiver<MeshEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => println!("{}", event_json(&event)),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Event printer lagged, {} events missed", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
