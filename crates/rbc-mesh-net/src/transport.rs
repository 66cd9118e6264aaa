//! UDP multicast radio emulation
//!
//! Every node on the same channel joins the same multicast group port, so a
//! datagram sent by one node reaches every other node, like an advertising
//! packet on a shared radio channel. Nothing is acknowledged or retried.

use crate::framing::{AdvCodec, FrameError, MAX_FRAME_LEN};
use bytes::BytesMut;
use parking_lot::RwLock;
use rbc_mesh_core::types::{Advertisement, NodeAddr};
use rbc_mesh_core::wire::AdvPdu;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, warn};

/// Default multicast group for the emulated radio.
pub const DEFAULT_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 77, 1);

/// Default base port; channel N listens on `port_base + N`.
pub const DEFAULT_PORT_BASE: u16 = 47_000;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Port overflow: base {port_base} + channel {channel}")]
    PortOverflow { port_base: u16, channel: u8 },
}

/// Radio configuration
#[derive(Clone, Debug)]
pub struct RadioConfig {
    /// Local socket address to bind
    pub bind_addr: SocketAddr,
    /// Where advertisements are sent (multicast group or unicast peer)
    pub target: SocketAddr,
    /// Interface used to join a multicast target
    pub interface: Ipv4Addr,
    /// Mesh access address
    pub access_addr: u32,
    /// Our address, stamped on every transmitted frame
    pub local: NodeAddr,
    /// Outbound queue depth
    pub queue_depth: usize,
}

impl RadioConfig {
    /// Configuration for one channel of a multicast group.
    pub fn multicast(
        group: Ipv4Addr,
        port_base: u16,
        channel: u8,
        access_addr: u32,
        local: NodeAddr,
    ) -> Result<Self, TransportError> {
        let port = port_base
            .checked_add(u16::from(channel))
            .ok_or(TransportError::PortOverflow { port_base, channel })?;
        Ok(Self {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)),
            target: SocketAddr::V4(SocketAddrV4::new(group, port)),
            interface: Ipv4Addr::UNSPECIFIED,
            access_addr,
            local,
            queue_depth: 64,
        })
    }
}

/// Radio counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RadioStats {
    pub sent: u64,
    pub received: u64,
    /// Dropped on a full transmit queue
    pub tx_dropped: u64,
    /// Undecodable frames
    pub rx_errors: u64,
}

/// Broadcast radio over UDP
pub struct UdpRadio {
    socket: UdpSocket,
    config: RadioConfig,
    stats: RwLock<RadioStats>,
}

impl UdpRadio {
    /// Bind the radio socket. Must be called inside a tokio runtime.
    pub fn bind(config: RadioConfig) -> Result<Self, TransportError> {
        let socket = Socket::new(
            Domain::for_address(config.bind_addr),
            Type::DGRAM,
            Some(Protocol::UDP),
        )?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&config.bind_addr.into())?;

        if let IpAddr::V4(group) = config.target.ip() {
            if group.is_multicast() {
                socket.join_multicast_v4(&group, &config.interface)?;
                socket.set_multicast_loop_v4(true)?;
                socket.set_multicast_ttl_v4(1)?;
            }
        }

        let socket = UdpSocket::from_std(socket.into())?;
        info!(
            "Radio bound on {} -> {} (access address {:#010x})",
            socket.local_addr()?,
            config.target,
            config.access_addr
        );

        Ok(Self {
            socket,
            config,
            stats: RwLock::new(RadioStats::default()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn stats(&self) -> RadioStats {
        self.stats.read().clone()
    }

    /// Transmit one advertisement.
    pub async fn send(&self, adv: Advertisement) -> Result<(), TransportError> {
        let mut codec = AdvCodec::new(self.config.access_addr);
        let mut buf = BytesMut::with_capacity(MAX_FRAME_LEN);
        codec.encode(
            AdvPdu {
                sender: self.config.local,
                adv,
            },
            &mut buf,
        )?;
        self.socket.send_to(&buf, self.config.target).await?;
        self.stats.write().sent += 1;
        Ok(())
    }

    /// Wait for the next advertisement from another node on our access address.
    ///
    /// Foreign frames, our own multicast echo and undecodable frames are
    /// skipped; only socket errors are returned.
    pub async fn recv(&self) -> Result<AdvPdu, TransportError> {
        let mut codec = AdvCodec::new(self.config.access_addr);
        let mut datagram = [0u8; MAX_FRAME_LEN + 1];
        loop {
            let (len, from) = self.socket.recv_from(&mut datagram).await?;
            let mut buf = BytesMut::from(&datagram[..len]);
            match codec.decode(&mut buf) {
                Ok(Some(pdu)) if pdu.sender == self.config.local => continue,
                Ok(Some(pdu)) => {
                    self.stats.write().received += 1;
                    return Ok(pdu);
                }
                Ok(None) => continue,
                Err(e) => {
                    self.stats.write().rx_errors += 1;
                    debug!("Dropping frame from {}: {}", from, e);
                }
            }
        }
    }

    /// Spawn the transmit task and return its queue handle.
    pub fn spawn_tx(self: &Arc<Self>) -> (RadioTx, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Advertisement>(self.config.queue_depth);
        let radio = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(adv) = rx.recv().await {
                if let Err(e) = radio.send(adv).await {
                    warn!("Radio send failed: {}", e);
                }
            }
        });
        (
            RadioTx {
                tx,
                radio: Arc::clone(self),
            },
            handle,
        )
    }
}

/// Non-blocking handle to the transmit queue
#[derive(Clone)]
pub struct RadioTx {
    tx: mpsc::Sender<Advertisement>,
    radio: Arc<UdpRadio>,
}

impl rbc_mesh_core::Transport for RadioTx {
    fn send(&mut self, adv: Advertisement) {
        if let Err(e) = self.tx.try_send(adv) {
            self.radio.stats.write().tx_dropped += 1;
            warn!("Dropping advertisement for handle {}: {}", adv.handle(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbc_mesh_core::types::*;
    use rbc_mesh_core::Transport;
    use std::time::Duration;
    use tokio::time::timeout;

    const LOOPBACK: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));

    fn unicast(target: SocketAddr, access_addr: u32, local: NodeAddr) -> RadioConfig {
        RadioConfig {
            bind_addr: LOOPBACK,
            target,
            interface: Ipv4Addr::UNSPECIFIED,
            access_addr,
            local,
            queue_depth: 4,
        }
    }

    fn bind(target: SocketAddr, access_addr: u32, local: [u8; 6]) -> UdpRadio {
        UdpRadio::bind(unicast(target, access_addr, NodeAddr(local))).unwrap()
    }

    fn value(handle: u16, version: u32) -> Advertisement {
        Advertisement::Value(BroadcastUnit {
            handle: ValueHandle(handle),
            version,
            origin: NodeAddr([7; 6]),
            payload: Payload::new(&[0xAA]).unwrap(),
        })
    }

    #[test]
    fn test_multicast_config_uses_channel_port() {
        let config = RadioConfig::multicast(
            DEFAULT_GROUP,
            DEFAULT_PORT_BASE,
            38,
            ACCESS_ADDRESS_BLE_ADV,
            NodeAddr::default(),
        )
        .unwrap();
        assert_eq!(config.target, "239.255.77.1:47038".parse().unwrap());
        assert_eq!(config.bind_addr.port(), 47_038);

        assert!(matches!(
            RadioConfig::multicast(DEFAULT_GROUP, u16::MAX, 1, 0, NodeAddr::default()),
            Err(TransportError::PortOverflow { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let receiver = bind(LOOPBACK, ACCESS_ADDRESS_BLE_ADV, [2; 6]);
        let target = receiver.local_addr().unwrap();
        let sender = bind(target, ACCESS_ADDRESS_BLE_ADV, [1; 6]);

        sender.send(value(3, 1)).await.unwrap();

        let pdu = timeout(Duration::from_secs(2), receiver.recv()).await.unwrap().unwrap();
        assert_eq!(pdu.sender, NodeAddr([1; 6]));
        assert_eq!(pdu.adv, value(3, 1));
        assert_eq!(receiver.stats().received, 1);
        assert_eq!(sender.stats().sent, 1);
    }

    #[tokio::test]
    async fn test_foreign_mesh_and_own_echo_are_skipped() {
        let local = NodeAddr([2; 6]);
        let receiver = bind(LOOPBACK, ACCESS_ADDRESS_BLE_ADV, local.0);
        let target = receiver.local_addr().unwrap();

        let foreign = bind(target, 0x1111_2222, [3; 6]);
        let echo = bind(target, ACCESS_ADDRESS_BLE_ADV, local.0);
        let neighbour = bind(target, ACCESS_ADDRESS_BLE_ADV, [4; 6]);

        foreign.send(value(1, 1)).await.unwrap();
        echo.send(value(1, 2)).await.unwrap();
        neighbour.send(value(1, 3)).await.unwrap();

        let pdu = timeout(Duration::from_secs(2), receiver.recv()).await.unwrap().unwrap();
        assert_eq!(pdu.sender, NodeAddr([4; 6]));
        assert_eq!(pdu.adv, value(1, 3));
    }

    #[tokio::test]
    async fn test_tx_queue_delivers() {
        let receiver = bind(LOOPBACK, ACCESS_ADDRESS_BLE_ADV, [2; 6]);
        let target = receiver.local_addr().unwrap();
        let sender = Arc::new(bind(target, ACCESS_ADDRESS_BLE_ADV, [1; 6]));

        let (mut tx, handle) = sender.spawn_tx();
        tx.send(Advertisement::Request(ValueHandle(5)));

        let pdu = timeout(Duration::from_secs(2), receiver.recv()).await.unwrap().unwrap();
        assert_eq!(pdu.adv, Advertisement::Request(ValueHandle(5)));

        drop(tx);
        handle.abort();
    }
}
