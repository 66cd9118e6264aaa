//! rbc-meshd server - main service loop
//!
//! The radio receive task and the ticker both push [`MeshInput`]s into one
//! queue. A single consumer drains it and is the only place the engine is
//! driven from; application calls go through [`MeshHandle`] and take the
//! same lock for the duration of one call.

use crate::config::Config;
use crate::mesh::{Mesh, SlotInfo};
use crate::observer::TracingObserver;
use parking_lot::Mutex;
use rbc_mesh_core::types::*;
use rbc_mesh_core::{EventHandler, Transport};
use rbc_mesh_net::transport::{RadioConfig, TransportError, UdpRadio};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Depth of the engine input queue.
const INPUT_QUEUE_DEPTH: usize = 256;

/// Buffered application events per subscriber.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Mesh error: {0}")]
    Mesh(#[from] rbc_mesh_core::Error),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// One unit of work for the engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeshInput {
    /// Heard on the air
    Advertisement(Advertisement),
    /// Timer tick
    Tick,
}

/// Publishes engine events to subscribers.
struct EventForwarder<'a>(&'a broadcast::Sender<MeshEvent>);

impl EventHandler for EventForwarder<'_> {
    fn on_event(&mut self, event: MeshEvent) {
        debug!(
            "{:?} handle {} v{} from {}",
            event.event_type, event.value_handle, event.version, event.originator
        );
        // No subscribers is fine.
        let _ = self.0.send(event);
    }
}

/// Cloneable, lock-protected access to a running mesh
#[derive(Clone)]
pub struct MeshHandle {
    mesh: Arc<Mutex<Mesh>>,
    events: broadcast::Sender<MeshEvent>,
    epoch: Instant,
}

impl MeshHandle {
    pub fn new(mesh: Mesh) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            mesh: Arc::new(Mutex::new(mesh)),
            events,
            epoch: Instant::now(),
        }
    }

    /// Milliseconds since the handle was created; the engine's clock.
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Receive application events.
    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.events.subscribe()
    }

    pub fn local_addr(&self) -> NodeAddr {
        self.mesh.lock().local_addr()
    }

    pub fn value_set(&self, handle: ValueHandle, data: &[u8]) -> rbc_mesh_core::Result<u32> {
        let now = self.now_ms();
        self.mesh.lock().value_set(handle, data, now)
    }

    pub fn value_get(&self, handle: ValueHandle) -> rbc_mesh_core::Result<Payload> {
        self.mesh.lock().value_get(handle)
    }

    pub fn value_req(&self, handle: ValueHandle) -> rbc_mesh_core::Result<()> {
        let now = self.now_ms();
        self.mesh.lock().value_req(handle, now)
    }

    pub fn external_write(&self, handle: ValueHandle, data: &[u8]) -> rbc_mesh_core::Result<u32> {
        let now = self.now_ms();
        let mut events = EventForwarder(&self.events);
        self.mesh.lock().external_write(handle, data, now, &mut events)
    }

    pub fn params(&self) -> rbc_mesh_core::Result<MeshParams> {
        self.mesh.lock().params()
    }

    pub fn slot_info(&self, handle: ValueHandle) -> rbc_mesh_core::Result<SlotInfo> {
        self.mesh.lock().slot_info(handle)
    }

    pub fn slot_infos(&self) -> rbc_mesh_core::Result<Vec<SlotInfo>> {
        self.mesh.lock().slot_infos()
    }

    pub fn interval(&self, handle: ValueHandle) -> rbc_mesh_core::Result<u64> {
        self.mesh.lock().interval(handle)
    }

    /// Process one input at the current time.
    pub fn process<T: Transport>(&self, input: MeshInput, transport: &mut T) {
        self.process_at(input, self.now_ms(), transport)
    }

    /// Process one input at an explicit time.
    ///
    /// Engine errors here come from the air (e.g. a handle outside our
    /// range) and are logged, never propagated.
    pub fn process_at<T: Transport>(&self, input: MeshInput, now: u64, transport: &mut T) {
        let mut events = EventForwarder(&self.events);
        let mut mesh = self.mesh.lock();
        match input {
            MeshInput::Advertisement(adv) => {
                if let Err(e) = mesh.handle_advertisement(&adv, now, &mut events) {
                    debug!("Ignoring advertisement for handle {}: {}", adv.handle(), e);
                }
            }
            MeshInput::Tick => {
                if let Err(e) = mesh.tick(now, transport) {
                    warn!("Tick failed: {}", e);
                }
            }
        }
    }
}

/// Drain the input queue until it closes or shutdown is signalled.
pub async fn drive<T: Transport>(
    handle: MeshHandle,
    mut inputs: mpsc::Receiver<MeshInput>,
    mut transport: T,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            input = inputs.recv() => match input {
                Some(input) => handle.process(input, &mut transport),
                None => break,
            },
            _ = shutdown_rx.recv() => {
                info!("Shutting down...");
                break;
            }
        }
    }
}

/// Server state
pub struct Server {
    config: Config,
    handle: MeshHandle,
    /// Shutdown signal
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create the node, initialize the mesh and apply initial values.
    pub fn new(config: Config) -> Result<Self, ServerError> {
        let local = config.local_addr();
        let mut mesh = Mesh::new(local)
            .with_redundancy(config.redundancy)
            .with_observer(Box::new(TracingObserver));
        if let Some(seed) = config.seed {
            mesh = mesh.with_seed(seed);
        }
        mesh.init(config.params())?;

        let handle = MeshHandle::new(mesh);
        for value in &config.initial_values {
            let version = handle.value_set(value.handle, &value.data)?;
            info!("Initial value for handle {} (v{})", value.handle, version);
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            handle,
            shutdown_tx,
        })
    }

    /// Application access to the mesh
    pub fn handle(&self) -> MeshHandle {
        self.handle.clone()
    }

    /// Bind the radio and run until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let radio_config = RadioConfig::multicast(
            self.config.group,
            self.config.port_base,
            self.config.channel,
            self.config.access_addr,
            self.handle.local_addr(),
        )?;
        let radio = Arc::new(UdpRadio::bind(radio_config)?);
        info!(
            "Starting rbc-meshd as node {} on channel {}",
            self.handle.local_addr(),
            self.config.channel
        );

        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_DEPTH);
        let (radio_tx, tx_handle) = radio.spawn_tx();
        let rx_handle = self.spawn_rx_task(Arc::clone(&radio), input_tx.clone());
        let tick_handle = self.spawn_tick_task(input_tx);

        drive(
            self.handle.clone(),
            input_rx,
            radio_tx,
            self.shutdown_tx.subscribe(),
        )
        .await;

        rx_handle.abort();
        tick_handle.abort();
        tx_handle.abort();

        let stats = radio.stats();
        info!(
            "Radio: {} sent, {} received, {} dropped, {} bad frames",
            stats.sent, stats.received, stats.tx_dropped, stats.rx_errors
        );
        Ok(())
    }

    /// Spawn the radio receive task
    fn spawn_rx_task(
        &self,
        radio: Arc<UdpRadio>,
        inputs: mpsc::Sender<MeshInput>,
    ) -> JoinHandle<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = radio.recv() => match result {
                        Ok(pdu) => {
                            match inputs.try_send(MeshInput::Advertisement(pdu.adv)) {
                                Ok(()) => {}
                                Err(TrySendError::Full(_)) => {
                                    debug!("Input queue full, dropping frame from {}", pdu.sender);
                                }
                                Err(TrySendError::Closed(_)) => break,
                            }
                        }
                        Err(e) => {
                            error!("Radio receive error: {}", e);
                        }
                    },
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        })
    }

    /// Spawn the scheduler ticker
    fn spawn_tick_task(&self, inputs: mpsc::Sender<MeshInput>) -> JoinHandle<()> {
        let period = self.config.tick_interval();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // A full queue already has work pending; the next
                        // tick catches up because timers run on absolute time.
                        if let Err(TrySendError::Closed(_)) = inputs.try_send(MeshInput::Tick) {
                            break;
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        })
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
