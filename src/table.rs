use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::anyhow;
use bytes::Bytes;
use tokio::sync::futures::Notified;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};
use crate::config::MtpConfig;
use crate::connection::ConnectionState;
use crate::error::{MtpError, MtpResult};
use crate::liveness::{Liveness, LivenessProbe, OwnerId};
use crate::seq_space::SeqNo;
use crate::transport::{DatagramSocket, TransportProvider};

pub type ConnectionId = usize;

/// The transport handle of a bound connection, together with its endpoints. The peer is fixed
///  for the lifetime of the binding.
pub struct Binding {
    pub socket: Arc<dyn DatagramSocket>,
    pub local: SocketAddr,
    pub peer: SocketAddr,
}

/// Each allocation gets its own protocol state, so that holders of a stale [ActiveConnection]
///  can not reach a slot after it was freed and opened again
struct Allocation {
    owner: Option<OwnerId>,
    binding: Option<Arc<Binding>>,
    state: Arc<ConnectionState>,
}

/// A bound connection as seen by the engines
#[derive(Clone)]
pub struct ActiveConnection {
    pub id: ConnectionId,
    pub binding: Arc<Binding>,
    pub state: Arc<ConnectionState>,
}

/// The fixed-size table of all connections.
///
/// Allocation data (owner and binding) is guarded by one lock for the entire table, protocol
///  state by per-connection locks. Locks are acquired in the order allocation, send side,
///  receive side.
pub struct ConnectionTable {
    allocations: Mutex<Vec<Allocation>>,
    capacity: usize,
    config: MtpConfig,
    detached: Notify,
    transport: Arc<dyn TransportProvider>,
}

impl ConnectionTable {
    pub fn new(config: &MtpConfig, transport: Arc<dyn TransportProvider>) -> ConnectionTable {
        let allocations = (0..config.table_size)
            .map(|_| Allocation {
                owner: None,
                binding: None,
                state: Arc::new(ConnectionState::new(config)),
            })
            .collect();

        ConnectionTable {
            allocations: Mutex::new(allocations),
            capacity: config.table_size,
            config: config.clone(),
            detached: Notify::new(),
            transport,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Completes when a bound connection is freed after this call. Engines waiting on snapshots
    ///  of bound connections use this to let go of the freed connection's transport handle.
    pub fn detached(&self) -> Notified<'_> {
        self.detached.notified()
    }

    pub async fn open(&self, owner: OwnerId) -> MtpResult<ConnectionId> {
        let mut allocations = self.allocations.lock().await;

        let Some(id) = allocations.iter().position(|a| a.owner.is_none()) else {
            debug!("no free connection slot for owner {}", owner);
            return Err(MtpError::NoFreeSlot);
        };
        allocations[id].owner = Some(owner);
        allocations[id].state = Arc::new(ConnectionState::new(&self.config));

        info!("opened connection {} for owner {}", id, owner);
        Ok(id)
    }

    pub async fn bind(&self, id: ConnectionId, local: SocketAddr, peer: SocketAddr) -> MtpResult<()> {
        let mut allocations = self.allocations.lock().await;
        let allocation = Self::allocated_mut(&mut allocations, id)?;
        if allocation.binding.is_some() {
            return Err(MtpError::AlreadyBound(id));
        }

        let socket = self.transport.bind(local, peer).await?;
        let local = socket.local_addr();
        allocation.binding = Some(Arc::new(Binding { socket, local, peer }));

        info!("bound connection {} to {:?} with peer {:?}", id, local, peer);
        Ok(())
    }

    /// Resets and frees a connection. Closing a connection that is not allocated is a no-op.
    pub async fn close(&self, id: ConnectionId) -> MtpResult<()> {
        if id >= self.capacity() {
            return Err(MtpError::InvalidConnection(id));
        }

        let mut allocations = self.allocations.lock().await;
        if allocations[id].owner.is_none() {
            debug!("closing connection {} which is not allocated - ignoring", id);
            return Ok(());
        }

        self.free(&mut allocations, id).await;
        info!("closed connection {}", id);
        Ok(())
    }

    /// Puts a message into the connection's send buffer for the send engine to pick up.
    ///  `dest` must match the peer the connection is bound to.
    pub async fn send(&self, id: ConnectionId, dest: SocketAddr, payload: &[u8]) -> MtpResult<SeqNo> {
        let mut allocations = self.allocations.lock().await;
        let allocation = Self::allocated_mut(&mut allocations, id)?;

        match &allocation.binding {
            Some(binding) if binding.peer == dest => {}
            Some(binding) => return Err(MtpError::NotConnected { expected: Some(binding.peer), actual: dest }),
            None => return Err(MtpError::NotConnected { expected: None, actual: dest }),
        }

        let state = allocation.state.clone();
        let result = state.send.lock().await.enqueue(payload);
        result
    }

    /// Takes the next in-order message from the connection's receive buffer
    pub async fn receive(&self, id: ConnectionId) -> MtpResult<Bytes> {
        let mut allocations = self.allocations.lock().await;
        let state = Self::allocated_mut(&mut allocations, id)?.state.clone();

        let result = state.recv.lock().await.dequeue();
        result
    }

    pub async fn is_free(&self, id: ConnectionId) -> bool {
        match self.allocations.lock().await.get(id) {
            Some(allocation) => allocation.owner.is_none(),
            None => false,
        }
    }

    pub async fn is_bound(&self, id: ConnectionId) -> bool {
        match self.allocations.lock().await.get(id) {
            Some(allocation) => allocation.binding.is_some(),
            None => false,
        }
    }

    /// A snapshot of all bound connections
    pub async fn active_connections(&self) -> Vec<ActiveConnection> {
        let allocations = self.allocations.lock().await;
        allocations.iter()
            .enumerate()
            .filter_map(|(id, allocation)| allocation.binding.as_ref().map(|binding| ActiveConnection {
                id,
                binding: binding.clone(),
                state: allocation.state.clone(),
            }))
            .collect()
    }

    /// Frees all connections whose owner is gone, returning their ids. Fails if the liveness of
    ///  an owner can not be determined.
    pub async fn reclaim_dead_owners(&self, probe: &dyn LivenessProbe) -> anyhow::Result<Vec<ConnectionId>> {
        let mut allocations = self.allocations.lock().await;

        let mut reclaimed = Vec::new();
        for id in 0..allocations.len() {
            let Some(owner) = allocations[id].owner else {
                continue;
            };

            match probe.probe(owner) {
                Ok(Liveness::Alive) => {}
                Ok(Liveness::Gone) => {
                    warn!("owner {} of connection {} is gone - reclaiming the connection", owner, id);
                    self.free(&mut allocations, id).await;
                    reclaimed.push(id);
                }
                Err(e) => {
                    return Err(anyhow!("unable to determine liveness of owner {} of connection {}: {}", owner, id, e));
                }
            }
        }
        Ok(reclaimed)
    }

    async fn free(&self, allocations: &mut [Allocation], id: ConnectionId) {
        allocations[id].state.reset().await;
        allocations[id].owner = None;
        if allocations[id].binding.take().is_some() {
            self.detached.notify_waiters();
        }
    }

    fn allocated_mut(allocations: &mut [Allocation], id: ConnectionId) -> MtpResult<&mut Allocation> {
        match allocations.get_mut(id) {
            Some(allocation) if allocation.owner.is_some() => Ok(allocation),
            _ => Err(MtpError::InvalidConnection(id)),
        }
    }
}
