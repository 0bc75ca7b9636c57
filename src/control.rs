use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};
use crate::error::{MtpError, MtpResult};
use crate::liveness::OwnerId;
use crate::table::{ConnectionId, ConnectionTable};

/// Connection lifecycle requests, each carrying the channel for its reply
#[derive(Debug)]
pub enum ControlRequest {
    Open { owner: OwnerId, reply: oneshot::Sender<MtpResult<ConnectionId>> },
    Bind { id: ConnectionId, local: SocketAddr, peer: SocketAddr, reply: oneshot::Sender<MtpResult<()>> },
    Close { id: ConnectionId, reply: oneshot::Sender<MtpResult<()>> },
}

/// Serializes connection lifecycle operations: requests are handed over through a channel with
///  a single slot and processed strictly one at a time, each being answered before the next one
///  is accepted.
pub struct ControlPlane {
    table: Arc<ConnectionTable>,
    requests: Mutex<mpsc::Receiver<ControlRequest>>,
}

/// The client side of the control plane
#[derive(Clone)]
pub struct ControlHandle {
    requests: mpsc::Sender<ControlRequest>,
}

impl ControlPlane {
    pub fn new(table: Arc<ConnectionTable>) -> (ControlPlane, ControlHandle) {
        let (send, recv) = mpsc::channel(1);
        let control_plane = ControlPlane {
            table,
            requests: Mutex::new(recv),
        };
        (control_plane, ControlHandle { requests: send })
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        info!("starting control plane");

        let mut requests = self.requests.lock().await;
        while let Some(request) = requests.recv().await {
            self.handle(request).await;
        }

        info!("all control handles dropped - shutting down control plane");
        Ok(())
    }

    async fn handle(&self, request: ControlRequest) {
        debug!("control request: {:?}", request);

        let delivered = match request {
            ControlRequest::Open { owner, reply } => {
                reply.send(self.table.open(owner).await).is_ok()
            }
            ControlRequest::Bind { id, local, peer, reply } => {
                reply.send(self.table.bind(id, local, peer).await).is_ok()
            }
            ControlRequest::Close { id, reply } => {
                reply.send(self.table.close(id).await).is_ok()
            }
        };

        if !delivered {
            warn!("requester went away before receiving the reply");
        }
    }
}

impl ControlHandle {
    async fn request<T>(&self, create: impl FnOnce(oneshot::Sender<MtpResult<T>>) -> ControlRequest) -> MtpResult<T> {
        let (reply, reply_receiver) = oneshot::channel();
        self.requests.send(create(reply)).await
            .map_err(|_| MtpError::ControlPlaneClosed)?;
        reply_receiver.await
            .map_err(|_| MtpError::ControlPlaneClosed)?
    }

    pub async fn open(&self, owner: OwnerId) -> MtpResult<ConnectionId> {
        self.request(|reply| ControlRequest::Open { owner, reply }).await
    }

    pub async fn bind(&self, id: ConnectionId, local: SocketAddr, peer: SocketAddr) -> MtpResult<()> {
        self.request(|reply| ControlRequest::Bind { id, local, peer, reply }).await
    }

    pub async fn close(&self, id: ConnectionId) -> MtpResult<()> {
        self.request(|reply| ControlRequest::Close { id, reply }).await
    }
}
