use std::net::SocketAddr;
use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::time;
use tracing::trace;
use crate::backoff::RetryBackoff;
use crate::control::ControlHandle;
use crate::error::MtpResult;
use crate::liveness::OwnerId;
use crate::table::{ConnectionId, ConnectionTable};

/// The operations available to applications using MTP connections. `send` and `receive` never
///  wait: they fail with a retryable error if the send buffer is full or no message is
///  available. The `*_with_retry` variants wrap them in a retry loop with backoff.
#[async_trait]
pub trait ConnectionApi: Send + Sync {
    async fn open(&self) -> MtpResult<ConnectionId>;

    async fn bind(&self, id: ConnectionId, local: SocketAddr, peer: SocketAddr) -> MtpResult<()>;

    async fn send(&self, id: ConnectionId, dest: SocketAddr, payload: &[u8]) -> MtpResult<()>;

    async fn receive(&self, id: ConnectionId) -> MtpResult<Bytes>;

    async fn close(&self, id: ConnectionId) -> MtpResult<()>;

    async fn send_with_retry(&self, id: ConnectionId, dest: SocketAddr, payload: &[u8]) -> MtpResult<()> {
        let mut backoff = RetryBackoff::default();
        loop {
            match self.send(id, dest, payload).await {
                Err(e) if e.is_retryable() => {
                    trace!("send on connection {}: {} - retrying", id, e);
                    time::sleep(backoff.next_delay()).await;
                }
                result => return result,
            }
        }
    }

    async fn receive_with_retry(&self, id: ConnectionId) -> MtpResult<Bytes> {
        let mut backoff = RetryBackoff::default();
        loop {
            match self.receive(id).await {
                Err(e) if e.is_retryable() => {
                    time::sleep(backoff.next_delay()).await;
                }
                result => return result,
            }
        }
    }
}

/// Client for code running in the same process as the node
#[derive(Clone)]
pub struct MtpClient {
    owner: OwnerId,
    control: ControlHandle,
    table: Arc<ConnectionTable>,
}

impl MtpClient {
    pub fn new(owner: OwnerId, control: ControlHandle, table: Arc<ConnectionTable>) -> MtpClient {
        MtpClient { owner, control, table }
    }
}

#[async_trait]
impl ConnectionApi for MtpClient {
    async fn open(&self) -> MtpResult<ConnectionId> {
        self.control.open(self.owner).await
    }

    async fn bind(&self, id: ConnectionId, local: SocketAddr, peer: SocketAddr) -> MtpResult<()> {
        self.control.bind(id, local, peer).await
    }

    async fn send(&self, id: ConnectionId, dest: SocketAddr, payload: &[u8]) -> MtpResult<()> {
        self.table.send(id, dest, payload).await?;
        Ok(())
    }

    async fn receive(&self, id: ConnectionId) -> MtpResult<Bytes> {
        self.table.receive(id).await
    }

    async fn close(&self, id: ConnectionId) -> MtpResult<()> {
        self.control.close(id).await
    }
}
