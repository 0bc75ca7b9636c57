use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::net::UnixDatagram;
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, warn};
use crate::client::ConnectionApi;
use crate::error::{MtpError, MtpResult};
use crate::ipc::messages::{IpcRequest, IpcRequestBody, IpcResponse, IpcResponseBody};
use crate::ipc::MAX_IPC_DATAGRAM_LEN;
use crate::liveness::OwnerId;
use crate::table::ConnectionId;

/// Client for processes talking to a node through its IPC server. Requests are sent one at a
///  time, and the connections it opens are owned by the calling process.
pub struct IpcClient {
    socket: UnixDatagram,
    path: PathBuf,
    server_path: PathBuf,
    owner: OwnerId,
    next_request_id: AtomicU32,
    in_flight: Mutex<()>,
    response_timeout: Duration,
}

impl IpcClient {
    pub fn connect(server_path: impl AsRef<Path>, client_path: impl AsRef<Path>) -> anyhow::Result<IpcClient> {
        let path = client_path.as_ref().to_path_buf();
        let socket = UnixDatagram::bind(&path)?;

        Ok(IpcClient {
            socket,
            path,
            server_path: server_path.as_ref().to_path_buf(),
            owner: std::process::id(),
            next_request_id: AtomicU32::new(1),
            in_flight: Mutex::new(()),
            response_timeout: Duration::from_secs(5),
        })
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    async fn request(&self, body: IpcRequestBody) -> MtpResult<IpcResponseBody> {
        let _in_flight = self.in_flight.lock().await;

        let request = IpcRequest {
            request_id: self.next_request_id.fetch_add(1, Ordering::Relaxed),
            owner: self.owner,
            body,
        };
        let mut buf = BytesMut::new();
        request.ser(&mut buf);
        self.socket.send_to(&buf, &self.server_path).await?;

        let mut response_buf = vec![0u8; MAX_IPC_DATAGRAM_LEN];
        loop {
            let len = match time::timeout(self.response_timeout, self.socket.recv(&mut response_buf)).await {
                Ok(len) => len?,
                Err(_) => return Err(MtpError::Transport(format!("no response from {:?} within {:?}", self.server_path, self.response_timeout))),
            };

            let parse_buf = &mut &response_buf[..len];
            let response = IpcResponse::deser(parse_buf)
                .map_err(|e| MtpError::Transport(format!("unparsable response: {}", e)))?;

            if response.request_id != request.request_id {
                debug!("skipping response to earlier request {}", response.request_id);
                continue;
            }
            return response.result;
        }
    }
}

fn unexpected(body: IpcResponseBody) -> MtpError {
    MtpError::Transport(format!("unexpected response {:?}", body))
}

#[async_trait]
impl ConnectionApi for IpcClient {
    async fn open(&self) -> MtpResult<ConnectionId> {
        match self.request(IpcRequestBody::Open).await? {
            IpcResponseBody::Opened(id) => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    async fn bind(&self, id: ConnectionId, local: SocketAddr, peer: SocketAddr) -> MtpResult<()> {
        match self.request(IpcRequestBody::Bind { id, local, peer }).await? {
            IpcResponseBody::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn send(&self, id: ConnectionId, dest: SocketAddr, payload: &[u8]) -> MtpResult<()> {
        let payload = Bytes::copy_from_slice(payload);
        match self.request(IpcRequestBody::Send { id, dest, payload }).await? {
            IpcResponseBody::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn receive(&self, id: ConnectionId) -> MtpResult<Bytes> {
        match self.request(IpcRequestBody::Receive { id }).await? {
            IpcResponseBody::Payload(payload) => Ok(payload),
            other => Err(unexpected(other)),
        }
    }

    async fn close(&self, id: ConnectionId) -> MtpResult<()> {
        match self.request(IpcRequestBody::Close { id }).await? {
            IpcResponseBody::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

impl Drop for IpcClient {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("unable to remove client socket {:?}: {}", self.path, e);
        }
    }
}
