use std::path::{Path, PathBuf};
use std::sync::Arc;
use bytes::BytesMut;
use tokio::net::UnixDatagram;
use tracing::{debug, error, info, trace, warn};
use crate::control::ControlHandle;
use crate::error::MtpResult;
use crate::ipc::messages::{IpcRequest, IpcRequestBody, IpcResponse, IpcResponseBody};
use crate::ipc::MAX_IPC_DATAGRAM_LEN;
use crate::table::ConnectionTable;

/// Serves client processes on a Unix datagram socket. Lifecycle requests go through the
///  control plane, sending and receiving go directly to the connection table.
pub struct IpcServer {
    socket: UnixDatagram,
    path: PathBuf,
    control: ControlHandle,
    table: Arc<ConnectionTable>,
}

impl IpcServer {
    /// Binds the server socket, replacing a stale socket file left behind by an earlier run
    pub fn bind(path: impl AsRef<Path>, control: ControlHandle, table: Arc<ConnectionTable>) -> anyhow::Result<IpcServer> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            warn!("removing stale IPC socket {:?}", path);
            std::fs::remove_file(&path)?;
        }

        let socket = UnixDatagram::bind(&path)?;
        info!("IPC server listening on {:?}", path);
        Ok(IpcServer { socket, path, control, table })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; MAX_IPC_DATAGRAM_LEN];
        let mut response_buf = BytesMut::with_capacity(MAX_IPC_DATAGRAM_LEN);

        loop {
            let (len, from) = match self.socket.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(e) => {
                    error!("IPC socket error: {}", e);
                    continue;
                }
            };

            let Some(reply_to) = from.as_pathname() else {
                warn!("IPC request from an unnamed socket - dropping");
                continue;
            };

            let parse_buf = &mut &buf[..len];
            let request = match IpcRequest::deser(parse_buf) {
                Ok(request) => request,
                Err(e) => {
                    warn!("unparsable IPC request from {:?}: {} - dropping", reply_to, e);
                    continue;
                }
            };
            trace!("IPC request from {:?}: {:?}", reply_to, request);

            let response = IpcResponse {
                request_id: request.request_id,
                result: self.handle(request).await,
            };

            response_buf.clear();
            response.ser(&mut response_buf);
            if let Err(e) = self.socket.send_to(&response_buf, reply_to).await {
                debug!("unable to send IPC response to {:?}: {}", reply_to, e);
            }
        }
    }

    async fn handle(&self, request: IpcRequest) -> MtpResult<IpcResponseBody> {
        match request.body {
            IpcRequestBody::Open => {
                let id = self.control.open(request.owner).await?;
                Ok(IpcResponseBody::Opened(id))
            }
            IpcRequestBody::Bind { id, local, peer } => {
                self.control.bind(id, local, peer).await?;
                Ok(IpcResponseBody::Done)
            }
            IpcRequestBody::Send { id, dest, payload } => {
                self.table.send(id, dest, &payload).await?;
                Ok(IpcResponseBody::Done)
            }
            IpcRequestBody::Receive { id } => {
                let payload = self.table.receive(id).await?;
                Ok(IpcResponseBody::Payload(payload))
            }
            IpcRequestBody::Close { id } => {
                self.control.close(id).await?;
                Ok(IpcResponseBody::Done)
            }
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!("unable to remove IPC socket {:?}: {}", self.path, e);
        }
    }
}
