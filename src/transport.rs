use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, trace};

/// A connected datagram socket - the transport handle of a bound connection. This is an
///  abstraction over UDP to facilitate replacing the I/O part for testing.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramSocket: Send + Sync + 'static {
    /// Sends a datagram to the connected peer. Errors are logged rather than returned: the
    ///  protocol treats a failed send like a lost datagram.
    async fn send_datagram(&self, datagram: &[u8]);

    /// Resolves when the socket may have a datagram available for reading
    async fn readable(&self) -> io::Result<()>;

    /// Reads a single datagram without waiting, returning `None` if there is none
    fn try_recv_datagram(&self, buf: &mut [u8]) -> io::Result<Option<usize>>;

    fn local_addr(&self) -> SocketAddr;
    fn peer_addr(&self) -> SocketAddr;
}

/// Creates transport handles when connections are bound
#[async_trait]
pub trait TransportProvider: Send + Sync + 'static {
    async fn bind(&self, local: SocketAddr, peer: SocketAddr) -> io::Result<Arc<dyn DatagramSocket>>;
}

pub struct UdpDatagramSocket {
    socket: UdpSocket,
    local: SocketAddr,
    peer: SocketAddr,
}

#[async_trait]
impl DatagramSocket for UdpDatagramSocket {
    async fn send_datagram(&self, datagram: &[u8]) {
        trace!("UDP socket {:?}: sending {} bytes to {:?}", self.local, datagram.len(), self.peer);

        if let Err(e) = self.socket.send(datagram).await {
            error!("error sending UDP datagram from {:?} to {:?}: {}", self.local, self.peer, e);
        }
    }

    async fn readable(&self) -> io::Result<()> {
        self.socket.readable().await
    }

    fn try_recv_datagram(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.socket.try_recv(buf) {
            Ok(len) => Ok(Some(len)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

pub struct UdpTransport;

#[async_trait]
impl TransportProvider for UdpTransport {
    async fn bind(&self, local: SocketAddr, peer: SocketAddr) -> io::Result<Arc<dyn DatagramSocket>> {
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        let local = socket.local_addr()?;
        info!("bound UDP socket to {:?}, connected to {:?}", local, peer);

        Ok(Arc::new(UdpDatagramSocket { socket, local, peer }))
    }
}

impl Drop for UdpDatagramSocket {
    fn drop(&mut self) {
        debug!("releasing UDP socket {:?}", self.local);
    }
}
