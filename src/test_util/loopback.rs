use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use crate::transport::{DatagramSocket, TransportProvider};
use crate::wire::Datagram;

/// An in-memory datagram network for tests. Sockets bound through the same transport can reach
///  each other by address, and every datagram sent is recorded for inspection.
#[derive(Default)]
pub struct LoopbackTransport {
    network: Arc<Network>,
}

#[derive(Default)]
struct Network {
    inboxes: Mutex<HashMap<SocketAddr, Arc<Inbox>>>,
    sent: Mutex<Vec<(SocketAddr, Bytes)>>,
}

#[derive(Default)]
struct Inbox {
    queue: Mutex<VecDeque<Bytes>>,
    notify: Notify,
}
impl Inbox {
    fn push(&self, datagram: Bytes) {
        self.queue.lock().unwrap().push_back(datagram);
        self.notify.notify_waiters();
    }
}

impl LoopbackTransport {
    pub fn is_bound(&self, addr: SocketAddr) -> bool {
        self.network.inboxes.lock().unwrap().contains_key(&addr)
    }

    /// Delivers a datagram to the socket bound to `to` as if it came from the network
    pub fn inject(&self, to: SocketAddr, datagram: &Datagram) {
        self.inject_raw(to, datagram.to_bytes());
    }

    pub fn inject_raw(&self, to: SocketAddr, datagram: Bytes) {
        let inbox = self.network.inboxes.lock().unwrap().get(&to).cloned()
            .expect("no socket bound to target address");
        inbox.push(datagram);
    }

    /// All datagrams sent from `from` since the last call, decoded
    pub fn take_sent_from(&self, from: SocketAddr) -> Vec<Datagram> {
        let mut sent = self.network.sent.lock().unwrap();
        let (matching, rest) = sent.drain(..).partition::<Vec<_>, _>(|(addr, _)| *addr == from);
        *sent = rest;

        matching.into_iter()
            .map(|(_, raw)| Datagram::deser(&mut raw.as_ref()).unwrap())
            .collect()
    }
}

#[async_trait]
impl TransportProvider for LoopbackTransport {
    async fn bind(&self, local: SocketAddr, peer: SocketAddr) -> io::Result<Arc<dyn DatagramSocket>> {
        let mut inboxes = self.network.inboxes.lock().unwrap();
        if inboxes.contains_key(&local) {
            return Err(io::Error::from(io::ErrorKind::AddrInUse));
        }

        let inbox = Arc::new(Inbox::default());
        inboxes.insert(local, inbox.clone());
        Ok(Arc::new(LoopbackSocket {
            network: self.network.clone(),
            inbox,
            local,
            peer,
        }))
    }
}

pub struct LoopbackSocket {
    network: Arc<Network>,
    inbox: Arc<Inbox>,
    local: SocketAddr,
    peer: SocketAddr,
}

#[async_trait]
impl DatagramSocket for LoopbackSocket {
    async fn send_datagram(&self, datagram: &[u8]) {
        let datagram = Bytes::copy_from_slice(datagram);
        self.network.sent.lock().unwrap().push((self.local, datagram.clone()));

        let target = self.network.inboxes.lock().unwrap().get(&self.peer).cloned();
        if let Some(target) = target {
            target.push(datagram);
        }
    }

    async fn readable(&self) -> io::Result<()> {
        loop {
            let notified = self.inbox.notify.notified();
            if !self.inbox.queue.lock().unwrap().is_empty() {
                return Ok(());
            }
            notified.await;
        }
    }

    fn try_recv_datagram(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let Some(datagram) = self.inbox.queue.lock().unwrap().pop_front() else {
            return Ok(None);
        };
        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Ok(Some(len))
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Drop for LoopbackSocket {
    fn drop(&mut self) {
        let mut inboxes = self.network.inboxes.lock().unwrap();
        if inboxes.get(&self.local).is_some_and(|inbox| Arc::ptr_eq(inbox, &self.inbox)) {
            inboxes.remove(&self.local);
        }
    }
}
