use std::future::poll_fn;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;
use bytes::Bytes;
use tokio::{select, time};
use tracing::{debug, info, trace, trace_span, Instrument};
use crate::config::MtpConfig;
use crate::loss::LossInjector;
use crate::table::{ActiveConnection, ConnectionTable};
use crate::wire::{AckInfo, Datagram};

/// Processes incoming datagrams for all bound connections: acks update the send side, data
///  goes into the receive side and is acknowledged. Connections that advertised a full receive
///  buffer get window updates once the application frees space.
pub struct ReceiveEngine {
    table: Arc<ConnectionTable>,
    loss: Arc<dyn LossInjector>,
    poll_timeout: Duration,
    max_datagram_len: usize,
}

impl ReceiveEngine {
    pub fn new(config: &MtpConfig, table: Arc<ConnectionTable>, loss: Arc<dyn LossInjector>) -> ReceiveEngine {
        ReceiveEngine {
            table,
            loss,
            poll_timeout: config.poll_timeout,
            max_datagram_len: Datagram::HEADER_LEN + config.payload_size,
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        info!("starting receive engine");

        let mut buf = vec![0u8; self.max_datagram_len];
        loop {
            self.poll_cycle(&mut buf).await;
        }
    }

    /// Waits (bounded by the poll timeout) until any connection has input, and then services
    ///  every bound connection once.
    ///
    /// Freeing a connection ends the wait, and connections are looked up again afterwards, so
    ///  that a freed connection's transport handle is released and its input is not processed.
    pub async fn poll_cycle(&self, buf: &mut [u8]) {
        {
            let detached = self.table.detached();
            let waiting_on = self.table.active_connections().await;

            select! {
                _ = Self::any_readable(&waiting_on) => {}
                _ = detached => debug!("a connection was freed - interrupting the wait for input"),
                _ = time::sleep(self.poll_timeout) => trace!("no input within {:?}", self.poll_timeout),
            }
        }

        for connection in &self.table.active_connections().await {
            self.service_connection(connection, buf)
                .instrument(trace_span!("connection", id = connection.id))
                .await;
        }
    }

    async fn any_readable(connections: &[ActiveConnection]) {
        let mut pending = connections.iter()
            .map(|c| c.binding.socket.readable())
            .collect::<Vec<_>>();

        poll_fn(|cx| {
            for readable in pending.iter_mut() {
                if readable.as_mut().poll(cx).is_ready() {
                    return Poll::Ready(());
                }
            }
            Poll::Pending
        }).await
    }

    async fn service_connection(&self, connection: &ActiveConnection, buf: &mut [u8]) {
        let len = match connection.binding.socket.try_recv_datagram(buf) {
            Ok(Some(len)) => len,
            Ok(None) => {
                self.probe_window(connection).await;
                return;
            }
            Err(e) => {
                debug!("error reading from {:?}: {}", connection.binding.local, e);
                self.probe_window(connection).await;
                return;
            }
        };

        if self.loss.should_drop() {
            debug!("simulated loss: dropping incoming datagram");
            return;
        }

        let parse_buf = &mut &buf[..len];
        let datagram = match Datagram::deser(parse_buf) {
            Ok(datagram) => datagram,
            Err(e) => {
                debug!("received undecodable datagram ({}) - dropping", e);
                return;
            }
        };
        trace!("received {:?}", datagram);

        match datagram {
            Datagram::Ack(ack) => {
                let outcome = connection.state.send.lock().await
                    .on_ack(ack);
                trace!("ack {:?}: {:?}", ack, outcome);
            }
            Datagram::Data { seq_no, payload } => self.on_data(connection, seq_no, payload).await,
        }
    }

    async fn on_data(&self, connection: &ActiveConnection, seq_no: usize, payload: Bytes) {
        let (accepted, ack) = connection.state.recv.lock().await
            .on_data(seq_no, payload);
        if !accepted {
            debug!("discarded message #{}", seq_no);
        }
        Self::send_ack(connection, ack).await;
    }

    async fn probe_window(&self, connection: &ActiveConnection) {
        let window_update = connection.state.recv.lock().await
            .window_update_probe();

        if let Some(ack) = window_update {
            debug!("receive buffer has space again - sending window update {:?}", ack);
            Self::send_ack(connection, ack).await;
        }
    }

    async fn send_ack(connection: &ActiveConnection, ack: AckInfo) {
        connection.binding.socket
            .send_datagram(&Datagram::Ack(ack).to_bytes())
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::OwnerId;
    use crate::loss::{MockLossInjector, ProbabilisticLoss};
    use crate::test_util::loopback::LoopbackTransport;
    use crate::test_util::test_addr;
    use crate::error::MtpError;
    use tokio::runtime::Builder;

    const OWNER: OwnerId = 1;

    fn ack(seq_no: usize, empty_space: usize) -> Datagram {
        Datagram::Ack(AckInfo { seq_no, empty_space })
    }

    fn data(seq_no: usize) -> Datagram {
        Datagram::Data { seq_no, payload: Bytes::from(vec![seq_no as u8; 4]) }
    }

    async fn setup(loss: Arc<dyn LossInjector>) -> (ReceiveEngine, Arc<ConnectionTable>, Arc<LoopbackTransport>, usize) {
        let config = MtpConfig {
            table_size: 2,
            payload_size: 4,
            ..MtpConfig::default()
        };
        let transport = Arc::new(LoopbackTransport::default());
        let table = Arc::new(ConnectionTable::new(&config, transport.clone()));

        let id = table.open(OWNER).await.unwrap();
        table.bind(id, test_addr(1), test_addr(2)).await.unwrap();

        (ReceiveEngine::new(&config, table.clone(), loss), table, transport, id)
    }

    #[test]
    fn test_data_is_buffered_and_acked() {
        let rt = Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(async {
            let (engine, table, transport, id) = setup(Arc::new(ProbabilisticLoss::new(0.0))).await;
            let mut buf = vec![0u8; 6];

            transport.inject(test_addr(1), &data(2));
            engine.poll_cycle(&mut buf).await;
            assert_eq!(transport.take_sent_from(test_addr(1)), vec![ack(0, 4)]);
            assert_eq!(table.receive(id).await, Err(MtpError::NoMessage));

            transport.inject(test_addr(1), &data(1));
            engine.poll_cycle(&mut buf).await;
            assert_eq!(transport.take_sent_from(test_addr(1)), vec![ack(2, 3)]);
            assert_eq!(table.receive(id).await, Ok(Bytes::from(vec![1u8; 4])));
            assert_eq!(table.receive(id).await, Ok(Bytes::from(vec![2u8; 4])));
        });
    }

    #[test]
    fn test_one_datagram_per_connection_and_cycle() {
        let rt = Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(async {
            let (engine, _, transport, _) = setup(Arc::new(ProbabilisticLoss::new(0.0))).await;
            let mut buf = vec![0u8; 6];

            transport.inject(test_addr(1), &data(1));
            transport.inject(test_addr(1), &data(2));
            engine.poll_cycle(&mut buf).await;
            assert_eq!(transport.take_sent_from(test_addr(1)), vec![ack(1, 4)]);
            engine.poll_cycle(&mut buf).await;
            assert_eq!(transport.take_sent_from(test_addr(1)), vec![ack(2, 3)]);
        });
    }

    #[test]
    fn test_rejected_data_is_acked() {
        let rt = Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(async {
            let (engine, table, transport, id) = setup(Arc::new(ProbabilisticLoss::new(0.0))).await;
            let mut buf = vec![0u8; 6];

            transport.inject(test_addr(1), &data(9));
            engine.poll_cycle(&mut buf).await;
            assert_eq!(transport.take_sent_from(test_addr(1)), vec![ack(0, 5)]);
            assert_eq!(table.receive(id).await, Err(MtpError::NoMessage));
        });
    }

    #[test]
    fn test_ack_updates_send_side() {
        let rt = Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(async {
            let (engine, table, transport, id) = setup(Arc::new(ProbabilisticLoss::new(0.0))).await;
            let mut buf = vec![0u8; 6];

            for _ in 0..3 {
                table.send(id, test_addr(2), b"abc").await.unwrap();
            }
            let state = table.active_connections().await[0].state.clone();
            state.send.lock().await.collect_transmissions(time::Instant::now(), Duration::from_secs(5));

            transport.inject(test_addr(1), &ack(2, 1));
            engine.poll_cycle(&mut buf).await;

            let send = state.send.lock().await;
            assert_eq!(send.buffered_seq_nos(), vec![3]);
            assert_eq!(send.usable_width(), 1);
            assert!(transport.take_sent_from(test_addr(1)).is_empty());
        });
    }

    #[test]
    fn test_window_update_after_drain() {
        let rt = Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(async {
            let (engine, table, transport, id) = setup(Arc::new(ProbabilisticLoss::new(0.0))).await;
            let mut buf = vec![0u8; 6];

            for seq_no in 1..=5 {
                transport.inject(test_addr(1), &data(seq_no));
                engine.poll_cycle(&mut buf).await;
            }
            assert_eq!(transport.take_sent_from(test_addr(1)).last(), Some(&ack(5, 0)));

            // no input, no space: nothing to announce
            engine.poll_cycle(&mut buf).await;
            assert!(transport.take_sent_from(test_addr(1)).is_empty());

            table.receive(id).await.unwrap();
            engine.poll_cycle(&mut buf).await;
            assert_eq!(transport.take_sent_from(test_addr(1)), vec![ack(5, 1)]);
        });
    }

    #[test]
    fn test_window_update_waits_for_poll_timeout() {
        let rt = Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(async {
            let (engine, table, transport, id) = setup(Arc::new(ProbabilisticLoss::new(0.0))).await;
            let mut buf = vec![0u8; 6];
            for seq_no in 1..=5 {
                transport.inject(test_addr(1), &data(seq_no));
                engine.poll_cycle(&mut buf).await;
            }
            transport.take_sent_from(test_addr(1));
            table.receive(id).await.unwrap();

            let start = time::Instant::now();
            engine.poll_cycle(&mut buf).await;
            assert_eq!(start.elapsed(), Duration::from_secs(4));
            assert_eq!(transport.take_sent_from(test_addr(1)), vec![ack(5, 1)]);
        });
    }

    #[test]
    fn test_dropped_datagram_is_not_processed() {
        let rt = Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(async {
            let (engine, table, transport, id) = setup(Arc::new(ProbabilisticLoss::new(1.0))).await;
            let mut buf = vec![0u8; 6];

            transport.inject(test_addr(1), &data(1));
            engine.poll_cycle(&mut buf).await;

            assert!(transport.take_sent_from(test_addr(1)).is_empty());
            assert_eq!(table.receive(id).await, Err(MtpError::NoMessage));
        });
    }

    #[test]
    fn test_loss_is_decided_per_datagram() {
        let rt = Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(async {
            let mut loss = MockLossInjector::new();
            let mut decisions = vec![false, true].into_iter();
            loss.expect_should_drop()
                .times(2)
                .returning(move || decisions.next().unwrap());

            let (engine, table, transport, id) = setup(Arc::new(loss)).await;
            let mut buf = vec![0u8; 6];

            transport.inject(test_addr(1), &data(1));
            transport.inject(test_addr(1), &data(2));
            engine.poll_cycle(&mut buf).await;
            engine.poll_cycle(&mut buf).await;

            assert_eq!(transport.take_sent_from(test_addr(1)), vec![ack(1, 4)]);
            assert!(table.receive(id).await.is_ok());
            assert_eq!(table.receive(id).await, Err(MtpError::NoMessage));
        });
    }

    #[test]
    fn test_undecodable_datagram_is_dropped() {
        let rt = Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(async {
            let (engine, _, transport, _) = setup(Arc::new(ProbabilisticLoss::new(0.0))).await;
            let mut buf = vec![0u8; 6];

            transport.inject_raw(test_addr(1), Bytes::from_static(b"Xyz"));
            engine.poll_cycle(&mut buf).await;
            assert!(transport.take_sent_from(test_addr(1)).is_empty());
        });
    }

    #[test]
    fn test_close_during_wait_releases_connection() {
        let rt = Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(async {
            let (engine, table, transport, id) = setup(Arc::new(ProbabilisticLoss::new(0.0))).await;
            let mut buf = vec![0u8; 6];

            let started = time::Instant::now();
            let cycle = engine.poll_cycle(&mut buf);
            let close_and_reopen = async {
                tokio::task::yield_now().await;
                table.close(id).await.unwrap();
                for _ in 0..2 {
                    tokio::task::yield_now().await;
                }

                assert!(!transport.is_bound(test_addr(1)));
                let reopened = table.open(OWNER + 1).await.unwrap();
                table.bind(reopened, test_addr(1), test_addr(2)).await.unwrap();
                reopened
            };
            let ((), reopened) = tokio::join!(cycle, close_and_reopen);
            assert_eq!(reopened, id);
            assert!(time::Instant::now() - started < Duration::from_secs(4));

            transport.inject(test_addr(1), &data(1));
            engine.poll_cycle(&mut buf).await;
            assert_eq!(transport.take_sent_from(test_addr(1)), vec![ack(1, 4)]);
            assert_eq!(table.receive(reopened).await, Ok(Bytes::from(vec![1u8; 4])));
        });
    }
}
