use std::sync::Arc;
use tokio::select;
use tracing::info;
use crate::client::MtpClient;
use crate::config::MtpConfig;
use crate::control::{ControlHandle, ControlPlane};
use crate::engine::receive::ReceiveEngine;
use crate::engine::reclaim::ReclamationEngine;
use crate::engine::send::SendEngine;
use crate::liveness::{LivenessProbe, OwnerId, ProcessLivenessProbe};
use crate::loss::{LossInjector, ProbabilisticLoss};
use crate::table::ConnectionTable;
use crate::transport::{TransportProvider, UdpTransport};

/// An MTP node: the connection table together with the activities that drive it. Nothing
///  happens on the network before [MtpNode::run] is called.
pub struct MtpNode {
    table: Arc<ConnectionTable>,
    control_plane: ControlPlane,
    control: ControlHandle,
    receive_engine: ReceiveEngine,
    send_engine: SendEngine,
    reclamation_engine: ReclamationEngine,
}

impl MtpNode {
    /// A node on UDP sockets, dropping incoming datagrams with the configured probability and
    ///  reclaiming connections of processes that no longer exist
    pub fn new(config: MtpConfig) -> anyhow::Result<MtpNode> {
        let loss = Arc::new(ProbabilisticLoss::new(config.drop_probability));
        MtpNode::with_collaborators(config, Arc::new(UdpTransport), loss, Arc::new(ProcessLivenessProbe))
    }

    pub fn with_collaborators(
        config: MtpConfig,
        transport: Arc<dyn TransportProvider>,
        loss: Arc<dyn LossInjector>,
        probe: Arc<dyn LivenessProbe>,
    ) -> anyhow::Result<MtpNode> {
        config.validate()?;

        let table = Arc::new(ConnectionTable::new(&config, transport));
        let (control_plane, control) = ControlPlane::new(table.clone());

        Ok(MtpNode {
            receive_engine: ReceiveEngine::new(&config, table.clone(), loss),
            send_engine: SendEngine::new(&config, table.clone()),
            reclamation_engine: ReclamationEngine::new(&config, table.clone(), probe),
            table,
            control_plane,
            control,
        })
    }

    pub fn table(&self) -> &Arc<ConnectionTable> {
        &self.table
    }

    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    /// A client whose connections are owned by the current process
    pub fn client(&self) -> MtpClient {
        self.client_for(std::process::id())
    }

    pub fn client_for(&self, owner: OwnerId) -> MtpClient {
        MtpClient::new(owner, self.control(), self.table.clone())
    }

    /// Runs until one of the node's activities fails
    pub async fn run(&self) -> anyhow::Result<()> {
        info!("starting MTP node with {} connection slots", self.table.capacity());

        select! {
            result = self.receive_engine.run() => result,
            result = self.send_engine.run() => result,
            result = self.reclamation_engine.run() => result,
            result = self.control_plane.run() => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use bytes::Bytes;
    use rstest::rstest;
    use tokio::runtime::Builder;
    use crate::client::ConnectionApi;
    use crate::liveness::{Liveness, MockLivenessProbe};
    use crate::test_util::loopback::LoopbackTransport;
    use crate::test_util::test_addr;

    /// Drops every n-th datagram, 0 meaning no loss
    struct EveryNth {
        n: usize,
        count: AtomicUsize,
    }
    impl LossInjector for EveryNth {
        fn should_drop(&self) -> bool {
            let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
            self.n > 0 && count % self.n == 0
        }
    }

    const PAYLOAD_SIZE: usize = 16;

    fn config() -> MtpConfig {
        MtpConfig { payload_size: PAYLOAD_SIZE, ..MtpConfig::default() }
    }

    fn message(i: usize) -> Vec<u8> {
        format!("message {}", i).into_bytes()
    }

    /// Messages arrive zero padded to the payload size
    fn delivered(i: usize) -> Bytes {
        let mut padded = message(i);
        padded.resize(PAYLOAD_SIZE, 0);
        Bytes::from(padded)
    }

    #[rstest]
    #[case::lossless(0, 3)]
    #[case::lossless_many(0, 40)]
    #[case::every_third_lost(3, 20)]
    #[case::every_fifth_lost(5, 40)]
    fn test_transfer(#[case] drop_every: usize, #[case] num_messages: usize) {
        let rt = Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        rt.block_on(async move {
            let loss = Arc::new(EveryNth { n: drop_every, count: AtomicUsize::new(0) });
            let node = MtpNode::with_collaborators(
                config(),
                Arc::new(LoopbackTransport::default()),
                loss,
                Arc::new(ProcessLivenessProbe),
            ).unwrap();
            let client = node.client();

            let transfer = async {
                let a = client.open().await.unwrap();
                let b = client.open().await.unwrap();
                client.bind(a, test_addr(1), test_addr(2)).await.unwrap();
                client.bind(b, test_addr(2), test_addr(1)).await.unwrap();

                let sender = async {
                    for i in 0..num_messages {
                        client.send_with_retry(a, test_addr(2), &message(i)).await.unwrap();
                    }
                };
                let receiver = async {
                    let mut received = Vec::new();
                    for _ in 0..num_messages {
                        received.push(client.receive_with_retry(b).await.unwrap());
                    }
                    received
                };
                let ((), received) = tokio::join!(sender, receiver);

                let expected = (0..num_messages)
                    .map(delivered)
                    .collect::<Vec<_>>();
                assert_eq!(received, expected);
            };

            select! {
                _ = transfer => {}
                r = node.run() => panic!("node terminated: {:?}", r),
            }
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_bidirectional_transfer() {
        let node = MtpNode::with_collaborators(
            config(),
            Arc::new(LoopbackTransport::default()),
            Arc::new(EveryNth { n: 4, count: AtomicUsize::new(0) }),
            Arc::new(ProcessLivenessProbe),
        ).unwrap();
        let client = node.client();

        let exchange = async {
            let a = client.open().await.unwrap();
            let b = client.open().await.unwrap();
            client.bind(a, test_addr(1), test_addr(2)).await.unwrap();
            client.bind(b, test_addr(2), test_addr(1)).await.unwrap();

            let side = |own: usize, peer_addr: std::net::SocketAddr| {
                let client = &client;
                async move {
                    let mut received = Vec::new();
                    for i in 0..12 {
                        client.send_with_retry(own, peer_addr, &message(i)).await.unwrap();
                    }
                    for _ in 0..12 {
                        received.push(client.receive_with_retry(own).await.unwrap());
                    }
                    received
                }
            };
            let (from_b, from_a) = tokio::join!(side(a, test_addr(2)), side(b, test_addr(1)));

            let expected = (0..12).map(delivered).collect::<Vec<_>>();
            assert_eq!(from_b, expected);
            assert_eq!(from_a, expected);
        };

        select! {
            _ = exchange => {}
            r = node.run() => panic!("node terminated: {:?}", r),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_owner_is_reclaimed_while_running() {
        let config = MtpConfig { reclamation_interval: Duration::from_secs(10), ..MtpConfig::default() };
        let mut probe = MockLivenessProbe::new();
        probe.expect_probe()
            .returning(|owner| Ok(if owner == 7 { Liveness::Gone } else { Liveness::Alive }));

        let node = MtpNode::with_collaborators(
            config,
            Arc::new(LoopbackTransport::default()),
            Arc::new(EveryNth { n: 0, count: AtomicUsize::new(0) }),
            Arc::new(probe),
        ).unwrap();

        let scenario = async {
            let dead = node.client_for(7).open().await.unwrap();
            let alive = node.client_for(8).open().await.unwrap();
            node.client_for(7).bind(dead, test_addr(1), test_addr(2)).await.unwrap();

            tokio::time::sleep(Duration::from_secs(11)).await;
            assert!(node.table().is_free(dead).await);
            assert!(!node.table().is_free(alive).await);
        };

        select! {
            _ = scenario => {}
            r = node.run() => panic!("node terminated: {:?}", r),
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = MtpConfig { recv_buffer_size: 8, max_seq_no: 16, ..MtpConfig::default() };
        assert!(MtpNode::new(config).is_err());
    }
}
