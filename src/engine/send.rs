use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, trace};
use crate::config::MtpConfig;
use crate::table::ConnectionTable;

/// Periodically transmits due data on all bound connections: new messages within the peer's
///  window, and the entire window when an ack is overdue.
pub struct SendEngine {
    table: Arc<ConnectionTable>,
    interval: Duration,
    retransmit_timeout: Duration,
}

impl SendEngine {
    pub fn new(config: &MtpConfig, table: Arc<ConnectionTable>) -> SendEngine {
        SendEngine {
            table,
            interval: config.send_interval(),
            retransmit_timeout: config.retransmit_timeout,
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        info!("starting send engine with an interval of {:?}", self.interval);

        let mut ticks = time::interval(self.interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            self.send_pass().await;
        }
    }

    /// Services every bound connection once
    pub async fn send_pass(&self) {
        let now = Instant::now();

        for connection in self.table.active_connections().await {
            let due = connection.state.send.lock().await
                .collect_transmissions(now, self.retransmit_timeout);

            for datagram in due {
                trace!("connection {}: sending {:?}", connection.id, datagram);
                connection.binding.socket
                    .send_datagram(&datagram.to_bytes())
                    .await;
            }
        }
    }
}
