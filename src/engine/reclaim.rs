use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info};
use crate::config::MtpConfig;
use crate::liveness::LivenessProbe;
use crate::table::ConnectionTable;

/// Periodically frees connections whose owning process is gone. Terminates with an error if
///  an owner's liveness can not be determined.
pub struct ReclamationEngine {
    table: Arc<ConnectionTable>,
    probe: Arc<dyn LivenessProbe>,
    interval: Duration,
}

impl ReclamationEngine {
    pub fn new(config: &MtpConfig, table: Arc<ConnectionTable>, probe: Arc<dyn LivenessProbe>) -> ReclamationEngine {
        ReclamationEngine {
            table,
            probe,
            interval: config.reclamation_interval,
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        info!("starting reclamation engine with an interval of {:?}", self.interval);

        let mut ticks = time::interval_at(time::Instant::now() + self.interval, self.interval);
        loop {
            ticks.tick().await;

            match self.table.reclaim_dead_owners(self.probe.as_ref()).await {
                Ok(reclaimed) if reclaimed.is_empty() => {}
                Ok(reclaimed) => info!("reclaimed connections {:?}", reclaimed),
                Err(e) => {
                    error!("stopping reclamation: {}", e);
                    return Err(e);
                }
            }
        }
    }
}
