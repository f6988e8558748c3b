// Periodic sampling loop feeding the Prometheus exporter

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::prom::CounterExporter;

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub interval: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

pub struct CounterCollector {
    config: CollectorConfig,
    exporter: Arc<CounterExporter>,
}

impl CounterCollector {
    pub fn new(config: CollectorConfig, exporter: Arc<CounterExporter>) -> Self {
        Self { config, exporter }
    }

    pub fn exporter(&self) -> Arc<CounterExporter> {
        Arc::clone(&self.exporter)
    }

    /// Start the collection loop; it stops once `cancel_token` fires
    pub fn start(self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tracing::info!(
            "Starting uncore counter collection every {:?}",
            self.config.interval
        );

        tokio::spawn(async move {
            self.collection_loop(cancel_token).await;
        })
    }

    async fn collection_loop(self, cancel_token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    tracing::info!("Collection loop cancelled");
                    break;
                }
                _ = interval.tick() => {
                    self.exporter.collect().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::sim::{SimBus, SimDevice, SimMsr};
    use crate::uncore::{select_platform, PlatformId, Uncore};
    use uncore_raw::arch::haswell_ep::msr;

    #[tokio::test]
    async fn test_loop_collects_until_cancelled() {
        let profile = select_platform(PlatformId::HaswellEp);
        let regs = Arc::new(SimMsr::new());
        regs.set(msr::pcu::CTR0, 3);
        let uncore: Uncore<Arc<SimMsr>, SimDevice> =
            Uncore::enumerate(profile, Arc::clone(&regs), &SimBus::new()).unwrap();
        let exporter = Arc::new(CounterExporter::new(Arc::new(uncore)));

        let config = CollectorConfig {
            interval: Duration::from_millis(10),
        };
        let cancel_token = CancellationToken::new();
        let handle = CounterCollector::new(config, Arc::clone(&exporter)).start(cancel_token.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_token.cancel();
        handle.await.unwrap();

        assert!(!exporter.registry().gather().is_empty());
    }
}
