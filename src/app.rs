use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rustls::crypto::{CryptoProvider, ring};

use crate::{
    collector::runner::{BatchCollector, CollectorSummary},
    config::Config,
    dispatcher::Dispatcher,
    funnel,
    metrics::METRICS,
    stations::{self, HttpClients, adapter::Station},
    storage::{Storage, demo::DemoStorage, postgres::PgStorage},
};

/// Installs the process-wide rustls `CryptoProvider`.
///
/// IMPORTANT:
/// rustls >= 0.23 requires an explicit provider as soon as more than
/// one is compiled in (reqwest and sqlx pull in different ones).
/// Must run before the first TLS client is built. Calling it again
/// is a no-op.
pub fn install_crypto_provider() {
    let _ = CryptoProvider::install_default(ring::default_provider());
}

/// Everything one pipeline run needs, built once at startup.
///
/// There is no global configuration or connection state: `main`
/// builds this value and hands it to `run`. Only the metrics
/// counters are process-wide.
pub struct PriceMonitor {
    config: Config,
    storage: Arc<dyn Storage>,
    stations: Vec<Arc<dyn Station>>,
}

impl PriceMonitor {
    pub fn new(config: Config, storage: Arc<dyn Storage>, stations: Vec<Arc<dyn Station>>) -> Self {
        Self {
            config,
            storage,
            stations,
        }
    }

    /// Validates the station list and connects the storage backend.
    ///
    /// Fails fast: a malformed identifier or an unreachable database
    /// aborts startup before the first tick.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let clients = HttpClients::new(config.scrape_timeout).context("building HTTP clients")?;
        let stations = stations::parse_station_list(&config.stations, &clients)?;

        if stations.is_empty() {
            log::warn!("PRICEMONITOR_STATIONS is empty, no station will be tracked");
        }
        for station in &stations {
            log::info!("tracking {} station {}", station.brand(), station.identifier());
        }

        let storage: Arc<dyn Storage> = if config.demo {
            log::warn!("demo mode: nothing is written to the database");
            Arc::new(DemoStorage::new())
        } else {
            let pg = PgStorage::connect(
                config.database.connect_options()?,
                config.database.pool_size,
                config.storage_timeout,
            )
            .await
            .with_context(|| {
                format!(
                    "connecting to database {} on {}:{}",
                    config.database.name, config.database.host, config.database.port
                )
            })?;
            pg.ensure_schema().await.context("creating database schema")?;
            Arc::new(pg)
        };

        Ok(Self::new(config, storage, stations))
    }

    /// Runs the pipeline until Ctrl-C.
    pub async fn run(self) -> anyhow::Result<CollectorSummary> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                log::error!("cannot listen for Ctrl-C, running until killed: {err}");
                futures_util::future::pending::<()>().await;
            }
            log::info!("Ctrl-C received, shutting down");
        })
        .await
    }

    /// Runs the pipeline until `shutdown` resolves.
    ///
    /// Shutdown order:
    /// - The dispatcher stops, aborting any scrape still in flight
    /// - With the last funnel sender gone, the collector writes what
    ///   it holds and returns its summary
    pub async fn run_until<S>(self, shutdown: S) -> anyhow::Result<CollectorSummary>
    where
        S: Future<Output = ()>,
    {
        let Self {
            config,
            storage,
            stations,
        } = self;

        let (funnel_tx, funnel_rx) = funnel::channel(config.funnel_capacity);

        let collector = BatchCollector::new(
            storage,
            config.batch_policy(stations.len()),
            config.storage_timeout,
        );
        let collector = tokio::spawn(collector.run(funnel_rx));

        let reporter = config.metrics_interval.map(|every| tokio::spawn(report_metrics(every)));

        let dispatcher = Dispatcher::new(
            stations,
            config.interval,
            config.workers,
            config.scrape_timeout,
        );

        tokio::select! {
            _ = dispatcher.run(funnel_tx) => {}
            _ = shutdown => {}
        }

        let summary = collector.await.context("collector task failed")?;

        if let Some(reporter) = reporter {
            reporter.abort();
        }
        log::info!("[METRICS] {}", METRICS.summary());

        Ok(summary)
    }
}

// ------------------------------------------------------------
// Metrics reporter (periodic, low-noise)
// ------------------------------------------------------------
async fn report_metrics(every: Duration) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately; nothing to report yet.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        log::info!("[METRICS] {}", METRICS.summary());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScrapeError;
    use crate::schema::{Brand, Sample};
    use std::collections::HashMap;

    struct FixedStation {
        identifier: String,
        fuels: usize,
    }

    #[async_trait::async_trait]
    impl Station for FixedStation {
        fn brand(&self) -> Brand {
            Brand::Aral
        }

        fn identifier(&self) -> &str {
            &self.identifier
        }

        async fn scrape_prices(&self) -> Result<Sample, ScrapeError> {
            let prices: HashMap<String, f32> =
                (0..self.fuels).map(|i| (format!("fuel-{i}"), 1.8)).collect();
            Ok(Sample::new(
                Brand::Aral,
                self.identifier.clone(),
                "49.2,7.1".to_string(),
                prices,
            ))
        }
    }

    fn config() -> Config {
        Config::from_lookup(|key| match key {
            "PRICEMONITOR_INTERVAL_SECS" => Some("60".to_string()),
            "PRICEMONITOR_METRICS_INTERVAL_SECS" => Some("0".to_string()),
            _ => None,
        })
        .unwrap()
    }

    fn fixed(identifier: &str, fuels: usize) -> Arc<dyn Station> {
        Arc::new(FixedStation {
            identifier: identifier.to_string(),
            fuels,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn one_round_per_tick_ends_in_count_flushes() {
        let storage = Arc::new(DemoStorage::new());
        let monitor = PriceMonitor::new(
            config(),
            storage.clone(),
            vec![fixed("aral:a/b/1", 3), fixed("aral:a/b/2", 2), fixed("aral:a/b/3", 4)],
        );

        // Ticks at 0s and 60s, shutdown at 90s.
        let summary = monitor
            .run_until(tokio::time::sleep(Duration::from_secs(90)))
            .await
            .unwrap();

        assert_eq!(summary.samples, 6);
        assert_eq!(summary.flushes_count, 2);
        assert_eq!(summary.flushes_shutdown, 0);
        assert_eq!(summary.rows_written, 18);
        assert_eq!(storage.rows_written(), 18);
        assert_eq!(storage.station_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_without_stations_is_clean() {
        let storage = Arc::new(DemoStorage::new());
        let monitor = PriceMonitor::new(config(), storage.clone(), Vec::new());

        let summary = monitor
            .run_until(tokio::time::sleep(Duration::from_secs(5)))
            .await
            .unwrap();

        assert_eq!(summary, CollectorSummary::default());
        assert_eq!(storage.rows_written(), 0);
    }

    #[tokio::test]
    async fn build_rejects_malformed_stations_before_connecting() {
        install_crypto_provider();
        let config = Config::from_lookup(|key| match key {
            "PRICEMONITOR_STATIONS" => Some("shell:not-a-number".to_string()),
            _ => None,
        })
        .unwrap();

        let err = PriceMonitor::build(config).await.err().unwrap();
        assert!(err.to_string().contains("shell:not-a-number"));
    }

    #[tokio::test]
    async fn build_in_demo_mode_needs_no_database() {
        install_crypto_provider();
        let config = Config::from_lookup(|key| match key {
            "PRICEMONITOR_STATIONS" => Some("aral:st-ingbert/ensheimer-strasse-152/18111200".to_string()),
            "PRICEMONITOR_DEMO" => Some("1".to_string()),
            _ => None,
        })
        .unwrap();

        let monitor = PriceMonitor::build(config).await.unwrap();
        assert_eq!(monitor.stations.len(), 1);
    }
}
