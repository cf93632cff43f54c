use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

use crate::{
    error::ScrapeError,
    funnel::FunnelSender,
    metrics::METRICS,
    stations::adapter::Station,
};

/// Outcome of one dispatch round.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Stations put on the work queue
    pub scheduled: usize,
    /// Samples handed to the funnel
    pub emitted: usize,
    /// Scrapes that failed, timed out or could not be emitted
    pub failed: usize,
}

impl std::ops::AddAssign for TickReport {
    fn add_assign(&mut self, other: Self) {
        self.scheduled += other.scheduled;
        self.emitted += other.emitted;
        self.failed += other.failed;
    }
}

/// Entry of the per-tick work queue.
enum Job {
    Scrape(Arc<dyn Station>),
    Stop,
}

type WorkQueue = Arc<Mutex<mpsc::UnboundedReceiver<Job>>>;

/// Periodic fan-out of scrape jobs over a bounded worker pool.
///
/// Every tick:
/// - Spawns exactly `pool_size` workers
/// - Queues every configured station, then one stop signal per worker
/// - Waits for all workers before the next tick may start
///
/// GUARANTEES:
/// - At most `pool_size` scrapes are in flight
/// - Ticks never overlap, so a station is never fetched concurrently
/// - A failing or panicking scrape never affects the other stations
///
/// Ticks are fixed-rate, measured from the start of the previous
/// dispatch. A tick that overruns the interval is followed by the next
/// one right away.
///
pub struct Dispatcher {
    stations: Vec<Arc<dyn Station>>,
    interval: Duration,
    pool_size: usize,
    scrape_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        stations: Vec<Arc<dyn Station>>,
        interval: Duration,
        pool_size: usize,
        scrape_timeout: Duration,
    ) -> Self {
        Self {
            stations,
            interval,
            pool_size: pool_size.max(1),
            scrape_timeout,
        }
    }

    /// Dispatches forever; the first tick fires immediately.
    ///
    /// Dropping this future aborts the workers of the running tick,
    /// which releases their funnel senders.
    pub async fn run(self, funnel: FunnelSender) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!(
            "dispatching {} stations every {:?} with {} workers",
            self.stations.len(),
            self.interval,
            self.pool_size
        );

        loop {
            ticker.tick().await;
            METRICS.ticks.fetch_add(1, Ordering::Relaxed);

            let started = Instant::now();
            let report = self.run_tick(&funnel).await;

            log::info!(
                "tick done in {} ms: scheduled={} emitted={} failed={}",
                started.elapsed().as_millis(),
                report.scheduled,
                report.emitted,
                report.failed
            );
        }
    }

    /// Runs one dispatch round and waits for all of its workers.
    pub async fn run_tick(&self, funnel: &FunnelSender) -> TickReport {
        if self.stations.is_empty() {
            return TickReport::default();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let queue: WorkQueue = Arc::new(Mutex::new(rx));

        let mut workers = JoinSet::new();
        for worker in 0..self.pool_size {
            workers.spawn(run_worker(
                worker,
                queue.clone(),
                funnel.clone(),
                self.scrape_timeout,
            ));
        }

        // The receiver lives as long as any worker, and the workers
        // only stop after draining their stop signal, so sends cannot fail.
        for station in &self.stations {
            let _ = tx.send(Job::Scrape(station.clone()));
        }
        for _ in 0..self.pool_size {
            let _ = tx.send(Job::Stop);
        }
        drop(tx);

        let mut report = TickReport {
            scheduled: self.stations.len(),
            ..TickReport::default()
        };

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(worker_report) => report += worker_report,
                Err(err) => {
                    // Scraper panics are caught per job; this is a panic
                    // outside a scrape, and the job it held is lost.
                    report.failed += 1;
                    METRICS.scrape_errors.fetch_add(1, Ordering::Relaxed);
                    log::error!("worker died: {err}");
                }
            }
        }

        report
    }
}

/// One pool worker: pulls jobs until it receives `Stop`.
async fn run_worker(
    worker: usize,
    queue: WorkQueue,
    funnel: FunnelSender,
    scrape_timeout: Duration,
) -> TickReport {
    let mut report = TickReport::default();

    loop {
        // Hold the lock only while waiting for the next job.
        let job = queue.lock().await.recv().await;

        let station = match job {
            Some(Job::Scrape(station)) => station,
            Some(Job::Stop) | None => break,
        };

        match scrape(station.as_ref(), scrape_timeout).await {
            Ok(sample) => {
                METRICS.scrapes_ok.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "worker {worker}: {} delivered {} prices",
                    station.identifier(),
                    sample.prices.len()
                );

                match funnel.emit(sample).await {
                    Ok(()) => report.emitted += 1,
                    Err(err) => {
                        report.failed += 1;
                        log::warn!("worker {worker}: dropping sample of {}: {err}", station.identifier());
                    }
                }
            }
            Err(err) => {
                report.failed += 1;
                if matches!(err, ScrapeError::Timeout(_)) {
                    METRICS.scrape_timeouts.fetch_add(1, Ordering::Relaxed);
                } else {
                    METRICS.scrape_errors.fetch_add(1, Ordering::Relaxed);
                }
                log::warn!("worker {worker}: scraping {} failed: {err}", station.identifier());
            }
        }
    }

    report
}

/// Scrapes one station, bounded by `scrape_timeout`.
///
/// A panic inside the scraper is caught here and reported as a
/// `ScrapeError`, so the worker keeps draining the queue.
async fn scrape(
    station: &dyn Station,
    scrape_timeout: Duration,
) -> Result<crate::schema::Sample, ScrapeError> {
    let guarded = AssertUnwindSafe(station.scrape_prices()).catch_unwind();

    match tokio::time::timeout(scrape_timeout, guarded).await {
        Ok(Ok(result)) => result,
        Ok(Err(payload)) => Err(ScrapeError::Panicked(panic_message(payload.as_ref()))),
        Err(_) => Err(ScrapeError::Timeout(scrape_timeout)),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funnel::{self, FunnelReceiver};
    use crate::schema::{Brand, Sample};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    enum Behavior {
        Deliver(usize),
        Fail,
        Hang,
        Panic,
    }

    struct FakeStation {
        identifier: String,
        behavior: Behavior,
        delay: Duration,
        calls: AtomicUsize,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
    }

    impl FakeStation {
        fn new(identifier: &str, behavior: Behavior) -> Self {
            Self {
                identifier: identifier.to_string(),
                behavior,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                in_flight: Arc::new(AtomicUsize::new(0)),
                max_in_flight: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait::async_trait]
    impl Station for FakeStation {
        fn brand(&self) -> Brand {
            Brand::Shell
        }

        fn identifier(&self) -> &str {
            &self.identifier
        }

        async fn scrape_prices(&self) -> Result<Sample, ScrapeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match self.behavior {
                Behavior::Deliver(fuels) => {
                    let prices: HashMap<String, f32> =
                        (0..fuels).map(|i| (format!("fuel-{i}"), 1.7)).collect();
                    Ok(Sample::new(Brand::Shell, self.identifier.clone(), "1,2".into(), prices))
                }
                Behavior::Fail => Err(ScrapeError::MissingElement("price table")),
                Behavior::Hang => std::future::pending().await,
                Behavior::Panic => panic!("markup changed"),
            }
        }
    }

    fn stations(fakes: Vec<FakeStation>) -> Vec<Arc<dyn Station>> {
        fakes
            .into_iter()
            .map(|s| Arc::new(s) as Arc<dyn Station>)
            .collect()
    }

    fn drain(rx: &mut FunnelReceiver) -> Vec<Sample> {
        let mut out = Vec::new();
        while let Some(Some(sample)) = rx_try(rx) {
            out.push(sample);
        }
        out
    }

    // Non-blocking receive: `None` once nothing is ready.
    fn rx_try(rx: &mut FunnelReceiver) -> Option<Option<Sample>> {
        use futures_util::FutureExt;
        rx.recv().now_or_never()
    }

    #[tokio::test]
    async fn every_station_is_scraped_once_per_tick() {
        let dispatcher = Dispatcher::new(
            stations(vec![
                FakeStation::new("shell:1-a", Behavior::Deliver(2)),
                FakeStation::new("shell:2-b", Behavior::Deliver(3)),
                FakeStation::new("shell:3-c", Behavior::Deliver(1)),
            ]),
            Duration::from_secs(60),
            2,
            Duration::from_secs(5),
        );
        let (tx, mut rx) = funnel::channel(8);

        let report = dispatcher.run_tick(&tx).await;

        assert_eq!(
            report,
            TickReport {
                scheduled: 3,
                emitted: 3,
                failed: 0
            }
        );
        let mut addresses: Vec<String> = drain(&mut rx).into_iter().map(|s| s.address).collect();
        addresses.sort();
        assert_eq!(addresses, vec!["shell:1-a", "shell:2-b", "shell:3-c"]);
    }

    #[tokio::test]
    async fn failing_station_does_not_block_the_others() {
        let dispatcher = Dispatcher::new(
            stations(vec![
                FakeStation::new("shell:1-a", Behavior::Deliver(2)),
                FakeStation::new("shell:2-broken", Behavior::Fail),
                FakeStation::new("shell:3-c", Behavior::Deliver(2)),
            ]),
            Duration::from_secs(60),
            1,
            Duration::from_secs(5),
        );
        let (tx, mut rx) = funnel::channel(8);

        let report = dispatcher.run_tick(&tx).await;

        assert_eq!(report.emitted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn panicking_scrape_is_contained() {
        let dispatcher = Dispatcher::new(
            stations(vec![
                FakeStation::new("shell:1-a", Behavior::Panic),
                FakeStation::new("shell:2-b", Behavior::Deliver(1)),
                FakeStation::new("shell:3-c", Behavior::Deliver(1)),
            ]),
            Duration::from_secs(60),
            3,
            Duration::from_secs(5),
        );
        let (tx, mut rx) = funnel::channel(8);

        let report = dispatcher.run_tick(&tx).await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.emitted, 2);
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn panicking_scrape_does_not_stop_a_single_worker() {
        let dispatcher = Dispatcher::new(
            stations(vec![
                FakeStation::new("shell:1-a", Behavior::Panic),
                FakeStation::new("shell:2-b", Behavior::Deliver(1)),
                FakeStation::new("shell:3-c", Behavior::Deliver(1)),
            ]),
            Duration::from_secs(60),
            1,
            Duration::from_secs(5),
        );
        let (tx, mut rx) = funnel::channel(8);

        let report = dispatcher.run_tick(&tx).await;

        assert_eq!(
            report,
            TickReport {
                scheduled: 3,
                emitted: 2,
                failed: 1
            }
        );
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn panic_is_reported_as_scrape_error() {
        let station = FakeStation::new("shell:1-a", Behavior::Panic);

        let err = scrape(&station, Duration::from_secs(5)).await.unwrap_err();

        assert!(matches!(err, ScrapeError::Panicked(ref msg) if msg == "markup changed"));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_scrape_times_out() {
        let dispatcher = Dispatcher::new(
            stations(vec![
                FakeStation::new("aral:x/y/1", Behavior::Hang),
                FakeStation::new("shell:2-b", Behavior::Deliver(1)),
            ]),
            Duration::from_secs(60),
            2,
            Duration::from_secs(30),
        );
        let (tx, mut rx) = funnel::channel(8);
        let started = Instant::now();

        let report = dispatcher.run_tick(&tx).await;

        assert_eq!(report.emitted, 1);
        assert_eq!(report.failed, 1);
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_scrapes_never_exceed_pool_size() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let fakes = (0..7)
            .map(|i| FakeStation {
                delay: Duration::from_secs(1),
                in_flight: in_flight.clone(),
                max_in_flight: max_in_flight.clone(),
                ..FakeStation::new(&format!("shell:{i}-x"), Behavior::Deliver(1))
            })
            .collect();
        let dispatcher = Dispatcher::new(stations(fakes), Duration::from_secs(60), 3, Duration::from_secs(5));
        let (tx, mut rx) = funnel::channel(16);

        let report = dispatcher.run_tick(&tx).await;

        assert_eq!(report.emitted, 7);
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 3);
        assert_eq!(drain(&mut rx).len(), 7);
    }

    #[tokio::test]
    async fn zero_pool_size_is_clamped_to_one() {
        let dispatcher = Dispatcher::new(
            stations(vec![FakeStation::new("shell:1-a", Behavior::Deliver(1))]),
            Duration::from_secs(60),
            0,
            Duration::from_secs(5),
        );
        let (tx, mut rx) = funnel::channel(1);

        let report = dispatcher.run_tick(&tx).await;

        assert_eq!(report.emitted, 1);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn empty_station_list_is_a_no_op() {
        let dispatcher = Dispatcher::new(Vec::new(), Duration::from_secs(60), 5, Duration::from_secs(5));
        let (tx, _rx) = funnel::channel(1);

        assert_eq!(dispatcher.run_tick(&tx).await, TickReport::default());
    }

    #[tokio::test]
    async fn closed_funnel_counts_as_failure() {
        let dispatcher = Dispatcher::new(
            stations(vec![
                FakeStation::new("shell:1-a", Behavior::Deliver(1)),
                FakeStation::new("shell:2-b", Behavior::Deliver(1)),
            ]),
            Duration::from_secs(60),
            2,
            Duration::from_secs(5),
        );
        let (tx, rx) = funnel::channel(1);
        drop(rx);

        let report = dispatcher.run_tick(&tx).await;

        assert_eq!(report.emitted, 0);
        assert_eq!(report.failed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_at_a_fixed_rate() {
        let station = Arc::new(FakeStation::new("shell:1-a", Behavior::Deliver(1)));
        let dispatcher = Dispatcher::new(
            vec![station.clone() as Arc<dyn Station>],
            Duration::from_secs(60),
            1,
            Duration::from_secs(5),
        );
        let (tx, mut rx) = funnel::channel(8);
        let handle = tokio::spawn(dispatcher.run(tx));

        // First tick immediately, then at 60s and 120s.
        tokio::time::sleep(Duration::from_secs(150)).await;
        handle.abort();

        assert_eq!(station.calls.load(Ordering::SeqCst), 3);
        assert_eq!(drain(&mut rx).len(), 3);
    }
}
