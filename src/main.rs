// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:      Environment configuration and validation
// - error:       Typed errors per pipeline stage
// - schema:      Samples, station identities and sample rows
// - util:        Shared parsing helpers (prices, coordinates, text)
// - stations:    Brand scrapers and the identifier registry
// - dispatcher:  Periodic fan-out over a bounded worker pool
// - funnel:      Hand-off channel from workers to the collector
// - collector:   Batching, flush triggers and storage writes
// - identity:    Station natural key -> storage id resolution
// - storage:     Postgres and demo backends
// - app:         Wiring of one pipeline run
//
mod app;
mod collector;
mod config;
mod dispatcher;
mod error;
mod funnel;
mod identity;
mod metrics;
mod schema;
mod stations;
mod storage;
mod util;

// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use app::PriceMonitor;
use config::Config;

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Initialize cryptography backend (rustls)
// - Initialize logging (RUST_LOG, default `info`)
// - Load configuration from the environment
// - Build and run the pipeline until Ctrl-C
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --------------------------------------------------------
    // IMPORTANT:
    // Must run before any HTTP client or database pool exists.
    // --------------------------------------------------------
    app::install_crypto_provider();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // --------------------------------------------------------
    // Load configuration
    //
    // NOTE:
    // - `.env` may contain the database password.
    // - It must not be committed to version control.
    // --------------------------------------------------------
    let config = Config::from_env()?;
    log::debug!("{config:?}");

    let monitor = PriceMonitor::build(config).await?;
    let summary = monitor.run().await?;

    log::info!(
        "stopped after {} samples, {} flushes, {} rows written, {} rows dropped",
        summary.samples,
        summary.flushes(),
        summary.rows_written,
        summary.rows_dropped
    );

    Ok(())
}
