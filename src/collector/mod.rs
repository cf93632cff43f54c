/// Collector module
///
/// This module groups all logic responsible for:
/// - Consuming samples from the funnel
/// - Resolving station identities
/// - Buffering rows and deciding when to flush them
///
/// The collector sits between:
/// - The dispatcher's workers (via the funnel)
/// - The storage backend
///
/// Design notes:
/// - `batch` holds the pure buffer / trigger state, no I/O
/// - `runner` owns the task loop and all storage calls
/// - Brand-specific logic MUST NOT live here
pub mod batch;
pub mod runner;
