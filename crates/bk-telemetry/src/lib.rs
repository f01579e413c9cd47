//! Observability for branchkeeper: `tracing-subscriber` setup and an
//! in-process metrics collector that sessions report usage into.

pub mod logging;
pub mod metrics;
