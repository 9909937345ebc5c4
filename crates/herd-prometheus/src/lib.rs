//! Prometheus counters for the herd job monitor.
//!
//! This crate provides [`MonitorMetrics`], a set of counters registered in a private [`Registry`].
//! Nothing is registered in the process-wide default registry, so several monitors can live in one test binary.
//!
//! ## Example
//! ```rust
//! use herd_prometheus::MonitorMetrics;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let metrics = MonitorMetrics::new()?;
//! metrics.status_transition("PROCESSING");
//!
//! let text = metrics.encode_text()?;
//! assert!(text.contains("herd_status_transitions_total"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Metrics
//! - `herd_store_connectivity_failed_total` - Counter
//! - `herd_orchestrator_connectivity_failed_total` - Counter
//! - `herd_insufficient_resources_total` - Counter
//! - `herd_image_pull_failed_total` - Counter
//! - `herd_trainer_connectivity_failed_total` - Counter
//! - `herd_status_transitions_total{status}` - Counter
//! - `herd_illegal_transitions_total` - Counter
//! - `herd_teardown_total{outcome}` - Counter
//!
//! ## HTTP Server
//! This crate does NOT provide an HTTP server; `herd-monitord` serves [`MonitorMetrics::encode_text`] on `/metrics`.

mod monitor;
pub use monitor::MonitorMetrics;

pub use prometheus::{Encoder, Registry, TextEncoder};
