//! Blossom Telemetry - Observability Infrastructure
//!
//! Structured logging through `tracing` and Prometheus counters for the
//! background paths no caller observes.

pub mod metrics;
pub mod tracer;

pub use metrics::{gather_text, with_metrics, BlossomMetrics, METRICS};
pub use tracer::{init_tracing, LogFormat, TelemetryConfig};
