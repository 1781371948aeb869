//! # huddle-observability
//!
//! Observability-Crate fuer Huddle:
//! - Prometheus-kompatible Metriken des Call-Ablaufs
//! - Structured Logging (Text oder JSON) via tracing-subscriber

pub mod logging;
pub mod metrics;

pub use logging::logging_initialisieren;
pub use metrics::CallMetrics;
