//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete transports, configuration and observability for the sync
//! client.

/// Configuration loading, shared backend address, endpoint resolution.
pub mod config;

/// Live stream WebSocket connection.
pub mod feed;

/// History REST client implementing the snapshot port.
pub mod history;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Local status HTTP endpoint.
pub mod status;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
