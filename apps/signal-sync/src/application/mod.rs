//! Application Layer - Use cases and port definitions.
//!
//! The subscription service and the ports it drives.

/// Port interfaces for external systems (historical records).
pub mod ports;

/// The sync subscription service.
pub mod services;
