//! Domain Layer - Core signal types and timeline logic.
//!
//! This layer contains the record model of the trading-signal feed and the
//! ordering rules applied to it. Nothing here performs I/O.

/// Trading signal records and the normalizer for untrusted input.
pub mod signal;

/// Ordered, deduplicated signal timeline and the synchronized state.
pub mod timeline;
