//! Tracing setup: structured JSON logs plus optional OTLP span export.
//!
//! # Telemetry invariants
//!
//! - **No plaintext PII or key material** in any span attribute or log field.
//!   Key ids, lengths and counts only.
//! - Log level is configurable via `LOG_LEVEL` (default: `info`); `RUST_LOG`
//!   takes precedence when set.

pub mod init;

pub use init::{init_telemetry, shutdown};
