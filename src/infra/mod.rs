//! Infrastructure adapters and runtime bootstrap.

pub mod content_store;
pub mod error;
pub mod http;
pub mod invalidator;
pub mod telemetry;
