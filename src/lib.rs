//! Webhook-driven cache revalidation.
//!
//! Inbound change notifications are rate limited, validated and
//! signature-checked, then turned into a set of page paths that are
//! invalidated through a retrying, circuit-broken downstream call.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub mod resilience;
pub mod revalidation;
pub mod webhook;
