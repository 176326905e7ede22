//! Application services: event logging, health reporting, the content
//! watcher, and the ports they consume.

pub mod error;
pub mod health;
pub mod logger;
pub mod ports;
pub mod watcher;
