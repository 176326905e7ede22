//! Domain types: change notifications and the pages they make stale.

pub mod notification;
pub mod routes;

pub use notification::{ChangeNotification, DocumentType, is_identifier};
pub use routes::{HOME_PATH, PathSet, RouteRule, derive_paths, route_for};
