//! Which cached page paths a change notification makes stale.

use std::collections::HashSet;

use crate::domain::notification::{ChangeNotification, DocumentType};

pub const HOME_PATH: &str = "/";

/// Cached pages that render one content kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteRule {
    pub listing: &'static str,
    /// Detail pages live at `{detail_prefix}/{slug}`.
    pub detail_prefix: Option<&'static str>,
    pub on_home: bool,
    pub api: Option<&'static str>,
}

/// Route table. Kinds without an entry have no cached pages.
pub fn route_for(kind: DocumentType) -> Option<RouteRule> {
    let rule = match kind {
        DocumentType::Gallery => RouteRule {
            listing: "/gallery",
            detail_prefix: Some("/gallery"),
            on_home: true,
            api: Some("/api/gallery"),
        },
        DocumentType::Post => RouteRule {
            listing: "/news",
            detail_prefix: Some("/news"),
            on_home: true,
            api: Some("/api/news"),
        },
        DocumentType::Event => RouteRule {
            listing: "/events",
            detail_prefix: Some("/events"),
            on_home: true,
            api: Some("/api/events"),
        },
        DocumentType::Announcement => RouteRule {
            listing: "/announcements",
            detail_prefix: None,
            on_home: true,
            api: None,
        },
        DocumentType::Page
        | DocumentType::SiteSettings
        | DocumentType::Author
        | DocumentType::Category => return None,
    };
    Some(rule)
}

/// Insertion-ordered set of page paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSet {
    paths: Vec<String>,
    seen: HashSet<String>,
}

impl PathSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if `path` was already present.
    pub fn insert(&mut self, path: impl Into<String>) -> bool {
        let path = path.into();
        if self.seen.contains(&path) {
            return false;
        }
        self.seen.insert(path.clone());
        self.paths.push(path);
        true
    }

    pub fn extend<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for path in paths {
            self.insert(path);
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.seen.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.paths
    }

    pub fn into_vec(self) -> Vec<String> {
        self.paths
    }

    /// Order-independent identity: sorted paths joined by commas.
    pub fn debounce_key(&self) -> String {
        let mut sorted: Vec<&str> = self.iter().collect();
        sorted.sort_unstable();
        sorted.join(",")
    }
}

impl<S: Into<String>> FromIterator<S> for PathSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = PathSet::new();
        set.extend(iter);
        set
    }
}

impl IntoIterator for PathSet {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.into_iter()
    }
}

/// Paths to invalidate for `notification`, or `None` when its kind has no routes.
///
/// Category-scoped changes touch only the listing and the home page.
pub fn derive_paths(notification: &ChangeNotification) -> Option<PathSet> {
    let rule = route_for(notification.document_type)?;
    let mut paths = PathSet::new();
    paths.insert(rule.listing);

    if notification.is_category_scoped() {
        paths.insert(HOME_PATH);
        return Some(paths);
    }

    if let (Some(prefix), Some(slug)) = (rule.detail_prefix, notification.slug.as_deref()) {
        paths.insert(format!("{prefix}/{slug}"));
    }
    if rule.on_home {
        paths.insert(HOME_PATH);
    }
    if let Some(api) = rule.api {
        paths.insert(api);
    }
    Some(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(paths: &PathSet) -> Vec<&str> {
        let mut out: Vec<&str> = paths.iter().collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn gallery_with_slug_yields_four_paths() {
        let notification =
            ChangeNotification::new(DocumentType::Gallery, "g-1").with_slug("reuni-2024");

        let paths = derive_paths(&notification).expect("gallery is routed");

        assert_eq!(
            sorted(&paths),
            vec!["/", "/api/gallery", "/gallery", "/gallery/reuni-2024"]
        );
    }

    #[test]
    fn without_slug_skips_detail_page() {
        let notification = ChangeNotification::new(DocumentType::Post, "p-1");

        let paths = derive_paths(&notification).expect("post is routed");

        assert_eq!(sorted(&paths), vec!["/", "/api/news", "/news"]);
    }

    #[test]
    fn category_only_yields_listing_and_home() {
        let notification =
            ChangeNotification::new(DocumentType::Event, "e-1").with_category("concerts");

        let paths = derive_paths(&notification).expect("event is routed");

        assert_eq!(sorted(&paths), vec!["/", "/events"]);
    }

    #[test]
    fn category_with_slug_is_document_scoped() {
        let notification = ChangeNotification::new(DocumentType::Gallery, "g-1")
            .with_slug("autumn")
            .with_category("festivals");

        let paths = derive_paths(&notification).expect("gallery is routed");

        assert!(paths.contains("/gallery/autumn"));
        assert!(paths.contains("/api/gallery"));
    }

    #[test]
    fn unrouted_kinds_yield_none() {
        for kind in [
            DocumentType::Page,
            DocumentType::SiteSettings,
            DocumentType::Author,
            DocumentType::Category,
        ] {
            assert!(derive_paths(&ChangeNotification::new(kind, "x")).is_none());
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        let notification =
            ChangeNotification::new(DocumentType::Announcement, "a-1").with_slug("ignored");

        let first = derive_paths(&notification).expect("routed");
        let second = derive_paths(&notification).expect("routed");

        assert_eq!(first, second);
        assert_eq!(sorted(&first), vec!["/", "/announcements"]);
    }

    #[test]
    fn path_set_deduplicates_and_keys_independently_of_order() {
        let a: PathSet = ["/news", "/", "/news"].into_iter().collect();
        let b: PathSet = ["/", "/news"].into_iter().collect();

        assert_eq!(a.len(), 2);
        assert_eq!(a.as_slice(), ["/news", "/"]);
        assert_eq!(a.debounce_key(), b.debounce_key());
        assert_eq!(a.debounce_key(), "/,/news");
    }
}
