//! Change notifications accepted from the content source.

use std::fmt;

use revalidator_api_types::{ChangeNotificationBody, Operation, SlugRef};

/// Content kinds the webhook accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentType {
    Gallery,
    Post,
    Event,
    Page,
    Announcement,
    SiteSettings,
    Author,
    Category,
}

impl DocumentType {
    pub const ALL: [DocumentType; 8] = [
        DocumentType::Gallery,
        DocumentType::Post,
        DocumentType::Event,
        DocumentType::Page,
        DocumentType::Announcement,
        DocumentType::SiteSettings,
        DocumentType::Author,
        DocumentType::Category,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::Gallery => "gallery",
            DocumentType::Post => "post",
            DocumentType::Event => "event",
            DocumentType::Page => "page",
            DocumentType::Announcement => "announcement",
            DocumentType::SiteSettings => "siteSettings",
            DocumentType::Author => "author",
            DocumentType::Category => "category",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// Comma-separated allow-list, for error messages.
    pub fn allowed_list() -> String {
        Self::ALL
            .iter()
            .map(|kind| kind.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True for non-empty strings of ASCII letters, digits, `-` and `_`.
pub fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// A validated, sanitized change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub document_type: DocumentType,
    pub document_id: String,
    pub revision: Option<String>,
    pub slug: Option<String>,
    pub category: Option<String>,
    pub operation: Option<Operation>,
    pub project_id: Option<String>,
    pub dataset: Option<String>,
}

impl ChangeNotification {
    pub fn new(document_type: DocumentType, document_id: impl Into<String>) -> Self {
        Self {
            document_type,
            document_id: document_id.into(),
            revision: None,
            slug: None,
            category: None,
            operation: None,
            project_id: None,
            dataset: None,
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Category change that does not target a single document.
    pub fn is_category_scoped(&self) -> bool {
        self.category.is_some() && self.slug.is_none()
    }
}

impl From<&ChangeNotification> for ChangeNotificationBody {
    fn from(value: &ChangeNotification) -> Self {
        ChangeNotificationBody {
            document_type: value.document_type.as_str().to_string(),
            document_id: value.document_id.clone(),
            revision: value.revision.clone(),
            slug: value.slug.clone().map(|current| SlugRef { current }),
            category: value.category.clone(),
            operation: value.operation,
            project_id: value.project_id.clone(),
            dataset: value.dataset.clone(),
        }
    }
}
