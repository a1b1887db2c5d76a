use std::fmt;

/// The servable binary resources. Every policy table below is an exhaustive
/// `match`, so a new variant will not compile until each policy is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Export,
    Thumbnail,
}

/// A `Cache-Control: max-age=<seconds>` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheDirective {
    pub max_age_seconds: u32,
}

impl CacheDirective {
    pub fn header_value(&self) -> String {
        format!("max-age={}", self.max_age_seconds)
    }
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Export => "export",
            ResourceKind::Thumbnail => "thumbnail",
        }
    }

    /// Exports are private to the film they belong to; thumbnails are public.
    pub fn auth_required(&self) -> bool {
        match self {
            ResourceKind::Export => true,
            ResourceKind::Thumbnail => false,
        }
    }

    /// `None` means no caching header is emitted at all, which is not the
    /// same as `max-age=0`.
    pub fn cache_directive(&self) -> Option<CacheDirective> {
        match self {
            ResourceKind::Export => None,
            ResourceKind::Thumbnail => Some(CacheDirective {
                max_age_seconds: 600,
            }),
        }
    }

    /// Subdirectory of the storage root holding this kind's files.
    pub fn storage_dir(&self) -> &'static str {
        match self {
            ResourceKind::Export => "exports",
            ResourceKind::Thumbnail => "thumbs",
        }
    }

    /// Only exports carry a display filename for attachment downloads.
    pub fn has_display_filename(&self) -> bool {
        match self {
            ResourceKind::Export => true,
            ResourceKind::Thumbnail => false,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of a resource row, valid for one request.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ResourceMetadata {
    pub mime_type: Option<String>,
    pub display_filename: Option<String>,
    pub owning_parent_id: i64,
}

impl ResourceMetadata {
    pub const DEFAULT_MIME_TYPE: &'static str = "application/octet-stream";

    pub fn content_type(&self) -> &str {
        self.mime_type
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(Self::DEFAULT_MIME_TYPE)
    }
}
