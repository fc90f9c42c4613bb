//! Annotation model: highlights, verse notes, and bookmarks

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A unique identifier for an annotation, using UUID v7 (time-sortable)
///
/// Generated on the client; also serves as the idempotency key for
/// server-side upserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnnotationId(Uuid);

impl AnnotationId {
    /// Create a new unique annotation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for AnnotationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AnnotationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The variant-specific part of an annotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnotationKind {
    /// A colored highlight over a verse
    Highlight { color: String },
    /// A free-text note attached to a verse
    Note { content: String },
    /// A bookmark, optionally labelled
    Bookmark { label: Option<String> },
}

impl AnnotationKind {
    /// Stable storage/wire name for this variant
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Highlight { .. } => "highlight",
            Self::Note { .. } => "note",
            Self::Bookmark { .. } => "bookmark",
        }
    }

    /// Whether at most one live annotation of this kind may exist per
    /// verse reference (highlights and bookmarks; notes are unbounded)
    #[must_use]
    pub const fn is_exclusive_per_verse(&self) -> bool {
        !matches!(self, Self::Note { .. })
    }
}

/// A user annotation on a verse
///
/// Deletion is a tombstone (`deleted_at`) rather than a physical remove,
/// so other devices can learn of the deletion through sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Unique identifier
    pub id: AnnotationId,
    /// Variant-specific data
    pub kind: AnnotationKind,
    /// Verse reference, e.g. "John 3:16"
    pub verse_ref: String,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Soft delete timestamp (Unix ms), if tombstoned
    pub deleted_at: Option<i64>,
}

impl Annotation {
    /// Create a new annotation for the given verse
    #[must_use]
    pub fn new(kind: AnnotationKind, verse_ref: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: AnnotationId::new(),
            kind,
            verse_ref: verse_ref.into(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Create a new highlight
    #[must_use]
    pub fn highlight(verse_ref: impl Into<String>, color: impl Into<String>) -> Self {
        Self::new(
            AnnotationKind::Highlight {
                color: color.into(),
            },
            verse_ref,
        )
    }

    /// Create a new verse note
    #[must_use]
    pub fn note(verse_ref: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            AnnotationKind::Note {
                content: content.into(),
            },
            verse_ref,
        )
    }

    /// Create a new bookmark
    #[must_use]
    pub fn bookmark(verse_ref: impl Into<String>, label: Option<String>) -> Self {
        Self::new(AnnotationKind::Bookmark { label }, verse_ref)
    }

    /// Whether this annotation has been tombstoned
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
