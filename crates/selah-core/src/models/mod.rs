//! Data models for Selah

mod annotation;
mod reading_log;

pub use annotation::{Annotation, AnnotationId, AnnotationKind};
pub use reading_log::ReadingLogEntry;
