//! Contracts shared between the crawler core and its external collaborators:
//! the record model, the record store, artifact storage and the rendering
//! capability.

pub mod defs;
pub mod render;
pub mod state;

pub use defs::{Comment, DateWindow, Instrument, NewsItem, Post, Record, RecordKind, ReportMeta};
pub use render::{RawElement, Readiness, RenderEngine, RenderSession, SessionIdentity};
pub use state::{ArtifactStore, Predicate, RecordStore, Scope, StoredRecord};
