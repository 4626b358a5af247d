pub mod artifacts;
pub mod fetcher;
pub mod identity;
pub mod pagination;
pub mod parser;
pub mod pipeline;
pub mod render;
pub mod settings;
pub mod stages;
pub mod store;
pub mod testing;
pub mod types;
pub mod utils;

pub use artifacts::FsArtifactStore;
pub use fetcher::{Document, FetchFailure, FetchLimits, Fetcher};
pub use pagination::{PageOutcome, PagedSession, SessionState};
pub use pipeline::{Collaborators, Orchestrator};
pub use render::ChromeEngine;
pub use settings::CrawlSettings;
pub use store::{MemoryStore, PgStore};
pub use types::*;
