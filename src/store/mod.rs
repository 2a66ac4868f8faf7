//! Content store: read-only, two-tier access to the document corpus.

pub mod memory;
pub mod traits;

pub use memory::{AccessStats, InMemoryContentStore};
pub use traits::{ContentStore, Document, DocumentSummary, Page, PageFetch, PageSummary};
