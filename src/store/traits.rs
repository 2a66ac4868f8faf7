//! `ContentStore` trait: two-tier, read-only access to the document corpus.
//!
//! Summaries are the cheap tier: one call per document, returning the document
//! summary and the per-page summaries. Page content is the expensive tier and
//! is only fetched for the pages a worker actually needs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// A single page of an ingested document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 1-indexed page number.
    pub page_num: u32,
    /// Short description of the page.
    pub summary: String,
    /// Opaque reference to the page body (file path, blob key, ...).
    pub content_ref: String,
    /// Extracted text, when ingestion produced any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// An ingested document. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub summary: String,
    #[serde(default)]
    pub pages: Vec<Page>,
}

/// Summary line for one page, part of the cheap tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSummary {
    pub page_num: u32,
    pub summary: String,
}

/// Cheap-tier view of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub doc_id: String,
    pub title: Option<String>,
    pub summary: String,
    pub page_count: usize,
    pub pages: Vec<PageSummary>,
}

impl DocumentSummary {
    /// Document summary followed by one line per page, in page order.
    pub fn combined(&self) -> String {
        if self.pages.is_empty() {
            return self.summary.clone();
        }
        let lines: Vec<String> = self
            .pages
            .iter()
            .map(|p| format!("Page {}: {}", p.page_num, p.summary))
            .collect();
        format!("{}\n\nPage Details:\n{}", self.summary, lines.join("\n"))
    }
}

/// Result of a page fetch: whatever exists, plus the numbers that did not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFetch {
    pub doc_id: String,
    pub pages: Vec<Page>,
    pub missing_pages: Vec<u32>,
}

impl PageFetch {
    pub fn is_complete(&self) -> bool {
        self.missing_pages.is_empty()
    }
}

/// Read-only document corpus. Implementations must tolerate concurrent reads.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Cheap: document and page summaries. `NotFound` for unknown ids.
    async fn get_summary(&self, doc_id: &str) -> Result<DocumentSummary, StoreError>;

    /// Expensive: page content. `None` fetches every page. Unknown page
    /// numbers are reported in `missing_pages`, never as an error.
    async fn get_pages(
        &self,
        doc_id: &str,
        page_nums: Option<&[u32]>,
    ) -> Result<PageFetch, StoreError>;
}
