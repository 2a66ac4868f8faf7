//! In-memory content store loaded from a JSON data-room file.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::StoreError;
use crate::store::traits::{ContentStore, Document, DocumentSummary, PageFetch, PageSummary};

/// On-disk corpus layout.
#[derive(Debug, Deserialize)]
struct CorpusFile {
    #[serde(default)]
    name: Option<String>,
    documents: Vec<Document>,
}

/// Read counters, one per tier.
#[derive(Debug, Default)]
pub struct AccessStats {
    summary_reads: AtomicU64,
    page_reads: AtomicU64,
}

impl AccessStats {
    pub fn summary_reads(&self) -> u64 {
        self.summary_reads.load(Ordering::Relaxed)
    }

    /// Number of individual pages returned, not calls.
    pub fn page_reads(&self) -> u64 {
        self.page_reads.load(Ordering::Relaxed)
    }
}

/// Immutable corpus held in memory.
#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    name: String,
    documents: HashMap<String, Document>,
    stats: AccessStats,
}

impl InMemoryContentStore {
    /// Build a store from already-parsed documents. Duplicate ids and
    /// duplicate page numbers are rejected.
    pub fn new(
        name: impl Into<String>,
        documents: impl IntoIterator<Item = Document>,
    ) -> Result<Self, StoreError> {
        let mut map = HashMap::new();
        for mut doc in documents {
            if doc.doc_id.trim().is_empty() {
                return Err(StoreError::InvalidCorpus("document with empty doc_id".into()));
            }
            let mut seen = BTreeSet::new();
            for page in &doc.pages {
                if page.page_num == 0 || !seen.insert(page.page_num) {
                    return Err(StoreError::InvalidCorpus(format!(
                        "document {} has invalid or duplicate page {}",
                        doc.doc_id, page.page_num
                    )));
                }
            }
            doc.pages.sort_by_key(|p| p.page_num);
            if map.contains_key(&doc.doc_id) {
                return Err(StoreError::InvalidCorpus(format!(
                    "duplicate doc_id {}",
                    doc.doc_id
                )));
            }
            map.insert(doc.doc_id.clone(), doc);
        }

        tracing::debug!(documents = map.len(), "Loaded content store");
        Ok(Self {
            name: name.into(),
            documents: map,
            stats: AccessStats::default(),
        })
    }

    /// Parse a corpus from JSON text.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let corpus: CorpusFile = serde_json::from_str(json)?;
        let name = corpus.name.unwrap_or_else(|| "Data Room".to_string());
        Self::new(name, corpus.documents)
    }

    /// Load a corpus file from disk.
    pub async fn from_json_file(path: &Path) -> Result<Self, StoreError> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_json(&raw)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All document ids, sorted.
    pub fn document_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.documents.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn stats(&self) -> &AccessStats {
        &self.stats
    }

    fn document(&self, doc_id: &str) -> Result<&Document, StoreError> {
        self.documents.get(doc_id).ok_or_else(|| StoreError::NotFound {
            doc_id: doc_id.to_string(),
        })
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn get_summary(&self, doc_id: &str) -> Result<DocumentSummary, StoreError> {
        let doc = self.document(doc_id)?;
        self.stats.summary_reads.fetch_add(1, Ordering::Relaxed);

        Ok(DocumentSummary {
            doc_id: doc.doc_id.clone(),
            title: doc.title.clone(),
            summary: doc.summary.clone(),
            page_count: doc.pages.len(),
            pages: doc
                .pages
                .iter()
                .map(|p| PageSummary {
                    page_num: p.page_num,
                    summary: p.summary.clone(),
                })
                .collect(),
        })
    }

    async fn get_pages(
        &self,
        doc_id: &str,
        page_nums: Option<&[u32]>,
    ) -> Result<PageFetch, StoreError> {
        let doc = self.document(doc_id)?;

        let fetch = match page_nums {
            None => PageFetch {
                doc_id: doc.doc_id.clone(),
                pages: doc.pages.clone(),
                missing_pages: Vec::new(),
            },
            Some(requested) => {
                let wanted: BTreeSet<u32> = requested.iter().copied().collect();
                let pages: Vec<_> = doc
                    .pages
                    .iter()
                    .filter(|p| wanted.contains(&p.page_num))
                    .cloned()
                    .collect();
                let missing_pages = wanted
                    .iter()
                    .copied()
                    .filter(|n| !pages.iter().any(|p| p.page_num == *n))
                    .collect();
                PageFetch {
                    doc_id: doc.doc_id.clone(),
                    pages,
                    missing_pages,
                }
            }
        };

        self.stats
            .page_reads
            .fetch_add(fetch.pages.len() as u64, Ordering::Relaxed);
        Ok(fetch)
    }
}
