//! Knowledge store abstraction backing the search and learning stages.
//!
//! `InMemoryKnowledgeStore` is the reference backend for the demo and
//! tests; `NoOpKnowledgeStore` covers environments with no knowledge base
//! at all. Tests can also use the mock in [`tests`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use triage_core::DocumentRef;

/// Well-known collection names.
pub mod collections {
    /// Platform migration guides and how-tos.
    pub const MIGRATION_DOCS: &str = "migration_docs";
    /// Known error signatures with causes and remedies.
    pub const ERROR_PATTERNS: &str = "error_patterns";
    /// Resolved-incident write-back target for the learning stage.
    pub const PAST_INCIDENTS: &str = "past_incidents";
}

/// Collections consulted by the search stage, in query order.
pub const SEARCH_COLLECTIONS: &[&str] = &[
    collections::MIGRATION_DOCS,
    collections::ERROR_PATTERNS,
    collections::PAST_INCIDENTS,
];

/// Characters of document text carried into evidence snippets.
const SNIPPET_CHARS: usize = 160;

/// A retrieved document with its relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub id: String,
    pub collection: String,
    pub content: String,
    /// Overlap score in [0, 1]; backend-specific beyond that.
    pub score: f64,
}

impl ScoredDocument {
    /// Reference form carried on diagnoses: id, collection, leading snippet.
    pub fn to_ref(&self) -> DocumentRef {
        let mut snippet: String = self.content.chars().take(SNIPPET_CHARS).collect();
        if self.content.chars().count() > SNIPPET_CHARS {
            snippet.push_str("...");
        }
        DocumentRef {
            id: self.id.clone(),
            collection: self.collection.clone(),
            snippet,
            score: self.score,
        }
    }
}

/// A document as stored, with the metadata recorded at add time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Abstraction over knowledge backends.
///
/// `InMemoryKnowledgeStore` implements this for local use; tests can
/// provide a mock implementation.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Retrieve up to `top_k` documents from `collection` ranked by
    /// relevance to `text`. Zero-relevance documents are not returned.
    async fn query(&self, collection: &str, text: &str, top_k: usize)
        -> Result<Vec<ScoredDocument>>;

    /// Add a document to `collection`, returning its assigned id.
    async fn add(
        &self,
        collection: &str,
        content: &str,
        metadata: HashMap<String, String>,
    ) -> Result<String>;

    /// Check if the backend is reachable.
    async fn available(&self) -> bool;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreInner {
    collections: HashMap<String, Vec<StoredDocument>>,
    next_seq: u64,
}

/// Collection-keyed document store with token-overlap scoring.
///
/// Document ids are `doc-<seq>` with one monotonic sequence across all
/// collections, so an id identifies a document without its collection.
#[derive(Debug, Default)]
pub struct InMemoryKnowledgeStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a store previously written with [`save_to_file`].
    ///
    /// [`save_to_file`]: InMemoryKnowledgeStore::save_to_file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
        let inner: StoreInner =
            serde_json::from_str(&content).context("Failed to parse knowledge store JSON")?;
        Ok(Self {
            inner: RwLock::new(inner),
        })
    }

    /// Snapshot all collections to a pretty-printed JSON file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let inner = self
            .inner
            .read()
            .map_err(|_| anyhow::anyhow!("knowledge store lock poisoned"))?;
        let json = serde_json::to_string_pretty(&*inner)?;
        std::fs::write(path, json).context(format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Number of documents currently held in `collection`.
    pub fn document_count(&self, collection: &str) -> usize {
        self.inner
            .read()
            .map(|inner| inner.collections.get(collection).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

/// Lowercased alphanumeric tokens, deduplicated.
fn tokens(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
    {
        if !seen.iter().any(|s| s == token) {
            seen.push(token.to_string());
        }
    }
    seen
}

/// Fraction of query tokens present in the document text.
fn overlap_score(query_tokens: &[String], content: &str) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let doc_tokens = tokens(content);
    let hits = query_tokens
        .iter()
        .filter(|t| doc_tokens.contains(t))
        .count();
    hits as f64 / query_tokens.len() as f64
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn query(
        &self,
        collection: &str,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| anyhow::anyhow!("knowledge store lock poisoned"))?;
        let docs = match inner.collections.get(collection) {
            Some(docs) => docs,
            None => return Ok(Vec::new()),
        };

        let query_tokens = tokens(text);
        let mut scored: Vec<ScoredDocument> = docs
            .iter()
            .filter_map(|doc| {
                let score = overlap_score(&query_tokens, &doc.content);
                (score > 0.0).then(|| ScoredDocument {
                    id: doc.id.clone(),
                    collection: collection.to_string(),
                    content: doc.content.clone(),
                    score,
                })
            })
            .collect();

        // Ties keep insertion order so older documents rank first.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        debug!(collection, results = scored.len(), "Knowledge query");
        Ok(scored)
    }

    async fn add(
        &self,
        collection: &str,
        content: &str,
        metadata: HashMap<String, String>,
    ) -> Result<String> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("knowledge store lock poisoned"))?;
        inner.next_seq += 1;
        let id = format!("doc-{}", inner.next_seq);
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(StoredDocument {
                id: id.clone(),
                content: content.to_string(),
                metadata,
            });
        debug!(collection, id = %id, "Knowledge add");
        Ok(id)
    }

    async fn available(&self) -> bool {
        true
    }
}

/// A no-op knowledge store for when no backend is configured.
///
/// All queries return empty results, all adds succeed silently.
pub struct NoOpKnowledgeStore;

#[async_trait]
impl KnowledgeStore for NoOpKnowledgeStore {
    async fn query(
        &self,
        _collection: &str,
        _text: &str,
        _top_k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        Ok(Vec::new())
    }

    async fn add(
        &self,
        _collection: &str,
        _content: &str,
        _metadata: HashMap<String, String>,
    ) -> Result<String> {
        Ok(String::new())
    }

    async fn available(&self) -> bool {
        false
    }
}
