//! Search index: a derived, eventually consistent full-text view of topics.

use async_trait::async_trait;
use blossom_core::{
    CategoryCount, EntityId, IndexError, SearchQuery, SearchResults, SearchSort, TopicDocument,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

pub type IndexResult<T> = Result<T, IndexError>;

/// Share of query terms a document must match, mirroring
/// `minimum_should_match: 30%`.
pub const MINIMUM_SHOULD_MATCH: f64 = 0.3;

/// Write and query access to the topic search index.
///
/// Writes are idempotent upserts keyed by topic id.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create the index with its mapping when it does not exist yet.
    async fn ensure_index(&self) -> IndexResult<()>;

    async fn upsert(&self, doc: &TopicDocument) -> IndexResult<()>;

    /// Upsert many documents, returning how many were written.
    async fn bulk_upsert(&self, docs: &[TopicDocument]) -> IndexResult<usize>;

    /// Remove a document. Returns `false` when it was not indexed.
    async fn delete(&self, id: EntityId) -> IndexResult<bool>;

    /// Partial update of `comment_count`. Returns `false` when the document
    /// is not indexed.
    async fn update_comment_count(&self, id: EntityId, count: i64) -> IndexResult<bool>;

    async fn get(&self, id: EntityId) -> IndexResult<Option<TopicDocument>>;

    async fn search(&self, query: &SearchQuery) -> IndexResult<SearchResults>;

    /// Titles starting with `prefix`.
    async fn suggest(&self, prefix: &str, size: usize) -> IndexResult<Vec<String>>;

    /// Most viewed documents in a category.
    async fn top_by_category(&self, category: &str, size: usize)
        -> IndexResult<Vec<TopicDocument>>;

    async fn category_counts(&self) -> IndexResult<Vec<CategoryCount>>;
}

// ============================================================================
// IN-MEMORY INDEX
// ============================================================================

/// In-memory index with OR-of-terms matching over title and content.
#[derive(Debug, Default)]
pub struct InMemorySearchIndex {
    docs: Mutex<BTreeMap<String, TopicDocument>>,
    fail_writes: AtomicBool,
}

fn terms(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Matched-term count per field, or `None` below the match threshold.
fn relevance(doc: &TopicDocument, terms: &[String]) -> Option<f64> {
    if terms.is_empty() {
        return Some(0.0);
    }
    let title = doc.title.to_lowercase();
    let content = doc.content.to_lowercase();
    let in_title = terms.iter().filter(|t| title.contains(t.as_str())).count();
    let in_content = terms.iter().filter(|t| content.contains(t.as_str())).count();
    let matched = terms
        .iter()
        .filter(|t| title.contains(t.as_str()) || content.contains(t.as_str()))
        .count();

    let required = ((terms.len() as f64 * MINIMUM_SHOULD_MATCH).floor() as usize).max(1);
    if matched < required {
        return None;
    }
    // best_fields with tie_breaker 0.3
    let best = in_title.max(in_content) as f64;
    let other = in_title.min(in_content) as f64;
    Some(best + 0.3 * other)
}

fn sort_value(doc: &TopicDocument, sort: SearchSort) -> (i64, String) {
    match sort {
        SearchSort::ViewCount => (doc.view_count, String::new()),
        SearchSort::CommentCount => (doc.comment_count, String::new()),
        SearchSort::CreatedAt => (0, doc.created_at.clone()),
        SearchSort::Relevance => (0, String::new()),
    }
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every write with `WriteFailed`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.docs.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn docs(&self) -> IndexResult<MutexGuard<'_, BTreeMap<String, TopicDocument>>> {
        self.docs.lock().map_err(|_| IndexError::Unavailable {
            reason: "index lock poisoned".to_string(),
        })
    }

    fn check_write(&self, id: &str) -> IndexResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(IndexError::WriteFailed {
                id: id.to_string(),
                reason: "writes disabled".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn ensure_index(&self) -> IndexResult<()> {
        Ok(())
    }

    async fn upsert(&self, doc: &TopicDocument) -> IndexResult<()> {
        self.check_write(doc.id())?;
        self.docs()?.insert(doc.topic_id.clone(), doc.clone());
        Ok(())
    }

    async fn bulk_upsert(&self, docs: &[TopicDocument]) -> IndexResult<usize> {
        if let Some(first) = docs.first() {
            self.check_write(first.id())?;
        }
        let mut stored = self.docs()?;
        for doc in docs {
            stored.insert(doc.topic_id.clone(), doc.clone());
        }
        Ok(docs.len())
    }

    async fn delete(&self, id: EntityId) -> IndexResult<bool> {
        let key = id.to_string();
        self.check_write(&key)?;
        Ok(self.docs()?.remove(&key).is_some())
    }

    async fn update_comment_count(&self, id: EntityId, count: i64) -> IndexResult<bool> {
        let key = id.to_string();
        self.check_write(&key)?;
        match self.docs()?.get_mut(&key) {
            Some(doc) => {
                doc.comment_count = count;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, id: EntityId) -> IndexResult<Option<TopicDocument>> {
        Ok(self.docs()?.get(&id.to_string()).cloned())
    }

    async fn search(&self, query: &SearchQuery) -> IndexResult<SearchResults> {
        let query = query.clone().normalized();
        let terms = terms(&query.keyword);

        let mut hits: Vec<(f64, TopicDocument)> = self
            .docs()?
            .values()
            .filter(|d| query.category.as_deref().map_or(true, |c| d.category == c))
            .filter_map(|d| relevance(d, &terms).map(|score| (score, d.clone())))
            .collect();

        match query.sort {
            SearchSort::Relevance => hits.sort_by(|a, b| b.0.total_cmp(&a.0)),
            sort => hits.sort_by(|a, b| sort_value(&b.1, sort).cmp(&sort_value(&a.1, sort))),
        }

        let total = hits.len() as i64;
        let documents = hits
            .into_iter()
            .skip(usize::try_from(query.offset()).unwrap_or(usize::MAX))
            .take(usize::try_from(query.page_size).unwrap_or(0))
            .map(|(_, d)| d)
            .collect();
        let total_pages = (total + query.page_size - 1) / query.page_size;

        Ok(SearchResults {
            documents,
            total,
            page: query.page,
            page_size: query.page_size,
            total_pages,
            has_more: query.page < total_pages,
            took_ms: 0,
        })
    }

    async fn suggest(&self, prefix: &str, size: usize) -> IndexResult<Vec<String>> {
        if prefix.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .docs()?
            .values()
            .filter(|d| d.title.starts_with(prefix))
            .take(size)
            .map(|d| d.title.clone())
            .collect())
    }

    async fn top_by_category(
        &self,
        category: &str,
        size: usize,
    ) -> IndexResult<Vec<TopicDocument>> {
        let mut docs: Vec<TopicDocument> = self
            .docs()?
            .values()
            .filter(|d| d.category == category)
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.view_count.cmp(&a.view_count));
        docs.truncate(size);
        Ok(docs)
    }

    async fn category_counts(&self) -> IndexResult<Vec<CategoryCount>> {
        let mut counts: HashMap<String, i64> = HashMap::new();
        for doc in self.docs()?.values() {
            *counts.entry(doc.category.clone()).or_default() += 1;
        }
        let mut counts: Vec<CategoryCount> = counts
            .into_iter()
            .map(|(category, count)| CategoryCount { category, count })
            .collect();
        counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.category.cmp(&b.category)));
        Ok(counts)
    }
}
