//! Read-only queries against the search index.

use crate::constants::{DEFAULT_CATEGORY_TOP_SIZE, MAX_CATEGORY_TOP_SIZE, SUGGEST_SIZE};
use crate::error::ApiResult;
use blossom_core::{BlossomError, CategoryCount, SearchQuery, SearchResults, TopicDocument};
use blossom_storage::SearchIndex;
use std::sync::Arc;

#[derive(Clone)]
pub struct SearchService {
    index: Arc<dyn SearchIndex>,
}

impl SearchService {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }

    /// Keyword search. Out-of-range paging falls back to the defaults.
    pub async fn search(&self, query: SearchQuery) -> ApiResult<SearchResults> {
        let query = query.normalized();
        let results = self
            .index
            .search(&query)
            .await
            .map_err(BlossomError::from)?;
        tracing::debug!(
            keyword = %query.keyword,
            total = results.total,
            took_ms = results.took_ms,
            "Search executed"
        );
        Ok(results)
    }

    /// Titles starting with `prefix`. A blank prefix suggests nothing.
    pub async fn suggest(&self, prefix: &str) -> ApiResult<Vec<String>> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .index
            .suggest(prefix, SUGGEST_SIZE)
            .await
            .map_err(BlossomError::from)?)
    }

    pub async fn top_by_category(&self, category: &str, size: i64) -> ApiResult<Vec<TopicDocument>> {
        let size = if (1..=MAX_CATEGORY_TOP_SIZE).contains(&size) {
            size
        } else {
            DEFAULT_CATEGORY_TOP_SIZE
        };
        Ok(self
            .index
            .top_by_category(category, size as usize)
            .await
            .map_err(BlossomError::from)?)
    }

    pub async fn category_counts(&self) -> ApiResult<Vec<CategoryCount>> {
        Ok(self
            .index
            .category_counts()
            .await
            .map_err(BlossomError::from)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blossom_core::SearchSort;
    use blossom_storage::InMemorySearchIndex;

    fn doc(id: i64, title: &str, category: &str, views: i64) -> TopicDocument {
        TopicDocument {
            topic_id: id.to_string(),
            user_id: "1".to_string(),
            title: title.to_string(),
            content: format!("{} body text", title),
            category: category.to_string(),
            created_at: "2024-05-01 10:00:00".to_string(),
            updated_at: "2024-05-01 10:00:00".to_string(),
            view_count: views,
            comment_count: 0,
        }
    }

    async fn service() -> SearchService {
        let index = Arc::new(InMemorySearchIndex::new());
        index
            .bulk_upsert(&[
                doc(1, "Rust async runtimes", "tech", 40),
                doc(2, "Rust error handling", "tech", 90),
                doc(3, "Color theory basics", "design", 10),
            ])
            .await
            .unwrap();
        SearchService::new(index)
    }

    #[tokio::test]
    async fn test_search_normalizes_paging() {
        let service = service().await;
        let results = service
            .search(
                SearchQuery::new("rust")
                    .with_page(0, 500)
                    .with_sort(SearchSort::ViewCount),
            )
            .await
            .unwrap();
        assert_eq!(results.page, 1);
        assert_eq!(results.page_size, SearchQuery::DEFAULT_PAGE_SIZE);
        assert_eq!(results.total, 2);
        assert_eq!(results.documents[0].topic_id, "2");
    }

    #[tokio::test]
    async fn test_blank_suggest_is_empty() {
        let service = service().await;
        assert!(service.suggest("   ").await.unwrap().is_empty());
        let titles = service.suggest("Rust").await.unwrap();
        assert_eq!(titles.len(), 2);
    }

    #[tokio::test]
    async fn test_top_by_category_clamps_size() {
        let service = service().await;
        let top = service.top_by_category("tech", 0).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].topic_id, "2");

        let top = service.top_by_category("tech", 1).await.unwrap();
        assert_eq!(top.len(), 1);
    }

    #[tokio::test]
    async fn test_category_counts() {
        let service = service().await;
        let counts = service.category_counts().await.unwrap();
        let tech = counts.iter().find(|c| c.category == "tech").unwrap();
        assert_eq!(tech.count, 2);
    }
}
