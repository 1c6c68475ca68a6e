//! Elasticsearch-backed search index over the REST API.
//!
//! Writes use `refresh=true` so a document is searchable as soon as the
//! write returns. Query bodies are built by the free functions below and
//! covered by unit tests without a cluster.

use crate::config::SearchConfig;
use crate::error::ApiResult;
use async_trait::async_trait;
use blossom_core::{
    CategoryCount, EntityId, IndexError, SearchQuery, SearchResults, TopicDocument,
};
use blossom_storage::{IndexResult, SearchIndex};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

/// Name of the terms aggregation used for category counts.
const CATEGORY_AGG: &str = "categories";

/// Upper bound on distinct categories returned by the aggregation.
const CATEGORY_AGG_SIZE: usize = 100;

// ============================================================================
// REQUEST BODIES
// ============================================================================

/// Index settings and mapping for topic documents.
pub fn index_mapping() -> Value {
    let datetime = json!({
        "type": "date",
        "format": "yyyy-MM-dd HH:mm:ss||yyyy-MM-dd||epoch_millis"
    });
    json!({
        "settings": {
            "number_of_shards": 1,
            "number_of_replicas": 0
        },
        "mappings": {
            "properties": {
                "topic_id": { "type": "keyword" },
                "user_id": { "type": "keyword" },
                "title": {
                    "type": "text",
                    "analyzer": "standard",
                    "fields": {
                        "keyword": { "type": "keyword", "ignore_above": 256 }
                    }
                },
                "content": { "type": "text", "analyzer": "standard" },
                "category": { "type": "keyword" },
                "created_at": datetime,
                "updated_at": datetime,
                "view_count": { "type": "integer" },
                "comment_count": { "type": "integer" }
            }
        }
    })
}

/// Full-text query: OR of terms over title and content, optional category
/// filter, relevance order unless a sort field is requested.
pub fn search_body(query: &SearchQuery) -> Value {
    let mut must = Vec::new();
    let keyword = query.keyword.trim();
    if !keyword.is_empty() {
        must.push(json!({
            "multi_match": {
                "query": keyword,
                "fields": ["title", "content"],
                "type": "best_fields",
                "tie_breaker": 0.3,
                "operator": "or",
                "minimum_should_match": "30%"
            }
        }));
    }

    let mut filter = Vec::new();
    if let Some(category) = &query.category {
        filter.push(json!({ "term": { "category": category } }));
    }

    let mut body = json!({
        "query": { "bool": { "must": must, "filter": filter } },
        "from": query.offset(),
        "size": query.page_size,
    });
    if let Some(field) = query.sort.field() {
        body["sort"] = json!([{ field: { "order": "desc" } }]);
    }
    body
}

pub fn suggest_body(prefix: &str, size: usize) -> Value {
    json!({
        "query": { "prefix": { "title.keyword": prefix } },
        "_source": ["title"],
        "size": size,
    })
}

pub fn top_by_category_body(category: &str, size: usize) -> Value {
    json!({
        "query": { "bool": { "filter": [{ "term": { "category": category } }] } },
        "sort": [{ "view_count": { "order": "desc" } }],
        "size": size,
    })
}

pub fn category_counts_body() -> Value {
    json!({
        "size": 0,
        "aggs": {
            CATEGORY_AGG: { "terms": { "field": "category", "size": CATEGORY_AGG_SIZE } }
        }
    })
}

/// `_bulk` NDJSON: one action line and one source line per document.
pub fn bulk_body(index: &str, docs: &[TopicDocument]) -> Result<String, serde_json::Error> {
    let mut body = String::new();
    for doc in docs {
        let action = json!({ "index": { "_index": index, "_id": doc.id() } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(doc)?);
        body.push('\n');
    }
    Ok(body)
}

// ============================================================================
// RESPONSE SHAPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct SearchResponse<T> {
    #[serde(default)]
    took: i64,
    hits: Hits<T>,
    #[serde(default)]
    aggregations: Option<Aggregations>,
}

#[derive(Debug, Deserialize)]
struct Hits<T> {
    total: HitTotal,
    hits: Vec<Hit<T>>,
}

#[derive(Debug, Deserialize)]
struct HitTotal {
    value: i64,
}

#[derive(Debug, Deserialize)]
struct Hit<T> {
    #[serde(rename = "_source")]
    source: T,
}

#[derive(Debug, Deserialize)]
struct TitleOnly {
    title: String,
}

#[derive(Debug, Deserialize)]
struct Aggregations {
    categories: TermsAgg,
}

#[derive(Debug, Deserialize)]
struct TermsAgg {
    buckets: Vec<Bucket>,
}

#[derive(Debug, Deserialize)]
struct Bucket {
    key: String,
    doc_count: i64,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<TopicDocument>,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    items: Vec<Value>,
}

impl BulkResponse {
    fn succeeded(&self) -> usize {
        self.items
            .iter()
            .filter(|item| {
                item.get("index")
                    .and_then(|op| op.get("status"))
                    .and_then(Value::as_u64)
                    .map_or(false, |status| status < 300)
            })
            .count()
    }
}

// ============================================================================
// CLIENT
// ============================================================================

/// Search index client for one Elasticsearch index.
#[derive(Clone)]
pub struct ElasticSearchIndex {
    client: Client,
    base_url: String,
    index: String,
}

impl ElasticSearchIndex {
    pub fn new(config: &SearchConfig) -> ApiResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.index, path)
    }

    async fn query<T: DeserializeOwned>(&self, body: &Value) -> IndexResult<SearchResponse<T>> {
        let response = self
            .client
            .post(self.url("_search"))
            .json(body)
            .send()
            .await
            .map_err(query_error)?;
        let response = ensure_success(response).await.map_err(|reason| IndexError::QueryFailed { reason })?;
        response.json().await.map_err(query_error)
    }
}

fn query_error(err: reqwest::Error) -> IndexError {
    if err.is_connect() || err.is_timeout() {
        IndexError::Unavailable {
            reason: err.to_string(),
        }
    } else {
        IndexError::QueryFailed {
            reason: err.to_string(),
        }
    }
}

fn write_error(id: &str) -> impl FnOnce(reqwest::Error) -> IndexError + '_ {
    move |err| {
        if err.is_connect() || err.is_timeout() {
            IndexError::Unavailable {
                reason: err.to_string(),
            }
        } else {
            IndexError::WriteFailed {
                id: id.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

/// Pass a successful response through; turn anything else into
/// `"HTTP {status}: {body}"`.
async fn ensure_success(response: Response) -> Result<Response, String> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(format!("HTTP {}: {}", status, body))
}

#[async_trait]
impl SearchIndex for ElasticSearchIndex {
    async fn ensure_index(&self) -> IndexResult<()> {
        let url = format!("{}/{}", self.base_url, self.index);
        let exists = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(query_error)?;
        if exists.status().is_success() {
            return Ok(());
        }

        let response = self
            .client
            .put(&url)
            .json(&index_mapping())
            .send()
            .await
            .map_err(query_error)?;
        let status = response.status();
        if status.is_success() {
            tracing::info!(index = %self.index, "Created search index");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        // Another instance created it between HEAD and PUT.
        if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception") {
            return Ok(());
        }
        Err(IndexError::QueryFailed {
            reason: format!("HTTP {}: {}", status, body),
        })
    }

    async fn upsert(&self, doc: &TopicDocument) -> IndexResult<()> {
        let id = doc.id();
        let response = self
            .client
            .put(self.url(&format!("_doc/{}?refresh=true", id)))
            .json(doc)
            .send()
            .await
            .map_err(write_error(id))?;
        ensure_success(response)
            .await
            .map_err(|reason| IndexError::WriteFailed {
                id: id.to_string(),
                reason,
            })?;
        Ok(())
    }

    async fn bulk_upsert(&self, docs: &[TopicDocument]) -> IndexResult<usize> {
        if docs.is_empty() {
            return Ok(0);
        }
        let body = bulk_body(&self.index, docs).map_err(|e| IndexError::WriteFailed {
            id: "_bulk".to_string(),
            reason: e.to_string(),
        })?;
        let response = self
            .client
            .post(format!("{}/_bulk?refresh=true", self.base_url))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(write_error("_bulk"))?;
        let response = ensure_success(response)
            .await
            .map_err(|reason| IndexError::WriteFailed {
                id: "_bulk".to_string(),
                reason,
            })?;
        let result: BulkResponse = response.json().await.map_err(write_error("_bulk"))?;

        let written = result.succeeded();
        if result.errors {
            tracing::warn!(
                requested = docs.len(),
                written,
                "Bulk index request had item failures"
            );
        }
        Ok(written)
    }

    async fn delete(&self, id: EntityId) -> IndexResult<bool> {
        let id = id.to_string();
        let response = self
            .client
            .delete(self.url(&format!("_doc/{}?refresh=true", id)))
            .send()
            .await
            .map_err(write_error(&id))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success(response)
            .await
            .map_err(|reason| IndexError::WriteFailed { id, reason })?;
        Ok(true)
    }

    async fn update_comment_count(&self, id: EntityId, count: i64) -> IndexResult<bool> {
        let id = id.to_string();
        let response = self
            .client
            .post(self.url(&format!("_update/{}?refresh=true", id)))
            .json(&json!({ "doc": { "comment_count": count } }))
            .send()
            .await
            .map_err(write_error(&id))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success(response)
            .await
            .map_err(|reason| IndexError::WriteFailed { id, reason })?;
        Ok(true)
    }

    async fn get(&self, id: EntityId) -> IndexResult<Option<TopicDocument>> {
        let response = self
            .client
            .get(self.url(&format!("_doc/{}", id)))
            .send()
            .await
            .map_err(query_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(response)
            .await
            .map_err(|reason| IndexError::QueryFailed { reason })?;
        let found: GetResponse = response.json().await.map_err(query_error)?;
        Ok(if found.found { found.source } else { None })
    }

    async fn search(&self, query: &SearchQuery) -> IndexResult<SearchResults> {
        let query = query.clone().normalized();
        let result: SearchResponse<TopicDocument> = self.query(&search_body(&query)).await?;

        let total = result.hits.total.value;
        let total_pages = (total + query.page_size - 1) / query.page_size;
        Ok(SearchResults {
            documents: result.hits.hits.into_iter().map(|h| h.source).collect(),
            total,
            page: query.page,
            page_size: query.page_size,
            total_pages,
            has_more: query.page < total_pages,
            took_ms: result.took,
        })
    }

    async fn suggest(&self, prefix: &str, size: usize) -> IndexResult<Vec<String>> {
        if prefix.trim().is_empty() {
            return Ok(Vec::new());
        }
        let result: SearchResponse<TitleOnly> = self.query(&suggest_body(prefix, size)).await?;
        Ok(result.hits.hits.into_iter().map(|h| h.source.title).collect())
    }

    async fn top_by_category(&self, category: &str, size: usize) -> IndexResult<Vec<TopicDocument>> {
        let result: SearchResponse<TopicDocument> =
            self.query(&top_by_category_body(category, size)).await?;
        Ok(result.hits.hits.into_iter().map(|h| h.source).collect())
    }

    async fn category_counts(&self) -> IndexResult<Vec<CategoryCount>> {
        let result: SearchResponse<Value> = self.query(&category_counts_body()).await?;
        Ok(result
            .aggregations
            .map(|aggs| {
                aggs.categories
                    .buckets
                    .into_iter()
                    .map(|b| CategoryCount {
                        category: b.key,
                        count: b.doc_count,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
