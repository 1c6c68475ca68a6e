//! Backend tests against real PostgreSQL, Redis and Elasticsearch.
//!
//! Skipped unless `BLOSSOM_LIVE_TESTS=1`. Connection settings come from the
//! usual `BLOSSOM_*` variables; every test works under fresh keys, index
//! names or ids so reruns do not collide.

use std::time::Duration;

use blossom_api::{
    ApiResult, ChangeFeedConfig, DbClient, DbConfig, ElasticSearchIndex, RedisConfig,
    RedisCoordinationStore, RedisStreamChangeSource, SearchConfig,
};
use blossom_core::{BlossomError, IdGenerator, LockError, SearchQuery, TopicDocument, Vote, VoteKind};
use blossom_storage::{
    ChangeEventSource, CoordinationStore, Delivery, LockManager, RankingSet, RecordStore,
    SearchIndex,
};
use blossom_test_utils::fixtures;
use redis::AsyncCommands;

use test_support::live_tests_enabled;

fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

#[tokio::test]
async fn live_redis_lock_and_ranking() -> ApiResult<()> {
    if !live_tests_enabled() {
        return Ok(());
    }
    let store = RedisCoordinationStore::connect(&RedisConfig::from_env()).await?;
    let store = std::sync::Arc::new(store);
    let locks = LockManager::new(store.clone());

    let key = unique("lock:test");
    let guard = locks
        .acquire(&key, Duration::from_secs(5))
        .await
        .map_err(BlossomError::from)?;
    let second = locks.acquire(&key, Duration::from_secs(5)).await;
    assert!(matches!(second, Err(LockError::Contended { .. })));
    guard.release().await.map_err(BlossomError::from)?;
    assert!(!store.exists(&key).await.map_err(BlossomError::from)?);

    let ranking = RankingSet::new(store.clone())
        .with_key(unique("hot_ranking_test"))
        .with_capacity(2);
    ranking
        .write_scores(&[(1, 0.5), (2, 3.0), (3, 1.0)])
        .await
        .map_err(BlossomError::from)?;
    let top = ranking.top_ids(10).await.map_err(BlossomError::from)?;
    assert_eq!(top, vec![2, 3]);
    Ok(())
}

fn stream_config() -> ChangeFeedConfig {
    ChangeFeedConfig {
        stream: unique("blossom:test-binlog"),
        consumer: unique("consumer"),
        ..ChangeFeedConfig::default()
    }
}

async fn append_events(
    conn: &mut redis::aio::ConnectionManager,
    stream: &str,
    count: i64,
) -> ApiResult<Vec<String>> {
    let mut ids = Vec::new();
    for id in 1..=count {
        let event = fixtures::topic_event("INSERT", &[fixtures::topic(id, 1)]);
        let payload = serde_json::to_string(&event)?;
        let entry: String = conn.xadd(stream, "*", &[("payload", payload)]).await?;
        ids.push(entry);
    }
    Ok(ids)
}

fn delivery_ids(batch: &[Delivery]) -> Vec<String> {
    batch.iter().map(|d| d.id.clone()).collect()
}

#[tokio::test]
async fn live_redis_stream_feed() -> ApiResult<()> {
    if !live_tests_enabled() {
        return Ok(());
    }
    let redis_config = RedisConfig::from_env();
    let store = RedisCoordinationStore::connect(&redis_config).await?;
    let config = stream_config();
    let source = RedisStreamChangeSource::connect(&redis_config, config.clone()).await?;

    let mut conn = store.connection();
    append_events(&mut conn, &config.stream, 1).await?;

    // First poll drains the (empty) pending list, the second reads new entries.
    let drained = source
        .poll(10, Duration::from_millis(500))
        .await
        .map_err(BlossomError::from)?;
    assert!(drained.is_empty());
    let batch = source
        .poll(10, Duration::from_millis(500))
        .await
        .map_err(BlossomError::from)?;
    assert_eq!(batch.len(), 1);
    source
        .ack(&delivery_ids(&batch))
        .await
        .map_err(BlossomError::from)?;

    let _: i64 = conn.del(&config.stream).await?;
    Ok(())
}

#[tokio::test]
async fn live_stream_redelivers_after_restart() -> ApiResult<()> {
    if !live_tests_enabled() {
        return Ok(());
    }
    let redis_config = RedisConfig::from_env();
    let store = RedisCoordinationStore::connect(&redis_config).await?;
    let mut conn = store.connection();
    let config = stream_config();

    let first = RedisStreamChangeSource::connect(&redis_config, config.clone()).await?;
    let appended = append_events(&mut conn, &config.stream, 2).await?;
    let _ = first
        .poll(10, Duration::ZERO)
        .await
        .map_err(BlossomError::from)?;
    let unacked = first
        .poll(10, Duration::from_millis(500))
        .await
        .map_err(BlossomError::from)?;
    assert_eq!(delivery_ids(&unacked), appended);
    // Crash before acknowledging.
    drop(first);

    let restarted = RedisStreamChangeSource::connect(&redis_config, config.clone()).await?;
    let redelivered = restarted
        .poll(10, Duration::from_millis(500))
        .await
        .map_err(BlossomError::from)?;
    assert_eq!(delivery_ids(&redelivered), appended);
    restarted
        .ack(&delivery_ids(&redelivered))
        .await
        .map_err(BlossomError::from)?;

    let after = restarted
        .poll(10, Duration::from_millis(200))
        .await
        .map_err(BlossomError::from)?;
    assert!(after.is_empty());
    let after = restarted
        .poll(10, Duration::from_millis(200))
        .await
        .map_err(BlossomError::from)?;
    assert!(after.is_empty());

    let _: i64 = conn.del(&config.stream).await?;
    Ok(())
}

#[tokio::test]
async fn live_stream_claims_from_dead_consumer() -> ApiResult<()> {
    if !live_tests_enabled() {
        return Ok(());
    }
    let redis_config = RedisConfig::from_env();
    let store = RedisCoordinationStore::connect(&redis_config).await?;
    let mut conn = store.connection();
    let config = stream_config();

    let dead = RedisStreamChangeSource::connect(&redis_config, config.clone()).await?;
    let appended = append_events(&mut conn, &config.stream, 3).await?;
    let _ = dead
        .poll(10, Duration::ZERO)
        .await
        .map_err(BlossomError::from)?;
    let stranded = dead
        .poll(10, Duration::from_millis(500))
        .await
        .map_err(BlossomError::from)?;
    assert_eq!(stranded.len(), 3);
    drop(dead);

    let survivor_config = ChangeFeedConfig {
        consumer: unique("survivor"),
        claim_idle: Some(Duration::ZERO),
        ..config.clone()
    };
    let survivor = RedisStreamChangeSource::connect(&redis_config, survivor_config).await?;
    let claimed = survivor
        .poll(10, Duration::from_millis(500))
        .await
        .map_err(BlossomError::from)?;
    assert_eq!(delivery_ids(&claimed), appended);
    survivor
        .ack(&delivery_ids(&claimed))
        .await
        .map_err(BlossomError::from)?;

    let _: i64 = conn.del(&config.stream).await?;
    Ok(())
}

#[tokio::test]
async fn live_blocked_poll_leaves_store_responsive() -> ApiResult<()> {
    if !live_tests_enabled() {
        return Ok(());
    }
    let redis_config = RedisConfig::from_env();
    let store = RedisCoordinationStore::connect(&redis_config).await?;
    let config = stream_config();
    let source = RedisStreamChangeSource::connect(&redis_config, config.clone()).await?;
    // Leave the pending list behind so the next poll blocks.
    let _ = source
        .poll(10, Duration::ZERO)
        .await
        .map_err(BlossomError::from)?;

    let block = Duration::from_secs(3);
    let reader = source.clone();
    let blocked = tokio::spawn(async move { reader.poll(10, block).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let key = unique("blossom:test-responsive");
    let started = std::time::Instant::now();
    store
        .set(&key, "1", Duration::from_secs(30))
        .await
        .map_err(BlossomError::from)?;
    let value = store.get(&key).await.map_err(BlossomError::from)?;
    let elapsed = started.elapsed();

    assert_eq!(value.as_deref(), Some("1"));
    assert!(elapsed < Duration::from_secs(1), "store waited {:?}", elapsed);

    let batch = blocked
        .await
        .expect("poll task panicked")
        .map_err(BlossomError::from)?;
    assert!(batch.is_empty());

    store.delete(&[key]).await.map_err(BlossomError::from)?;
    let mut conn = store.connection();
    let _: i64 = conn.del(&config.stream).await?;
    Ok(())
}

#[tokio::test]
async fn live_elasticsearch_round_trip() -> ApiResult<()> {
    if !live_tests_enabled() {
        return Ok(());
    }
    let config = SearchConfig {
        index: unique("blossom-test"),
        ..SearchConfig::from_env()
    };
    let index = ElasticSearchIndex::new(&config)?;
    index.ensure_index().await.map_err(BlossomError::from)?;
    // Second call finds the index already there.
    index.ensure_index().await.map_err(BlossomError::from)?;

    let mut topic = fixtures::topic(42, 7);
    topic.title = "Elasticsearch partial updates".to_string();
    index
        .upsert(&TopicDocument::from(&topic))
        .await
        .map_err(BlossomError::from)?;
    assert!(index
        .update_comment_count(42, 5)
        .await
        .map_err(BlossomError::from)?);

    let results = index
        .search(&SearchQuery::new("partial"))
        .await
        .map_err(BlossomError::from)?;
    assert_eq!(results.total, 1);
    assert_eq!(results.documents[0].comment_count, 5);

    assert!(index.delete(42).await.map_err(BlossomError::from)?);
    assert!(!index.delete(42).await.map_err(BlossomError::from)?);
    Ok(())
}

#[tokio::test]
async fn live_postgres_topic_and_votes() -> ApiResult<()> {
    if !live_tests_enabled() {
        return Ok(());
    }
    let db = DbClient::from_config(&DbConfig::from_env())?;
    db.apply_schema().await?;

    let ids = IdGenerator::new(900).map_err(BlossomError::from)?;
    let next = || ids.next_id().map_err(BlossomError::from);

    let user = fixtures::user(next()?);
    db.user_insert(&user).await?;
    let topic = fixtures::topic(next()?, user.id);
    db.topic_insert(&topic).await?;

    let stored = db.topic_get(topic.id).await?.expect("topic just inserted");
    assert_eq!(stored.username, user.username);

    db.vote_insert(&Vote {
        id: next()?,
        user_id: user.id,
        topic_id: topic.id,
        kind: VoteKind::Like,
    })
    .await?;
    db.topic_adjust_votes(topic.id, VoteKind::Like, 1).await?;
    let stored = db.topic_get(topic.id).await?.expect("topic still there");
    assert_eq!(stored.like_count, 1);

    let comment = fixtures::comment(next()?, topic.id, user.id);
    db.comment_insert(&comment).await?;
    assert_eq!(db.comment_count_by_topic(topic.id).await?, 1);
    Ok(())
}
