//! Knowledge entry storage and contribution intake.
//!
//! All reads and writes against the `knowledge_entries` table go through
//! this module. Entries are insert-only over HTTP; the CLI may additionally
//! upsert seed rows and backfill embeddings.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::config::Config;
use crate::db;
use crate::embedding::{self, blob_to_vec, vec_to_blob, EmbeddingProvider};
use crate::migrate;
use crate::models::{ContributionRequest, KnowledgeEntry, NewEntry};

const ENTRY_COLUMNS: &str = "id, question, answer, tags_json, author, created_at";

/// Why a contribution was not stored.
#[derive(Debug, Error)]
pub enum ContributionError {
    #[error("question and answer are required")]
    MissingFields,
    #[error("failed to generate embedding: {0:#}")]
    Embedding(anyhow::Error),
    #[error("failed to store entry: {0:#}")]
    Storage(anyhow::Error),
}

/// Validate, embed, and persist a contribution.
///
/// Validation happens before the embedding provider is touched, so a bad
/// submission never reaches the external process. When the provider is
/// disabled the entry is stored without a vector and is only reachable by
/// keyword search.
pub async fn submit_contribution(
    pool: &SqlitePool,
    embedder: &dyn EmbeddingProvider,
    request: ContributionRequest,
) -> Result<KnowledgeEntry, ContributionError> {
    let new_entry = request.validate().ok_or(ContributionError::MissingFields)?;

    let embedding = if embedder.is_enabled() {
        let vec = embedder
            .embed(&new_entry.question)
            .await
            .map_err(ContributionError::Embedding)?;
        Some(vec)
    } else {
        None
    };

    insert_entry(
        pool,
        &new_entry,
        embedding.as_deref().map(|v| (v, embedder.model_name())),
    )
    .await
    .map_err(ContributionError::Storage)
}

/// `campus add`: contribute an entry from the command line.
pub async fn run_add(config: &Config, request: ContributionRequest) -> Result<()> {
    let embedder = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;

    let result = submit_contribution(&pool, embedder.as_ref(), request).await;
    pool.close().await;

    let entry = result?;
    println!("Added knowledge entry.");
    println!("  id: {}", entry.id);
    println!("  question: {}", entry.question);
    if !entry.tags.is_empty() {
        println!("  tags: {}", entry.tags.join(", "));
    }
    Ok(())
}

/// Insert a new entry with a generated id and the current timestamp.
pub async fn insert_entry(
    pool: &SqlitePool,
    entry: &NewEntry,
    embedding: Option<(&[f32], &str)>,
) -> Result<KnowledgeEntry> {
    let stored = KnowledgeEntry {
        id: uuid::Uuid::new_v4().to_string(),
        question: entry.question.clone(),
        answer: entry.answer.clone(),
        tags: entry.tags.clone(),
        author: Some(entry.author.clone()),
        created_at: now_millis(),
    };

    sqlx::query(
        r#"
        INSERT INTO knowledge_entries
            (id, question, answer, tags_json, author, created_at, embedding, embedding_model)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&stored.id)
    .bind(&stored.question)
    .bind(&stored.answer)
    .bind(serde_json::to_string(&stored.tags)?)
    .bind(&stored.author)
    .bind(stored.created_at.timestamp_millis())
    .bind(embedding.map(|(v, _)| vec_to_blob(v)))
    .bind(embedding.map(|(_, model)| model.to_string()))
    .execute(pool)
    .await
    .context("Failed to insert knowledge entry")?;

    Ok(stored)
}

/// Insert or replace an entry by id, keeping any stored vector when no new
/// one is supplied.
pub async fn upsert_entry(
    pool: &SqlitePool,
    entry: &KnowledgeEntry,
    embedding: Option<(&[f32], &str)>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO knowledge_entries
            (id, question, answer, tags_json, author, created_at, embedding, embedding_model)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            question = excluded.question,
            answer = excluded.answer,
            tags_json = excluded.tags_json,
            author = excluded.author,
            created_at = excluded.created_at,
            embedding = COALESCE(excluded.embedding, knowledge_entries.embedding),
            embedding_model = COALESCE(excluded.embedding_model, knowledge_entries.embedding_model)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.question)
    .bind(&entry.answer)
    .bind(serde_json::to_string(&entry.tags)?)
    .bind(&entry.author)
    .bind(entry.created_at.timestamp_millis())
    .bind(embedding.map(|(v, _)| vec_to_blob(v)))
    .bind(embedding.map(|(_, model)| model.to_string()))
    .execute(pool)
    .await
    .with_context(|| format!("Failed to upsert knowledge entry {}", entry.id))?;

    Ok(())
}

pub async fn get_entry(pool: &SqlitePool, id: &str) -> Result<Option<KnowledgeEntry>> {
    let row = sqlx::query(&format!(
        "SELECT {ENTRY_COLUMNS} FROM knowledge_entries WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_entry).transpose()
}

pub async fn count_entries(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_entries")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Newest entries first.
pub async fn recent_entries(pool: &SqlitePool, limit: i64) -> Result<Vec<KnowledgeEntry>> {
    let rows = sqlx::query(&format!(
        "SELECT {ENTRY_COLUMNS} FROM knowledge_entries \
         ORDER BY created_at DESC, rowid DESC LIMIT ?"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_entry).collect()
}

/// Case-insensitive substring match over question, answer, and tags,
/// newest first.
///
/// Both the query and the stored text are folded with Rust's Unicode
/// `to_lowercase`; SQLite's `LOWER` only folds ASCII, so filtering happens
/// here rather than in SQL.
pub async fn keyword_search(
    pool: &SqlitePool,
    query: &str,
    limit: i64,
) -> Result<Vec<KnowledgeEntry>> {
    let needle = query.to_lowercase();
    let limit = usize::try_from(limit).unwrap_or(0);

    let rows = sqlx::query(&format!(
        "SELECT {ENTRY_COLUMNS} FROM knowledge_entries ORDER BY created_at DESC, rowid DESC"
    ))
    .fetch_all(pool)
    .await?;

    let mut hits = Vec::new();
    for row in &rows {
        if hits.len() >= limit {
            break;
        }
        let entry = row_to_entry(row)?;
        if entry_matches(&entry, &needle) {
            hits.push(entry);
        }
    }
    Ok(hits)
}

/// `needle` must already be lowercased.
fn entry_matches(entry: &KnowledgeEntry, needle: &str) -> bool {
    entry.question.to_lowercase().contains(needle)
        || entry.answer.to_lowercase().contains(needle)
        || entry
            .tags
            .iter()
            .any(|t| t.to_lowercase().contains(needle))
}

/// Every entry that has a stored vector, paired with that vector.
pub async fn embedded_entries(pool: &SqlitePool) -> Result<Vec<(KnowledgeEntry, Vec<f32>)>> {
    let rows = sqlx::query(&format!(
        "SELECT {ENTRY_COLUMNS}, embedding FROM knowledge_entries WHERE embedding IS NOT NULL"
    ))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            Ok((row_to_entry(row)?, blob_to_vec(&blob)))
        })
        .collect()
}

/// Entries with no vector, or with one produced by a different model.
pub async fn entries_needing_embedding(
    pool: &SqlitePool,
    model: &str,
    limit: Option<i64>,
) -> Result<Vec<KnowledgeEntry>> {
    let rows = sqlx::query(&format!(
        "SELECT {ENTRY_COLUMNS} FROM knowledge_entries \
         WHERE embedding IS NULL OR embedding_model IS NULL OR embedding_model != ? \
         ORDER BY created_at ASC, rowid ASC LIMIT ?"
    ))
    .bind(model)
    .bind(limit.unwrap_or(-1))
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_entry).collect()
}

pub async fn set_embedding(pool: &SqlitePool, id: &str, vec: &[f32], model: &str) -> Result<()> {
    sqlx::query("UPDATE knowledge_entries SET embedding = ?, embedding_model = ? WHERE id = ?")
        .bind(vec_to_blob(vec))
        .bind(model)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn clear_embeddings(pool: &SqlitePool) -> Result<u64> {
    let result =
        sqlx::query("UPDATE knowledge_entries SET embedding = NULL, embedding_model = NULL")
            .execute(pool)
            .await?;
    Ok(result.rows_affected())
}

fn row_to_entry(row: &SqliteRow) -> Result<KnowledgeEntry> {
    let tags_json: String = row.get("tags_json");
    let created_ms: i64 = row.get("created_at");
    let id: String = row.get("id");

    let tags: Vec<String> = serde_json::from_str(&tags_json)
        .with_context(|| format!("Corrupt tags for knowledge entry {}", id))?;
    let created_at = DateTime::from_timestamp_millis(created_ms)
        .with_context(|| format!("Invalid timestamp for knowledge entry {}", id))?;

    Ok(KnowledgeEntry {
        id,
        question: row.get("question"),
        answer: row.get("answer"),
        tags,
        author: row.get("author"),
        created_at,
    })
}

/// Current time truncated to the millisecond precision stored in SQLite.
fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DisabledProvider;
    use crate::migrate::migrate_pool;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        // A single connection keeps the in-memory database alive and shared.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate_pool(&pool).await.unwrap();
        pool
    }

    fn new_entry(question: &str, answer: &str, tags: &[&str]) -> NewEntry {
        NewEntry {
            question: question.into(),
            answer: answer.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            author: "tester".into(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let pool = test_pool().await;
        let stored = insert_entry(&pool, &new_entry("Q?", "A.", &["x"]), None)
            .await
            .unwrap();
        assert!(!stored.id.is_empty());

        let fetched = get_entry(&pool, &stored.id).await.unwrap().unwrap();
        assert_eq!(fetched, stored);
        assert!(get_entry(&pool, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keyword_search_is_case_insensitive() {
        let pool = test_pool().await;
        insert_entry(
            &pool,
            &new_entry("Where is the Library?", "Block B", &[]),
            None,
        )
        .await
        .unwrap();
        insert_entry(&pool, &new_entry("Fees", "See office", &["Finance"]), None)
            .await
            .unwrap();

        let hits = keyword_search(&pool, "LIBRARY", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].question, "Where is the Library?");

        let by_answer = keyword_search(&pool, "office", 10).await.unwrap();
        assert_eq!(by_answer.len(), 1);

        let by_tag = keyword_search(&pool, "financ", 10).await.unwrap();
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].question, "Fees");

        assert!(keyword_search(&pool, "nothing-here", 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_keyword_wildcards_are_literal() {
        let pool = test_pool().await;
        insert_entry(&pool, &new_entry("Pass mark", "40 percent", &[]), None)
            .await
            .unwrap();
        assert!(keyword_search(&pool, "%", 10).await.unwrap().is_empty());
        assert!(keyword_search(&pool, "_", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keyword_search_folds_non_ascii_case() {
        let pool = test_pool().await;
        insert_entry(
            &pool,
            &new_entry("Where is the CAFÉ?", "Next to the ÉTUDE hall", &["Ökologie"]),
            None,
        )
        .await
        .unwrap();

        for query in ["CAFÉ", "café", "Café", "étude", "ÖKOLOG"] {
            let hits = keyword_search(&pool, query, 10).await.unwrap();
            assert_eq!(hits.len(), 1, "no match for {:?}", query);
            assert_eq!(hits[0].question, "Where is the CAFÉ?");
        }
        assert!(keyword_search(&pool, "cafe", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keyword_search_respects_limit() {
        let pool = test_pool().await;
        for i in 0..5 {
            insert_entry(&pool, &new_entry(&format!("hostel {}", i), "a", &[]), None)
                .await
                .unwrap();
        }
        let hits = keyword_search(&pool, "hostel", 2).await.unwrap();
        let questions: Vec<&str> = hits.iter().map(|e| e.question.as_str()).collect();
        assert_eq!(questions, vec!["hostel 4", "hostel 3"]);
    }

    #[tokio::test]
    async fn test_tag_json_punctuation_does_not_match() {
        let pool = test_pool().await;
        insert_entry(&pool, &new_entry("q", "a", &["one", "two"]), None)
            .await
            .unwrap();
        assert!(keyword_search(&pool, "\",\"", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent_entries_newest_first_and_capped() {
        let pool = test_pool().await;
        for i in 0..4 {
            insert_entry(&pool, &new_entry(&format!("q{}", i), "a", &[]), None)
                .await
                .unwrap();
        }
        let recent = recent_entries(&pool, 3).await.unwrap();
        let questions: Vec<&str> = recent.iter().map(|e| e.question.as_str()).collect();
        assert_eq!(questions, vec!["q3", "q2", "q1"]);
    }

    #[tokio::test]
    async fn test_submit_rejects_missing_fields_without_insert() {
        let pool = test_pool().await;
        let request = ContributionRequest {
            question: Some("only a question".into()),
            ..Default::default()
        };
        let err = submit_contribution(&pool, &DisabledProvider, request)
            .await
            .unwrap_err();
        assert!(matches!(err, ContributionError::MissingFields));
        assert_eq!(count_entries(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_keeps_existing_embedding() {
        let pool = test_pool().await;
        let entry = KnowledgeEntry {
            id: "1".into(),
            question: "q".into(),
            answer: "a".into(),
            tags: vec![],
            author: Some("system".into()),
            created_at: Utc::now(),
        };
        let vector = vec![1.0f32, 0.0];
        upsert_entry(&pool, &entry, Some((vector.as_slice(), "m")))
            .await
            .unwrap();
        let updated = KnowledgeEntry {
            answer: "a2".into(),
            ..entry
        };
        upsert_entry(&pool, &updated, None).await.unwrap();

        assert_eq!(count_entries(&pool).await.unwrap(), 1);
        let embedded = embedded_entries(&pool).await.unwrap();
        assert_eq!(embedded.len(), 1);
        assert_eq!(embedded[0].0.answer, "a2");
        assert_eq!(embedded[0].1, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_entries_needing_embedding() {
        let pool = test_pool().await;
        let vector = vec![1.0f32];
        insert_entry(&pool, &new_entry("a", "a", &[]), Some((vector.as_slice(), "m1")))
            .await
            .unwrap();
        let b = insert_entry(&pool, &new_entry("b", "b", &[]), None)
            .await
            .unwrap();

        let pending = entries_needing_embedding(&pool, "m1", None).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);

        let stale = entries_needing_embedding(&pool, "m2", None).await.unwrap();
        assert_eq!(stale.len(), 2);

        set_embedding(&pool, &b.id, &[0.5], "m1").await.unwrap();
        assert!(entries_needing_embedding(&pool, "m1", None)
            .await
            .unwrap()
            .is_empty());

        assert_eq!(clear_embeddings(&pool).await.unwrap(), 2);
        assert!(embedded_entries(&pool).await.unwrap().is_empty());
    }
}
