//! Starter knowledge base.
//!
//! The bundled entries (`data/seed.json`) carry fixed ids, so seeding twice
//! updates rows in place instead of duplicating them.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::knowledge;
use crate::migrate;
use crate::models::KnowledgeEntry;

const SEED_JSON: &str = include_str!("../data/seed.json");
const SEED_AUTHOR: &str = "system";

#[derive(Debug, Deserialize)]
struct SeedEntry {
    id: String,
    question: String,
    answer: String,
    #[serde(default)]
    tags: Vec<String>,
}

fn seeded_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 8, 19, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Parse the bundled seed file.
pub fn seed_entries() -> Result<Vec<KnowledgeEntry>> {
    let raw: Vec<SeedEntry> =
        serde_json::from_str(SEED_JSON).context("Failed to parse bundled seed data")?;

    Ok(raw
        .into_iter()
        .map(|e| KnowledgeEntry {
            id: e.id,
            question: e.question,
            answer: e.answer,
            tags: e.tags,
            author: Some(SEED_AUTHOR.to_string()),
            created_at: seeded_at(),
        })
        .collect())
}

/// `campus seed`: upsert the starter entries, embedding them when a
/// provider is configured.
pub async fn run_seed(config: &Config) -> Result<()> {
    let entries = seed_entries()?;
    let provider = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;

    let mut embedded = 0usize;
    for entry in &entries {
        let vector = if provider.is_enabled() {
            match provider.embed(&entry.question).await {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(
                        entry_id = %entry.id,
                        error = %format!("{:#}", e),
                        "embedding failed for seed entry"
                    );
                    None
                }
            }
        } else {
            None
        };
        if vector.is_some() {
            embedded += 1;
        }

        knowledge::upsert_entry(
            &pool,
            entry,
            vector.as_deref().map(|v| (v, provider.model_name())),
        )
        .await?;
    }

    println!("Seeded knowledge base!");
    println!("  entries: {}", entries.len());
    println!("  embedded: {}", embedded);

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_entries_are_valid() {
        let entries = seed_entries().unwrap();
        assert_eq!(entries.len(), 10);
        for e in &entries {
            assert!(!e.question.trim().is_empty());
            assert!(!e.answer.trim().is_empty());
            assert_eq!(e.author.as_deref(), Some(SEED_AUTHOR));
        }
        let mut ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 10, "seed ids must be unique");
    }

    #[test]
    fn test_seed_timestamp() {
        assert_eq!(seeded_at().to_rfc3339(), "2025-08-19T12:00:00+00:00");
    }
}
