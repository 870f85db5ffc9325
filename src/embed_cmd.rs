use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::knowledge;
use crate::migrate;

/// Embed entries whose vector is missing or came from another model.
pub async fn run_embed_pending(config: &Config, limit: Option<i64>, dry_run: bool) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;

    let pending =
        knowledge::entries_needing_embedding(&pool, provider.model_name(), limit).await?;

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  entries needing embeddings: {}", pending.len());
        pool.close().await;
        return Ok(());
    }

    if pending.is_empty() {
        println!("embed pending");
        println!("  all entries up to date");
        pool.close().await;
        return Ok(());
    }

    let (embedded, failed) = embed_entries(&pool, provider.as_ref(), &pending).await?;

    println!("embed pending");
    println!("  total pending: {}", pending.len());
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    pool.close().await;
    Ok(())
}

/// Drop every stored vector and embed all entries again.
pub async fn run_embed_rebuild(config: &Config) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;

    let cleared = knowledge::clear_embeddings(&pool).await?;
    println!("embed rebuild: cleared {} embeddings", cleared);

    let all = knowledge::entries_needing_embedding(&pool, provider.model_name(), None).await?;
    if all.is_empty() {
        println!("  no entries to embed");
        pool.close().await;
        return Ok(());
    }

    let (embedded, failed) = embed_entries(&pool, provider.as_ref(), &all).await?;
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    pool.close().await;
    Ok(())
}

/// Embed each entry's question; a failed entry is reported and skipped.
async fn embed_entries(
    pool: &sqlx::SqlitePool,
    provider: &dyn EmbeddingProvider,
    entries: &[crate::models::KnowledgeEntry],
) -> Result<(u64, u64)> {
    let mut embedded = 0u64;
    let mut failed = 0u64;

    for entry in entries {
        match provider.embed(&entry.question).await {
            Ok(vec) => {
                knowledge::set_embedding(pool, &entry.id, &vec, provider.model_name()).await?;
                embedded += 1;
            }
            Err(e) => {
                tracing::warn!(
                    entry_id = %entry.id,
                    error = %format!("{:#}", e),
                    "embedding failed"
                );
                failed += 1;
            }
        }
    }

    Ok((embedded, failed))
}
