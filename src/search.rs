//! Two-tier knowledge search.
//!
//! ```text
//! query ──▶ empty? ──yes──▶ newest entries (recent_limit)
//!             │
//!             no
//!             ▼
//!      embed query ──fail──┐
//!             │            │
//!             ▼            │
//!   cosine vs stored vecs  │
//!             │            │
//!   top > threshold? ─no───┤
//!             │            ▼
//!            yes     substring match, newest first (keyword_limit)
//!             ▼
//!   top-N by similarity (similarity_limit)
//! ```
//!
//! An embedding failure is not an error here: the search logs it and
//! answers from the keyword tier instead.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::{Config, RetrievalConfig};
use crate::db;
use crate::embedding::{self, cosine_similarity, EmbeddingProvider};
use crate::knowledge;
use crate::models::KnowledgeEntry;

/// Which tier produced a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Similarity,
    Keyword,
    Recent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub entry: KnowledgeEntry,
    /// Cosine similarity; only set for the similarity tier.
    pub score: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub mode: SearchMode,
    pub hits: Vec<SearchHit>,
}

impl SearchOutcome {
    fn unscored(mode: SearchMode, entries: Vec<KnowledgeEntry>) -> Self {
        Self {
            mode,
            hits: entries
                .into_iter()
                .map(|entry| SearchHit { entry, score: None })
                .collect(),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &KnowledgeEntry> {
        self.hits.iter().map(|h| &h.entry)
    }

    pub fn into_entries(self) -> Vec<KnowledgeEntry> {
        self.hits.into_iter().map(|h| h.entry).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Run the similarity → threshold → keyword chain for `query`.
pub async fn search_knowledge(
    pool: &SqlitePool,
    retrieval: &RetrievalConfig,
    embedder: &dyn EmbeddingProvider,
    query: &str,
) -> Result<SearchOutcome> {
    let query = query.trim();

    if query.is_empty() {
        let recent = knowledge::recent_entries(pool, retrieval.recent_limit).await?;
        return Ok(SearchOutcome::unscored(SearchMode::Recent, recent));
    }

    if let Some(ranked) = similarity_tier(pool, retrieval, embedder, query).await? {
        return Ok(ranked);
    }

    let matches = knowledge::keyword_search(pool, query, retrieval.keyword_limit).await?;
    Ok(SearchOutcome::unscored(SearchMode::Keyword, matches))
}

/// Returns `None` whenever the keyword tier should answer instead.
async fn similarity_tier(
    pool: &SqlitePool,
    retrieval: &RetrievalConfig,
    embedder: &dyn EmbeddingProvider,
    query: &str,
) -> Result<Option<SearchOutcome>> {
    if !embedder.is_enabled() {
        return Ok(None);
    }

    let candidates = knowledge::embedded_entries(pool).await?;
    if candidates.is_empty() {
        return Ok(None);
    }

    let query_vec = match embedder.embed(query).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "query embedding failed, falling back to keyword search");
            return Ok(None);
        }
    };

    let ranked = rank_by_similarity(&query_vec, candidates, retrieval.similarity_limit as usize);
    let top = ranked.first().and_then(|h| h.score).unwrap_or(f32::MIN);

    if top > retrieval.similarity_threshold {
        tracing::debug!(top, hits = ranked.len(), "similarity tier accepted");
        Ok(Some(SearchOutcome {
            mode: SearchMode::Similarity,
            hits: ranked,
        }))
    } else {
        tracing::debug!(
            top,
            threshold = retrieval.similarity_threshold,
            "similarity below threshold"
        );
        Ok(None)
    }
}

/// Score every candidate against the query vector and keep the best `limit`.
///
/// Ties are broken newest first so results are deterministic.
fn rank_by_similarity(
    query_vec: &[f32],
    candidates: Vec<(KnowledgeEntry, Vec<f32>)>,
    limit: usize,
) -> Vec<SearchHit> {
    let mut scored: Vec<SearchHit> = candidates
        .into_iter()
        .map(|(entry, vec)| SearchHit {
            score: Some(cosine_similarity(query_vec, &vec)),
            entry,
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.entry.created_at.cmp(&a.entry.created_at))
            .then(a.entry.id.cmp(&b.entry.id))
    });
    scored.truncate(limit);
    scored
}

/// `campus search`: print results to stdout.
pub async fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    let pool = db::connect(config).await?;
    let embedder = embedding::create_provider(&config.embedding)?;

    let mut outcome =
        search_knowledge(&pool, &config.retrieval, embedder.as_ref(), query).await?;
    pool.close().await;

    if let Some(limit) = limit {
        outcome.hits.truncate(limit);
    }

    if outcome.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let mode = match outcome.mode {
        SearchMode::Similarity => "similarity",
        SearchMode::Keyword => "keyword",
        SearchMode::Recent => "recent",
    };
    println!("{} result(s) via {} search", outcome.hits.len(), mode);
    println!();

    for (i, hit) in outcome.hits.iter().enumerate() {
        let entry = &hit.entry;
        match hit.score {
            Some(score) => println!("{}. [{:.2}] {}", i + 1, score, entry.question),
            None => println!("{}. {}", i + 1, entry.question),
        }
        println!("    answer: {}", entry.answer.replace('\n', " ").trim());
        if !entry.tags.is_empty() {
            println!("    tags: {}", entry.tags.join(", "));
        }
        if let Some(ref author) = entry.author {
            println!("    author: {}", author);
        }
        println!("    created: {}", entry.created_at.format("%Y-%m-%d %H:%M"));
        println!("    id: {}", entry.id);
        println!();
    }

    Ok(())
}
