//! Chat completion with knowledge-base context.
//!
//! [`respond`] turns a conversation into a reply:
//!
//! 1. refuse early when no API key is configured or the conversation is empty;
//! 2. search the knowledge base with the last user message;
//! 3. return a stored answer directly when one matches closely enough;
//! 4. otherwise prepend a system prompt listing the retrieved Q&A pairs and
//!    call the upstream chat-completion API once (no retry).

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::time::Duration;
use thiserror::Error;

use crate::config::{ChatConfig, RetrievalConfig};
use crate::embedding::EmbeddingProvider;
use crate::models::{ChatMessage, ChatReply, KnowledgeEntry, Role};
use crate::search::{search_knowledge, SearchMode, SearchOutcome};

/// Distinct failure outcomes of a chat request.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat API key not configured")]
    MissingApiKey,
    #[error("messages array is required")]
    NoMessages,
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("upstream returned no choices")]
    EmptyChoices,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Internal(err.into())
    }
}

// ============ Upstream client ============

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenRouter-compatible `chat/completions` endpoint.
pub struct ChatClient {
    http: reqwest::Client,
    api_key: Option<String>,
    settings: ChatConfig,
}

impl ChatClient {
    /// Build a client, reading the API key from `settings.api_key_env`.
    pub fn from_env(settings: &ChatConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::new(settings, api_key)
    }

    pub fn new(settings: &ChatConfig, api_key: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_key,
            settings: settings.clone(),
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    pub fn settings(&self) -> &ChatConfig {
        &self.settings
    }

    /// Send `messages` upstream and return the first choice's text.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
        let api_key = self.api_key.as_deref().ok_or(ChatError::MissingApiKey)?;

        let body = CompletionRequest {
            model: &self.settings.model,
            messages,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            top_p: self.settings.top_p,
            frequency_penalty: self.settings.frequency_penalty,
            presence_penalty: self.settings.presence_penalty,
        };

        let response = self
            .http
            .post(&self.settings.api_url)
            .bearer_auth(api_key)
            .header("X-Title", &self.settings.app_title)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CompletionResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or(ChatError::EmptyChoices)
    }
}

// ============ Orchestration ============

/// Everything [`respond`] needs, borrowed from the server state.
pub struct ChatContext<'a> {
    pub pool: &'a SqlitePool,
    pub retrieval: &'a RetrievalConfig,
    pub embedder: &'a dyn EmbeddingProvider,
    pub client: &'a ChatClient,
}

/// Answer a conversation.
///
/// `messages` is `None` when the request carried no usable messages array.
pub async fn respond(
    ctx: &ChatContext<'_>,
    messages: Option<Vec<ChatMessage>>,
) -> Result<ChatReply, ChatError> {
    if !ctx.client.has_api_key() {
        return Err(ChatError::MissingApiKey);
    }

    let messages = messages
        .filter(|m| !m.is_empty())
        .ok_or(ChatError::NoMessages)?;

    let query = last_user_message(&messages).unwrap_or_default();

    let context = if query.trim().is_empty() {
        None
    } else {
        Some(search_knowledge(ctx.pool, ctx.retrieval, ctx.embedder, query).await?)
    };

    let settings = ctx.client.settings();
    if settings.community_answers {
        if let Some(entry) = context
            .as_ref()
            .and_then(|c| trusted_match(c, query, settings.community_threshold))
        {
            tracing::info!(entry_id = %entry.id, "answering from community knowledge");
            return Ok(ChatReply::community(entry.answer.clone()));
        }
    }

    let entries: Vec<&KnowledgeEntry> = context.iter().flat_map(|c| c.entries()).collect();

    let mut upstream = Vec::with_capacity(messages.len() + 1);
    upstream.push(ChatMessage::system(build_system_prompt(
        &settings.system_prompt,
        &entries,
    )));
    upstream.extend(messages);

    let text = ctx.client.complete(&upstream).await?;
    Ok(ChatReply::from_model(text, ctx.client.model()))
}

/// Content of the most recent `user` message.
pub fn last_user_message(messages: &[ChatMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
}

/// Pick a stored entry that can stand in for a model answer.
///
/// Trusted when the best similarity hit clears `threshold`, or when some
/// hit's question is the query itself (ignoring case, surrounding whitespace,
/// and trailing punctuation).
fn trusted_match<'a>(
    outcome: &'a SearchOutcome,
    query: &str,
    threshold: f32,
) -> Option<&'a KnowledgeEntry> {
    if outcome.mode == SearchMode::Similarity {
        if let Some(best) = outcome.hits.first() {
            if best.score.is_some_and(|s| s >= threshold) {
                return Some(&best.entry);
            }
        }
    }

    let wanted = normalize_question(query);
    outcome
        .entries()
        .find(|e| normalize_question(&e.question) == wanted)
}

fn normalize_question(text: &str) -> String {
    text.trim()
        .trim_end_matches(|c: char| c == '?' || c == '.' || c == '!')
        .trim()
        .to_lowercase()
}

/// System prompt with the retrieved pairs as `Q1:`/`A1:` lines.
pub fn build_system_prompt(preamble: &str, entries: &[&KnowledgeEntry]) -> String {
    let mut prompt = format!("{}\n", preamble.trim_end());
    if entries.is_empty() {
        return prompt;
    }

    prompt.push_str("Knowledge Base:\n");
    let pairs: Vec<String> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| format!("Q{n}: {}\nA{n}: {}", e.question, e.answer, n = i + 1))
        .collect();
    prompt.push_str(&pairs.join("\n"));
    prompt.push('\n');
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchHit;
    use chrono::Utc;

    fn entry(id: &str, question: &str, answer: &str) -> KnowledgeEntry {
        KnowledgeEntry {
            id: id.into(),
            question: question.into(),
            answer: answer.into(),
            tags: vec![],
            author: None,
            created_at: Utc::now(),
        }
    }

    fn outcome(mode: SearchMode, hits: Vec<(KnowledgeEntry, Option<f32>)>) -> SearchOutcome {
        SearchOutcome {
            mode,
            hits: hits
                .into_iter()
                .map(|(entry, score)| SearchHit { entry, score })
                .collect(),
        }
    }

    #[test]
    fn test_last_user_message_skips_assistant() {
        let messages = vec![
            ChatMessage::user("first"),
            ChatMessage {
                role: Role::Assistant,
                content: "reply".into(),
            },
        ];
        assert_eq!(last_user_message(&messages), Some("first"));
        assert_eq!(last_user_message(&[]), None);
    }

    #[test]
    fn test_system_prompt_without_context() {
        let prompt = build_system_prompt("Be helpful.", &[]);
        assert_eq!(prompt, "Be helpful.\n");
    }

    #[test]
    fn test_system_prompt_lists_pairs() {
        let a = entry("1", "When?", "2008.");
        let b = entry("2", "Where?", "Pune.");
        let prompt = build_system_prompt("Be helpful.", &[&a, &b]);
        assert_eq!(
            prompt,
            "Be helpful.\nKnowledge Base:\nQ1: When?\nA1: 2008.\nQ2: Where?\nA2: Pune.\n"
        );
    }

    #[test]
    fn test_trusted_match_by_similarity() {
        let o = outcome(
            SearchMode::Similarity,
            vec![(entry("1", "Fees?", "Ask office"), Some(0.95))],
        );
        assert_eq!(trusted_match(&o, "how much", 0.9).unwrap().id, "1");
        assert!(trusted_match(&o, "how much", 0.96).is_none());
    }

    #[test]
    fn test_trusted_match_by_exact_question() {
        let o = outcome(
            SearchMode::Keyword,
            vec![
                (entry("1", "What is the admission process?", "Merit"), None),
                (entry("2", "Admission dates", "June"), None),
            ],
        );
        let hit = trusted_match(&o, "  what is the ADMISSION process ", 0.9).unwrap();
        assert_eq!(hit.id, "1");
        assert!(trusted_match(&o, "admission", 0.9).is_none());
    }

    #[tokio::test]
    async fn test_complete_without_key_is_config_error() {
        let client = ChatClient::new(&ChatConfig::default(), None).unwrap();
        let err = client
            .complete(&[ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::MissingApiKey));
    }
}
