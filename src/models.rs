//! Core data types shared by the store, search, chat, and HTTP layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author recorded when a contribution leaves the field blank.
pub const ANONYMOUS_AUTHOR: &str = "Anonymous";

/// A stored question/answer pair.
///
/// The embedding vector stays in the database; clients only ever see the
/// fields below.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeEntry {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub tags: Vec<String>,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A validated contribution, ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub question: String,
    pub answer: String,
    pub tags: Vec<String>,
    pub author: String,
}

/// Tags as sent by clients: either a JSON array or a single
/// comma-separated string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TagsInput {
    List(Vec<String>),
    Csv(String),
}

impl TagsInput {
    pub fn into_tags(self) -> Vec<String> {
        let raw: Vec<String> = match self {
            TagsInput::List(items) => items,
            TagsInput::Csv(s) => s.split(',').map(str::to_string).collect(),
        };
        raw.into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Body of `POST /api/knowledge`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContributionRequest {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub tags: Option<TagsInput>,
    #[serde(default)]
    pub author: Option<String>,
}

impl ContributionRequest {
    /// Trim and check the submission. Returns `None` when the question or
    /// answer is missing or blank.
    pub fn validate(self) -> Option<NewEntry> {
        let question = self.question.as_deref().map(str::trim).unwrap_or_default();
        let answer = self.answer.as_deref().map(str::trim).unwrap_or_default();
        if question.is_empty() || answer.is_empty() {
            return None;
        }

        let author = self
            .author
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(ANONYMOUS_AUTHOR)
            .to_string();

        Some(NewEntry {
            question: question.to_string(),
            answer: answer.to_string(),
            tags: self.tags.map(TagsInput::into_tags).unwrap_or_default(),
            author,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Option<Vec<ChatMessage>>,
}

/// Successful chat reply: either model-generated or a stored community answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ChatReply {
    pub fn from_model(message: String, model: &str) -> Self {
        Self {
            message,
            model: Some(model.to_string()),
            source: None,
        }
    }

    pub fn community(answer: String) -> Self {
        Self {
            message: answer,
            model: None,
            source: Some("community".to_string()),
        }
    }
}
