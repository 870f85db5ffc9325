//! TOML configuration parsing and validation.
//!
//! The service is configured from a single TOML file (default
//! `config/campus.toml`). Only `[db]` is mandatory; every other section
//! falls back to the defaults below.
//!
//! ```toml
//! [db]
//! path = "./data/campus.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:3000"
//!
//! [retrieval]
//! similarity_threshold = 0.5
//!
//! [embedding]
//! provider = "command"
//! command = "python3"
//! args = ["scripts/embed.py"]
//!
//! [chat]
//! model = "openai/gpt-3.5-turbo-instruct"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

/// Knobs for the two-tier knowledge search.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// The top similarity hit must exceed this for the vector tier to win.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_similarity_limit")]
    pub similarity_limit: i64,
    #[serde(default = "default_keyword_limit")]
    pub keyword_limit: i64,
    /// Page size when the query is empty.
    #[serde(default = "default_recent_limit")]
    pub recent_limit: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            similarity_limit: default_similarity_limit(),
            keyword_limit: default_keyword_limit(),
            recent_limit: default_recent_limit(),
        }
    }
}

fn default_similarity_threshold() -> f32 {
    0.5
}
fn default_similarity_limit() -> i64 {
    5
}
fn default_keyword_limit() -> i64 {
    20
}
fn default_recent_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Executable for the `command` provider.
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments placed before the text, which is always the last argument.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            command: None,
            args: Vec::new(),
            model: None,
            dims: None,
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Settings for the upstream chat-completion API.
#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Sent as the `X-Title` header.
    #[serde(default = "default_app_title")]
    pub app_title: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
    /// Answer straight from the knowledge base when a stored entry matches closely.
    #[serde(default = "default_community_answers")]
    pub community_answers: bool,
    #[serde(default = "default_community_threshold")]
    pub community_threshold: f32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            app_title: default_app_title(),
            system_prompt: default_system_prompt(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            timeout_secs: default_chat_timeout_secs(),
            community_answers: default_community_answers(),
            community_threshold: default_community_threshold(),
        }
    }
}

fn default_api_url() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}
fn default_model() -> String {
    "openai/gpt-3.5-turbo-instruct".to_string()
}
fn default_app_title() -> String {
    "College AI Assistant".to_string()
}
fn default_system_prompt() -> String {
    "You are a helpful AI assistant created for a college student project. \
     Be helpful, informative, and educational in your responses. \
     Use the following knowledge base as context if relevant."
        .to_string()
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_temperature() -> f32 {
    0.7
}
fn default_top_p() -> f32 {
    1.0
}
fn default_chat_timeout_secs() -> u64 {
    60
}
fn default_community_answers() -> bool {
    true
}
fn default_community_threshold() -> f32 {
    0.9
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    let retrieval = &config.retrieval;
    if !(0.0..=1.0).contains(&retrieval.similarity_threshold) {
        bail!("retrieval.similarity_threshold must be in [0.0, 1.0]");
    }
    if retrieval.similarity_limit < 1 {
        bail!("retrieval.similarity_limit must be >= 1");
    }
    if retrieval.keyword_limit < 1 {
        bail!("retrieval.keyword_limit must be >= 1");
    }
    if retrieval.recent_limit < 1 {
        bail!("retrieval.recent_limit must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" => {}
        "command" => {
            if config.embedding.command.as_deref().map_or(true, str::is_empty) {
                bail!("embedding.command must be specified when provider is 'command'");
            }
        }
        "openai" => {
            if config.embedding.model.is_none() {
                bail!("embedding.model must be specified when provider is 'openai'");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, command, or openai.",
            other
        ),
    }

    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0 when set");
    }

    let chat = &config.chat;
    if chat.api_url.trim().is_empty() {
        bail!("chat.api_url must not be empty");
    }
    if chat.api_key_env.trim().is_empty() {
        bail!("chat.api_key_env must not be empty");
    }
    if !(0.0..=1.0).contains(&chat.community_threshold) {
        bail!("chat.community_threshold must be in [0.0, 1.0]");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse_config("[db]\npath = \"./data/campus.sqlite\"\n").unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:3000");
        assert_eq!(cfg.retrieval.similarity_limit, 5);
        assert!(cfg.retrieval.recent_limit > cfg.retrieval.keyword_limit);
        assert!(!cfg.embedding.is_enabled());
        assert_eq!(cfg.chat.api_key_env, "OPENROUTER_API_KEY");
        assert_eq!(cfg.chat.max_tokens, 1000);
        assert!(cfg.chat.community_answers);
    }

    #[test]
    fn test_missing_db_section_fails() {
        assert!(parse_config("[server]\nbind = \"0.0.0.0:80\"\n").is_err());
    }

    #[test]
    fn test_threshold_out_of_range() {
        let err = parse_config(
            "[db]\npath = \"x.sqlite\"\n[retrieval]\nsimilarity_threshold = 1.5\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("similarity_threshold"));
    }

    #[test]
    fn test_command_provider_requires_command() {
        let err = parse_config("[db]\npath = \"x.sqlite\"\n[embedding]\nprovider = \"command\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("embedding.command"));
    }

    #[test]
    fn test_unknown_provider() {
        let err = parse_config("[db]\npath = \"x.sqlite\"\n[embedding]\nprovider = \"magic\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_command_provider_with_args() {
        let cfg = parse_config(
            r#"
            [db]
            path = "x.sqlite"

            [embedding]
            provider = "command"
            command = "python3"
            args = ["scripts/embed.py"]
            dims = 384
            "#,
        )
        .unwrap();
        assert!(cfg.embedding.is_enabled());
        assert_eq!(cfg.embedding.args, vec!["scripts/embed.py".to_string()]);
        assert_eq!(cfg.embedding.dims, Some(384));
    }
}
