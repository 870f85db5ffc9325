//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`CommandProvider`]**: runs an external process that prints the vector on stdout.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API with retry and backoff.
//!
//! Also provides vector utilities for storing embeddings in SQLite:
//! - [`cosine_similarity`]: compute similarity between two embedding vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`
//! - [`parse_vector_output`]: parse the text printed by an embedding process
//!
//! # Provider Selection
//!
//! ```rust
//! # use campus_assist::config::EmbeddingConfig;
//! # use campus_assist::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert!(!provider.is_enabled());
//! ```
//!
//! # Command Contract
//!
//! The `command` provider spawns `command args... <text>` directly (no shell),
//! so the text never needs quoting. The last non-empty line of stdout must
//! hold the vector as comma- or whitespace-separated numbers, e.g. the output
//! of a sentence-transformers script:
//!
//! ```text
//! 0.0123,-0.0456,0.0789,...
//! ```

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use crate::config::EmbeddingConfig;

/// Turns text into a fixed-length vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier stored alongside each vector (model name or command).
    fn model_name(&self) -> &str;

    /// Expected dimensionality, when known up front.
    fn dims(&self) -> Option<usize>;

    /// Whether [`embed`](EmbeddingProvider::embed) can succeed at all.
    fn is_enabled(&self) -> bool {
        true
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Create the provider named by `embedding.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"command"` | [`CommandProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "command" => Ok(Arc::new(CommandProvider::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled Provider ============

/// Used when `embedding.provider = "disabled"`. Every call fails.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> Option<usize> {
        None
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ Command Provider ============

/// Embeds text by running an external process once per call.
pub struct CommandProvider {
    command: String,
    args: Vec<String>,
    model: String,
    dims: Option<usize>,
    timeout: Duration,
}

impl CommandProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let command = config
            .command
            .clone()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| anyhow!("embedding.command required for command provider"))?;
        let model = config.model.clone().unwrap_or_else(|| command.clone());

        Ok(Self {
            command,
            args: config.args.clone(),
            model,
            dims: config.dims,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for CommandProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let child = Command::new(&self.command)
            .args(&self.args)
            .arg(text)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                anyhow!(
                    "embedding command timed out after {}s",
                    self.timeout.as_secs()
                )
            })?
            .with_context(|| format!("Failed to run embedding command: {}", self.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "embedding command exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }

        let vec = parse_vector_output(&String::from_utf8_lossy(&output.stdout))?;
        check_dims(&vec, self.dims)?;
        Ok(vec)
    }
}

/// Parse the vector printed by an embedding process.
///
/// Uses the last non-empty line so that libraries which print progress
/// messages before the result don't break parsing.
pub fn parse_vector_output(stdout: &str) -> Result<Vec<f32>> {
    let line = stdout
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .ok_or_else(|| anyhow!("embedding command produced no output"))?;

    let line = line.trim_start_matches('[').trim_end_matches(']');

    line.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|tok| !tok.is_empty())
        .map(|tok| {
            tok.parse::<f32>()
                .map_err(|_| anyhow!("invalid number in embedding output: {:?}", tok))
        })
        .collect::<Result<Vec<f32>>>()
        .and_then(|v| {
            if v.is_empty() {
                bail!("embedding command produced an empty vector");
            }
            if v.iter().any(|x| !x.is_finite()) {
                bail!("embedding output contains non-finite values");
            }
            Ok(v)
        })
}

fn check_dims(vec: &[f32], expected: Option<usize>) -> Result<()> {
    match expected {
        Some(dims) if dims != vec.len() => bail!(
            "embedding has {} dimensions, expected {}",
            vec.len(),
            dims
        ),
        _ => Ok(()),
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST /v1/embeddings` with the configured model. Requires the
/// `OPENAI_API_KEY` environment variable.
///
/// Retry strategy:
/// - HTTP 429 or 5xx → retry with exponential backoff (1s, 2s, 4s, ... capped at 32s)
/// - HTTP 4xx (not 429) → fail immediately
/// - Network error → retry
pub struct OpenAIProvider {
    model: String,
    dims: Option<usize>,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims: config.dims,
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/embeddings")
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        let vec = parse_openai_response(&json)?
                            .into_iter()
                            .next()
                            .ok_or_else(|| anyhow!("Empty embedding response"))?;
                        check_dims(&vec, self.dims)?;
                        return Ok(vec);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(%status, attempt, "OpenAI embeddings request failed, retrying");
                        last_err = Some(anyhow!("OpenAI API error {}: {}", status, body_text));
                        continue;
                    }

                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Embedding failed after retries")))
    }
}

/// Extract the `data[].embedding` arrays from an OpenAI embeddings response.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    data.iter()
        .map(|item| {
            let embedding = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
            Ok(embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect())
        })
        .collect()
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use campus_assist::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, zero vectors, or vectors of different
/// lengths, so a dimension mismatch never outranks a real match.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_parse_comma_separated() {
        let v = parse_vector_output("0.5,-1.25,3\n").unwrap();
        assert_eq!(v, vec![0.5, -1.25, 3.0]);
    }

    #[test]
    fn test_parse_uses_last_line() {
        let out = "Loading model...\n\n[0.1 0.2 0.3]\n\n";
        assert_eq!(parse_vector_output(out).unwrap(), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_vector_output("").is_err());
        assert!(parse_vector_output("   \n").is_err());
        assert!(parse_vector_output("0.1,abc,0.3").is_err());
        assert!(parse_vector_output("NaN,1").is_err());
    }

    #[test]
    fn test_check_dims() {
        assert!(check_dims(&[1.0, 2.0], Some(2)).is_ok());
        assert!(check_dims(&[1.0, 2.0], None).is_ok());
        assert!(check_dims(&[1.0], Some(3)).is_err());
    }

    #[test]
    fn test_parse_openai_response() {
        let json = serde_json::json!({
            "data": [{"index": 0, "embedding": [0.25, -0.5]}]
        });
        assert_eq!(parse_openai_response(&json).unwrap(), vec![vec![0.25, -0.5]]);
        assert!(parse_openai_response(&serde_json::json!({})).is_err());
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert!(!provider.is_enabled());
        let err = provider.embed("hello").await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_provider_passes_text_as_argument() {
        // `sh -c script` binds the appended text to $0.
        let config = EmbeddingConfig {
            provider: "command".into(),
            command: Some("sh".into()),
            args: vec![
                "-c".into(),
                r#"case "$0" in *library*) echo 1,0,0 ;; *) echo 0,1,0 ;; esac"#.into(),
            ],
            dims: Some(3),
            ..Default::default()
        };
        let provider = CommandProvider::new(&config).unwrap();
        assert_eq!(
            provider.embed("where is the \"library\"?").await.unwrap(),
            vec![1.0, 0.0, 0.0]
        );
        assert_eq!(provider.embed("fees").await.unwrap(), vec![0.0, 1.0, 0.0]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_provider_failure_exit() {
        let config = EmbeddingConfig {
            provider: "command".into(),
            command: Some("sh".into()),
            args: vec!["-c".into(), "echo boom >&2; exit 3".into()],
            ..Default::default()
        };
        let provider = CommandProvider::new(&config).unwrap();
        let err = provider.embed("x").await.unwrap_err().to_string();
        assert!(err.contains("boom"), "unexpected error: {}", err);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_provider_dims_mismatch() {
        let config = EmbeddingConfig {
            provider: "command".into(),
            command: Some("sh".into()),
            args: vec!["-c".into(), "echo 1,2".into()],
            dims: Some(3),
            ..Default::default()
        };
        let provider = CommandProvider::new(&config).unwrap();
        assert!(provider.embed("x").await.is_err());
    }
}
