//! # Campus Assist
//!
//! A college chat assistant backed by a community-contributed knowledge base.
//!
//! Students ask questions through a browser chat UI. The server looks up
//! related question/answer pairs that other students contributed, then either
//! answers straight from a close match or forwards the conversation, with the
//! matches as context, to an OpenRouter-compatible chat-completion API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  POST /api/chat   ┌────────────┐   ┌──────────────┐
//! │ Chat UI  │──────────────────▶│   chat     │──▶│ LLM API      │
//! └──────────┘                   └─────┬──────┘   └──────────────┘
//!                                      ▼
//! ┌──────────┐  /api/knowledge   ┌────────────┐   ┌──────────────┐
//! │Contribute│──────────────────▶│  search /  │──▶│ embedding    │
//! │   form   │                   │ knowledge  │   │ process      │
//! └──────────┘                   └─────┬──────┘   └──────────────┘
//!                                      ▼
//!                                ┌────────────┐
//!                                │  SQLite    │
//!                                └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Knowledge entries, chat messages, request/response bodies |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Idempotent schema setup |
//! | [`knowledge`] | Entry storage and contribution intake |
//! | [`embedding`] | Embedding providers and vector utilities |
//! | [`search`] | Similarity search with keyword fallback |
//! | [`chat`] | Upstream chat client and reply orchestration |
//! | [`error`] | JSON error contract for the HTTP API |
//! | [`server`] | Axum router and handlers |
//! | [`seed`] | Bundled starter entries |
//! | [`embed_cmd`] | Embedding backfill commands |

pub mod chat;
pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod error;
pub mod knowledge;
pub mod migrate;
pub mod models;
pub mod search;
pub mod seed;
pub mod server;
