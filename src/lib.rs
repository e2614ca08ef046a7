//! chatrelay
//!
//! Telegram webhook relay to Gemini with persistent per-user history.
//!
//! # Architecture
//!
//! ```text
//! Telegram ──► POST /webhook ──► chatrelay ──► Gemini API
//!                                   │
//!                                   ├── History (SQLite, last N turns)
//!                                   └── sendMessage ──► Telegram
//! ```

pub mod config;
pub mod conversation;
pub mod gemini;
pub mod history;
pub mod server;
pub mod telegram;
pub mod webhook;

pub use config::{Config, ConfigError};
pub use conversation::{ChatMessage, ChatRole, ConversationBuilder};
pub use gemini::{GeminiClient, LanguageModel, ModelReply};
pub use history::{HistoryStore, Role, StorageError, Turn};
pub use server::RelayServer;
pub use telegram::{ChatPlatform, TelegramClient};
pub use webhook::{webhook_router, RelayState, WebhookError};
