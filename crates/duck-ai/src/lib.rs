//! duck-ai: client for the anonymous Duck.ai chat backend
//!
//! This crate manages the rotating session token, sends conversation turns,
//! decodes buffered and streamed replies, and saves conversation histories.

pub mod client;
pub mod error;
pub mod framing;
pub mod history;
pub mod models;
pub mod session;
pub mod tokens;
pub mod types;

pub use client::{ChatApi, ClientConfig};
pub use error::{Error, Result};
pub use framing::FragmentStream;
pub use history::{HistoryStore, SavedConversation};
pub use models::ModelType;
pub use session::{ChatSession, new_session};
pub use tokens::TokenStore;
pub use types::*;
