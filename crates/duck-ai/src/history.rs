//! Saved conversation histories, one JSON document per conversation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::ModelType;
use crate::types::{ConversationLog, Message};

const FILE_PREFIX: &str = "history_";
const FILE_SUFFIX: &str = ".json";

/// A point-in-time copy of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedConversation {
    pub id: String,
    pub model: ModelType,
    pub messages: Vec<Message>,
}

impl From<SavedConversation> for ConversationLog {
    fn from(saved: SavedConversation) -> Self {
        ConversationLog {
            model: saved.model,
            messages: saved.messages,
        }
    }
}

/// Directory-backed store of saved conversations
#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(Self::default_dir())
    }
}

impl HistoryStore {
    /// Get the default histories directory
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("duck-chat")
            .join("histories")
    }

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Option<PathBuf> {
        // Only UUIDs are valid ids, which also keeps paths inside `dir`
        Uuid::parse_str(id).ok()?;
        Some(self.dir.join(format!("{FILE_PREFIX}{id}{FILE_SUFFIX}")))
    }

    /// Write the log under `existing_id`, or under a fresh id. Returns the id.
    pub fn save(&self, log: &ConversationLog, existing_id: Option<&str>) -> Result<String> {
        let id = existing_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let path = self.path_for(&id).ok_or_else(|| Error::NotFound(id.clone()))?;

        let record = SavedConversation {
            id: id.clone(),
            model: log.model,
            messages: log.messages.clone(),
        };
        let content = serde_json::to_string_pretty(&record).map_err(io::Error::other)?;

        fs::create_dir_all(&self.dir)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;

        debug!(%id, messages = record.messages.len(), "Saved conversation");
        Ok(id)
    }

    /// Load a saved conversation by id
    pub fn load(&self, id: &str) -> Result<SavedConversation> {
        let path = self
            .path_for(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let record: SavedConversation =
            serde_json::from_str(&content).map_err(|e| Error::corrupt(id, e))?;
        if record.id != id {
            return Err(Error::corrupt(
                id,
                format!("record carries id {}", record.id),
            ));
        }
        Ok(record)
    }

    /// Ids of all saved conversations, sorted
    pub fn list_ids(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name
                .strip_prefix(FILE_PREFIX)
                .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
            {
                if Uuid::parse_str(id).is_ok() {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
