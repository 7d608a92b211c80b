//! Model catalog: the closed set of backend models and their wire strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// A model selectable on the chat backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelType {
    #[default]
    #[serde(rename = "claude-3-haiku-20240307")]
    Claude,
    #[serde(rename = "meta-llama/Llama-3-70b-chat-hf")]
    Llama,
    #[serde(rename = "gpt-4o-mini")]
    Gpt4oMini,
    #[serde(rename = "mistralai/Mixtral-8x7B-Instruct-v0.1")]
    Mixtral,
}

impl ModelType {
    /// Every model in the catalog, in display order
    pub const ALL: [ModelType; 4] = [
        ModelType::Claude,
        ModelType::Llama,
        ModelType::Gpt4oMini,
        ModelType::Mixtral,
    ];

    /// The string the backend expects in the `model` field
    pub fn wire_name(&self) -> &'static str {
        match self {
            ModelType::Claude => "claude-3-haiku-20240307",
            ModelType::Llama => "meta-llama/Llama-3-70b-chat-hf",
            ModelType::Gpt4oMini => "gpt-4o-mini",
            ModelType::Mixtral => "mistralai/Mixtral-8x7B-Instruct-v0.1",
        }
    }

    /// Short human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            ModelType::Claude => "Claude",
            ModelType::Llama => "Llama",
            ModelType::Gpt4oMini => "GPT4oMini",
            ModelType::Mixtral => "Mixtral",
        }
    }

    /// Look up a model by its wire string
    pub fn from_wire(wire: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.wire_name() == wire)
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for ModelType {
    type Err = Error;

    /// Accepts a display name (case-insensitive) or a wire string
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(model) = Self::from_wire(s) {
            return Ok(model);
        }
        match s.to_lowercase().as_str() {
            "claude" => Ok(ModelType::Claude),
            "llama" => Ok(ModelType::Llama),
            "gpt4o" | "gpt4omini" | "gpt-4o-mini" => Ok(ModelType::Gpt4oMini),
            "mixtral" => Ok(ModelType::Mixtral),
            _ => Err(Error::UnknownModel(s.to_string())),
        }
    }
}
