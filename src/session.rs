//! # Sessions and chat history
//!
//! A [`UserSession`] is the identity of whoever is chatting plus the locations
//! of that user's note file and index directory. It is created when a command
//! starts and dropped when it ends; nothing about it is persisted.
//!
//! [`ChatHistory`] is the append-only message log of one conversation. It is
//! cleared only by an explicit [`ChatHistory::reset`] ("new chat").
//!
//! ## Layout
//! ```text
//! <data_dir>/users/<uid>/notes.txt
//! <data_dir>/users/<uid>/vectorstore/index.bin
//! <data_dir>/users/<uid>/vectorstore/index.yaml
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Identity plus the per-user paths the rest of the pipeline works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSession {
    pub uid: String,
    pub user_dir: PathBuf,
    pub notes_path: PathBuf,
    pub index_dir: PathBuf,
}

impl UserSession {
    /// Derive the session paths for `uid` under `data_dir`.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for an empty uid or one that would escape the
    /// `users/` directory.
    pub fn new(data_dir: impl AsRef<Path>, uid: &str) -> Result<Self> {
        let uid = uid.trim();
        if uid.is_empty() {
            return Err(Error::Config("user id must not be empty".into()));
        }
        if uid.contains(['/', '\\']) || uid == "." || uid == ".." {
            return Err(Error::Config(format!("invalid user id: {uid}")));
        }

        let user_dir = data_dir.as_ref().join("users").join(uid);
        Ok(Self {
            uid: uid.to_string(),
            notes_path: user_dir.join("notes.txt"),
            index_dir: user_dir.join("vectorstore"),
            user_dir,
        })
    }
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Label used in the rendered conversation history.
    pub fn label(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }

    /// Only user and assistant turns belong in the conversation history.
    pub fn is_conversational(&self) -> bool {
        matches!(self, Role::User | Role::Assistant)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Append-only conversation log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Start a new chat.
    pub fn reset(&mut self) {
        tracing::debug!("Clearing {} chat messages", self.messages.len());
        self.messages.clear();
    }
}
