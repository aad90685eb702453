//! # cf_assistant (library root)
//!
//! A personal notes assistant: notes are chunked, embedded and indexed on every
//! save, and questions are answered by an OpenAI-compatible model grounded on
//! the closest chunks.
//!
//! - Notes and rebuild-on-save (`notebook`), with an optional file watcher (`watcher`).
//! - Chunking, embedding and the persisted L2 index (`chunker`, `embeddings`,
//!   `vector_store`, `index_cache`, `retriever`).
//! - Prompt assembly and the chat API (`template`, `prompt`, `api`).
//! - Users, configuration and backup (`session`, `config`, `cloud`).
//! - CLI parsing (`commands`).
//!
//! ## On-disk layout
//! ```text
//! <data_dir>/users/<uid>/notes.txt
//! <data_dir>/users/<uid>/vectorstore/index.bin
//! <data_dir>/users/<uid>/vectorstore/index.yaml
//! <config_dir>/config.yaml
//! <config_dir>/templates/<name>.yaml
//! ```
//!
//! The directories come from [`directories::ProjectDirs`] with the triple
//! `("com", "cf-assistant", "cfa")`, e.g. `~/.config/cfa` and
//! `~/.local/share/cfa` on Linux.

use directories::ProjectDirs;
use std::path::PathBuf;

pub mod api;
pub mod chunker;
pub mod cloud;
pub mod commands;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod index_cache;
pub mod notebook;
pub mod prompt;
pub mod retriever;
pub mod session;
pub mod template;
pub mod vector_store;
pub mod watcher;

use crate::error::{Error, Result};

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "cf-assistant", "cfa")
        .ok_or_else(|| Error::Config("Unable to determine project directories".to_string()))
}

/// Return the per-platform configuration directory.
///
/// The directory is **not** created by this function.
///
/// # Errors
/// Returns an error if the platform directories cannot be determined (rare,
/// but possible without a home directory).
///
/// # Examples
/// ```no_run
/// let cfg = cf_assistant::config_dir().expect("has a config dir");
/// println!("config at {}", cfg.display());
/// ```
pub fn config_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().to_path_buf())
}

/// Return the per-platform data directory holding every user's notes and index.
pub fn data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// `<config_dir>/config.yaml`
pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.yaml"))
}
