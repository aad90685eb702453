//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a `Cli` struct that represents the parsed command-line arguments,
//! and a `Commands` enum that represents the available subcommands and their
//! options.
//!
//! # Examples
//!
//! ```no_run
//! use clap::Parser;
//! use cf_assistant::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! if let Commands::Ask { question, .. } = cli.command {
//!     println!("asking: {question}");
//! }
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// User whose notes and index to use. Falls back to `user` in the config file.
    #[arg(long, short = 'u', global = true, env = "CFA_USER")]
    pub user: Option<String>,

    /// Path to the configuration file. Defaults to `<config_dir>/config.yaml`.
    #[arg(long, short = 'c', global = true, env = "CFA_CONFIG")]
    pub config: Option<PathBuf>,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Write a default configuration file and prompt template.
    Init,

    /// Read or change your notes. Every change rebuilds the index.
    Notes {
        #[command(subcommand)]
        action: NotesAction,
    },

    /// Rebuild the index from the notes on disk.
    Rebuild,

    /// Show where the notes and index live and whether the index is up to date.
    Status,

    /// Ask one question about your notes.
    #[clap(name = "ask", alias = "a")]
    Ask {
        question: String,

        /// Sampling temperature in [0.0, 1.0].
        #[arg(long, short = 't', value_parser = parse_temperature)]
        temperature: Option<f32>,

        /// Number of note chunks to retrieve.
        #[arg(long, short = 'k')]
        top_k: Option<usize>,
    },

    /// Chat about your notes. `/new` starts over, `/append <text>` adds a note,
    /// `/exit` quits.
    #[clap(name = "chat", alias = "i")]
    Chat {
        #[arg(long, short = 't', value_parser = parse_temperature)]
        temperature: Option<f32>,
    },

    /// Watch the note file and rebuild the index when it changes.
    Watch {
        /// Minimum seconds between two rebuilds.
        #[arg(long)]
        debounce_secs: Option<u64>,
    },

    /// Upload the notes and index to the configured document store.
    Backup,

    /// Download the notes and index from the configured document store.
    Restore,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum NotesAction {
    /// Print the notes.
    Show,

    /// Replace the notes with the contents of a file, or stdin when no file is given.
    Set { file: Option<PathBuf> },

    /// Add a line to the end of the notes.
    Append { text: String },
}

fn parse_temperature(s: &str) -> Result<f32, String> {
    let value: f32 = s.parse().map_err(|_| format!("`{s}` is not a number"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("temperature must be within [0.0, 1.0], got {value}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ask_with_options() {
        let cli = Cli::try_parse_from(["cfa", "--user", "alice", "ask", "what is IAM?", "-t", "0.7", "-k", "2"])
            .unwrap();
        assert_eq!(cli.user.as_deref(), Some("alice"));
        match cli.command {
            Commands::Ask {
                question,
                temperature,
                top_k,
            } => {
                assert_eq!(question, "what is IAM?");
                assert_eq!(temperature, Some(0.7));
                assert_eq!(top_k, Some(2));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_temperature_out_of_range_is_rejected() {
        assert!(Cli::try_parse_from(["cfa", "ask", "q", "-t", "1.5"]).is_err());
        assert!(Cli::try_parse_from(["cfa", "chat", "-t", "abc"]).is_err());
    }

    #[test]
    fn test_notes_subcommands() {
        let cli = Cli::try_parse_from(["cfa", "notes", "append", "new fact"]).unwrap();
        match cli.command {
            Commands::Notes { action } => assert_eq!(
                action,
                NotesAction::Append {
                    text: "new fact".to_string()
                }
            ),
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["cfa", "notes", "set"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Notes {
                action: NotesAction::Set { file: None }
            }
        ));
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let cli = Cli::try_parse_from(["cfa", "status", "--config", "/tmp/cfa.yaml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/cfa.yaml")));
    }
}
