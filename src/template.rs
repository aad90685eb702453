//! # Prompt templates
//!
//! A template is a small YAML document that controls the wording around the
//! retrieved notes:
//! - `system_prompt`: sent as the system message of every request,
//! - `instructions`: the opening paragraph of the assembled prompt,
//! - `notes_heading`, `history_heading`, `input_heading`: labels of the three
//!   prompt sections.
//!
//! Templates live under the configuration directory:
//!
//! ```text
//! <config_dir>/templates/<name>.yaml
//! ```
//!
//! ## Minimal YAML example
//!
//! ```yaml
//! system_prompt: "You are a concise AWS study assistant."
//! instructions: "Answer my input using the notes below."
//! # Optional, shown with their defaults:
//! # notes_heading: "Notes:"
//! # history_heading: "Conversation History:"
//! # input_heading: "My Input:"
//! ```

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::error::{Error, Result};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PromptTemplate {
    /// Global instruction used as the system message.
    pub system_prompt: String,

    /// Opening paragraph of the user prompt.
    pub instructions: String,

    #[serde(default = "default_notes_heading")]
    pub notes_heading: String,

    #[serde(default = "default_history_heading")]
    pub history_heading: String,

    #[serde(default = "default_input_heading")]
    pub input_heading: String,
}

fn default_notes_heading() -> String {
    "Notes:".to_string()
}

fn default_history_heading() -> String {
    "Conversation History:".to_string()
}

fn default_input_heading() -> String {
    "My Input:".to_string()
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            system_prompt: "You are a calm, focused cybersecurity and AWS assistant helping \
                            prepare for Cyber Fortress. Answer clearly and concisely. If code \
                            or CLI is required, show that first."
                .to_string(),
            instructions: "You will answer my input based on the provided notes, conversation \
                           history, and your own knowledge."
                .to_string(),
            notes_heading: default_notes_heading(),
            history_heading: default_history_heading(),
            input_heading: default_input_heading(),
        }
    }
}

/// Load a template by name from `<config_dir>/templates/<name>.yaml`.
///
/// ### Errors
/// Returns an error if the file cannot be read or is not a valid template.
pub fn load_template(config_dir: &Path, name: &str) -> Result<PromptTemplate> {
    let path = config_dir.join("templates").join(format!("{name}.yaml"));

    tracing::info!("Loading template: {}", path.display());

    let content = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
    let template: PromptTemplate = serde_yaml::from_str(&content)?;
    Ok(template)
}

/// Load the named template, or the built-in one when no name is configured.
pub fn resolve_template(config_dir: &Path, name: Option<&str>) -> Result<PromptTemplate> {
    match name {
        Some(name) => load_template(config_dir, name),
        None => Ok(PromptTemplate::default()),
    }
}

/// Write the built-in template as `<config_dir>/templates/default.yaml`.
pub fn write_default_template(config_dir: &Path) -> Result<()> {
    let dir = config_dir.join("templates");
    fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
    let path = dir.join("default.yaml");
    let yaml = serde_yaml::to_string(&PromptTemplate::default())?;
    fs::write(&path, yaml).map_err(|e| Error::io(&path, e))?;
    tracing::info!("Created template file: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_template_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let templates_dir = dir.path().join("templates");
        fs::create_dir_all(&templates_dir).unwrap();
        fs::write(
            templates_dir.join("terse.yaml"),
            r#"
system_prompt: "You are a helpful assistant."
instructions: "Use the notes."
notes_heading: "Context:"
"#,
        )
        .unwrap();

        let template = load_template(dir.path(), "terse").unwrap();
        assert_eq!(template.instructions, "Use the notes.");
        assert_eq!(template.notes_heading, "Context:");
        assert_eq!(template.history_heading, "Conversation History:");
    }

    #[test]
    fn test_load_template_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_template(dir.path(), "nope").is_err());
    }

    #[test]
    fn test_load_template_invalid_format() {
        let dir = tempfile::tempdir().unwrap();
        let templates_dir = dir.path().join("templates");
        fs::create_dir_all(&templates_dir).unwrap();
        fs::write(templates_dir.join("bad.yaml"), "invalid: template: format").unwrap();
        assert!(load_template(dir.path(), "bad").is_err());
    }

    #[test]
    fn test_default_template_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        write_default_template(dir.path()).unwrap();
        let loaded = resolve_template(dir.path(), Some("default")).unwrap();
        assert_eq!(loaded, PromptTemplate::default());
        assert_eq!(resolve_template(dir.path(), None).unwrap(), loaded);
    }
}
