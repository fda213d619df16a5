//! Conversation script definitions.
//!
//! A script is plain data: an optional opening and closing line for the
//! host and an ordered list of topics, each an ordered list of lines
//! attributed to a speaker. Speakers map onto delivery channels.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::channel::Channel;
use crate::error::PanelError;

/// Who delivers a line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Host,
    Guest,
    Audience,
}

impl Speaker {
    pub fn display_name(&self) -> &str {
        match self {
            Speaker::Host => "HOST",
            Speaker::Guest => "GUEST",
            Speaker::Audience => "AUDIENCE",
        }
    }

    /// The channel this speaker's lines are delivered on.
    pub fn channel(&self) -> Channel {
        match self {
            Speaker::Host => Channel::Left,
            Speaker::Guest => Channel::Right,
            Speaker::Audience => Channel::Audience,
        }
    }
}

/// A single scripted utterance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptLine {
    pub speaker: Speaker,
    pub text: String,
}

/// A topic within the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    /// Name of the topic (announced in the transcript).
    pub name: String,
    #[serde(default)]
    pub lines: Vec<ScriptLine>,
}

/// A full conversation script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub title: String,
    #[serde(default)]
    pub opening: Option<String>,
    #[serde(default)]
    pub closing: Option<String>,
    #[serde(default)]
    pub topics: Vec<Topic>,
}

impl Script {
    /// Load a script from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PanelError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| PanelError::Script(format!("Failed to read script: {}", e)))?;

        Self::from_str(&content)
    }

    /// Parse and validate a script from TOML content.
    pub fn from_str(content: &str) -> Result<Self, PanelError> {
        let script: Script = toml::from_str(content)
            .map_err(|e| PanelError::Script(format!("Failed to parse script: {}", e)))?;
        script.validate()?;
        Ok(script)
    }

    pub fn validate(&self) -> Result<(), PanelError> {
        if self.topics.is_empty() {
            return Err(PanelError::Script(
                "Script must contain at least one topic".to_string(),
            ));
        }

        for topic in &self.topics {
            if let Some(line) = topic.lines.iter().find(|l| l.text.trim().is_empty()) {
                return Err(PanelError::Script(format!(
                    "Topic '{}' has an empty {} line",
                    topic.name,
                    line.speaker.display_name()
                )));
            }
        }

        for (label, line) in [("opening", &self.opening), ("closing", &self.closing)] {
            if line.as_deref().is_some_and(|l| l.trim().is_empty()) {
                return Err(PanelError::Script(format!("The {} line is empty", label)));
            }
        }

        Ok(())
    }

    /// Total number of utterances, excluding audience questions.
    pub fn utterance_count(&self) -> usize {
        self.opening.iter().count()
            + self.topics.iter().map(|t| t.lines.len()).sum::<usize>()
            + self.closing.iter().count()
    }
}
