//! Audience-question sources.
//!
//! A source hands out at most one question per poll. The file-backed source
//! reads the submissions file written by the question form server: a JSON
//! array whose entries are objects with a `question` field (bare strings are
//! accepted too).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::PanelError;

#[async_trait]
pub trait QuestionSource: Send + Sync {
    /// Take the oldest pending question, if any.
    async fn next_question(&self) -> Result<Option<String>, PanelError>;

    /// Discard every pending question.
    async fn clear(&self) -> Result<(), PanelError>;
}

/// Questions stored in a JSON submissions file.
#[derive(Debug)]
pub struct FileQuestionSource {
    path: PathBuf,
    // Serializes read-modify-write cycles from this process.
    lock: Mutex<()>,
}

impl FileQuestionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> Result<Vec<Value>, PanelError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str::<Value>(&content)? {
            Value::Array(entries) => Ok(entries),
            _ => Err(PanelError::Audience(format!(
                "{} does not contain a JSON array",
                self.path.display()
            ))),
        }
    }

    async fn write_entries(&self, entries: &[Value]) -> Result<(), PanelError> {
        let content = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl QuestionSource for FileQuestionSource {
    async fn next_question(&self) -> Result<Option<String>, PanelError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;

        let Some((index, question)) = entries
            .iter()
            .enumerate()
            .find_map(|(i, entry)| question_text(entry).map(|q| (i, q)))
        else {
            return Ok(None);
        };

        entries.remove(index);
        self.write_entries(&entries).await?;
        debug!(remaining = entries.len(), "audience question taken");
        Ok(Some(question))
    }

    async fn clear(&self) -> Result<(), PanelError> {
        let _guard = self.lock.lock().await;
        self.write_entries(&[]).await?;
        info!(path = %self.path.display(), "audience submissions cleared");
        Ok(())
    }
}

fn question_text(entry: &Value) -> Option<String> {
    let text = match entry {
        Value::String(s) => s.as_str(),
        Value::Object(object) => object.get("question")?.as_str()?,
        _ => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
