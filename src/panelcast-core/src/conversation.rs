//! Scripted conversation driver.
//!
//! Plays a [`Script`] through the relay one utterance at a time: each line
//! is enqueued on its speaker's channel and the driver waits for the queue
//! to drain before moving on. Between topics it polls the audience-question
//! source once and delivers any question on the audience channel.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::audience::{FileQuestionSource, QuestionSource};
use crate::config::AudienceConfig;
use crate::error::PanelError;
use crate::relay::Relay;
use crate::script::{Script, Speaker};

/// A line as it was handed to the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscriptEntry {
    /// Topic in progress, `None` for the opening and closing.
    pub topic: Option<String>,
    pub speaker: Speaker,
    pub text: String,
}

/// Callback for conversation events.
pub type ConversationCallback = Box<dyn Fn(ConversationEvent) + Send + Sync>;

/// Callback shared across every run started by a [`ConversationRunner`].
pub type SharedConversationCallback = Arc<dyn Fn(ConversationEvent) + Send + Sync>;

/// Events emitted while a conversation plays.
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    /// A new topic is starting.
    TopicStart { name: String },
    /// A line was queued for delivery.
    Utterance { speaker: Speaker, text: String },
    /// An audience question was taken from the source.
    AudienceQuestion { question: String },
    /// The conversation has finished or was stopped.
    ConversationEnd { completed: bool },
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub transcript: Vec<TranscriptEntry>,
    /// False when the run was cancelled before the closing line.
    pub completed: bool,
}

/// Plays a script through the relay.
pub struct ScriptDriver {
    relay: Arc<Relay>,
    script: Script,
    questions: Option<Box<dyn QuestionSource>>,
    transcript: Vec<TranscriptEntry>,
    callback: Option<ConversationCallback>,
}

impl ScriptDriver {
    pub fn new(relay: Arc<Relay>, script: Script) -> Self {
        Self {
            relay,
            script,
            questions: None,
            transcript: Vec::new(),
            callback: None,
        }
    }

    /// Poll this source for audience questions after each topic.
    pub fn with_questions(mut self, questions: Box<dyn QuestionSource>) -> Self {
        self.questions = Some(questions);
        self
    }

    /// Set a callback for conversation events.
    pub fn with_callback(mut self, callback: ConversationCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Run the full script, stopping early if `cancel` fires.
    pub async fn run(
        mut self,
        cancel: CancellationToken,
    ) -> Result<ConversationSummary, PanelError> {
        let completed = self.play(&cancel).await?;
        self.emit_event(ConversationEvent::ConversationEnd { completed });
        info!(
            title = %self.script.title,
            completed,
            utterances = self.transcript.len(),
            "conversation finished"
        );
        Ok(ConversationSummary {
            transcript: self.transcript,
            completed,
        })
    }

    async fn play(&mut self, cancel: &CancellationToken) -> Result<bool, PanelError> {
        info!(
            title = %self.script.title,
            topics = self.script.topics.len(),
            "conversation starting"
        );

        if let Some(opening) = self.script.opening.clone() {
            if !self.speak(None, Speaker::Host, &opening, cancel).await? {
                return Ok(false);
            }
        }

        let topics = self.script.topics.clone();
        for topic in &topics {
            self.emit_event(ConversationEvent::TopicStart {
                name: topic.name.clone(),
            });

            for line in &topic.lines {
                if !self
                    .speak(Some(&topic.name), line.speaker, &line.text, cancel)
                    .await?
                {
                    return Ok(false);
                }
            }

            if let Some(question) = self.poll_question().await {
                self.emit_event(ConversationEvent::AudienceQuestion {
                    question: question.clone(),
                });
                if !self
                    .speak(Some(&topic.name), Speaker::Audience, &question, cancel)
                    .await?
                {
                    return Ok(false);
                }
            }
        }

        if let Some(closing) = self.script.closing.clone() {
            if !self.speak(None, Speaker::Host, &closing, cancel).await? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Queue one line and wait for the relay to drain.
    ///
    /// Returns false if cancelled before or while waiting.
    async fn speak(
        &mut self,
        topic: Option<&str>,
        speaker: Speaker,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, PanelError> {
        if cancel.is_cancelled() {
            return Ok(false);
        }

        self.relay.enqueue(text, speaker.channel())?;
        self.transcript.push(TranscriptEntry {
            topic: topic.map(str::to_string),
            speaker,
            text: text.to_string(),
        });
        self.emit_event(ConversationEvent::Utterance {
            speaker,
            text: text.to_string(),
        });

        tokio::select! {
            _ = cancel.cancelled() => Ok(false),
            _ = self.relay.wait_until_drained() => Ok(true),
        }
    }

    /// A failing source never stops the show; it just yields no question.
    async fn poll_question(&self) -> Option<String> {
        let source = self.questions.as_ref()?;
        match source.next_question().await {
            Ok(question) => question,
            Err(e) => {
                warn!(error = %e, "failed to poll audience questions");
                None
            }
        }
    }

    /// Emit an event if a callback is registered.
    fn emit_event(&self, event: ConversationEvent) {
        if let Some(ref callback) = self.callback {
            callback(event);
        }
    }
}

struct RunningConversation {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Starts and stops the configured script on behalf of the admin surface.
pub struct ConversationRunner {
    relay: Arc<Relay>,
    script_path: Option<PathBuf>,
    audience: AudienceConfig,
    callback: Mutex<Option<SharedConversationCallback>>,
    running: Mutex<Option<RunningConversation>>,
}

impl ConversationRunner {
    pub fn new(relay: Arc<Relay>, script_path: Option<PathBuf>, audience: AudienceConfig) -> Self {
        Self {
            relay,
            script_path,
            audience,
            callback: Mutex::new(None),
            running: Mutex::new(None),
        }
    }

    /// Receive events from every subsequently started run.
    pub fn set_callback(&self, callback: SharedConversationCallback) {
        *self.callback.lock() = Some(callback);
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    /// Load the configured script and start playing it in the background.
    pub async fn start(&self) -> Result<String, PanelError> {
        if self.is_running() {
            return Err(PanelError::ConversationRunning);
        }
        let path = self
            .script_path
            .as_ref()
            .ok_or_else(|| PanelError::Config("No conversation script configured".to_string()))?;
        let script = Script::load(path)?;
        let title = script.title.clone();

        let questions = FileQuestionSource::new(&self.audience.submissions_path);
        if self.audience.clear_on_start {
            questions.clear().await?;
        }
        let mut driver = ScriptDriver::new(Arc::clone(&self.relay), script)
            .with_questions(Box::new(questions));
        if let Some(callback) = self.callback.lock().clone() {
            driver = driver.with_callback(Box::new(move |event| callback(event)));
        }

        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            return Err(PanelError::ConversationRunning);
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if let Err(e) = driver.run(cancel).await {
                    error!(error = %e, "conversation aborted");
                }
            }
        });
        *running = Some(RunningConversation { cancel, task });
        Ok(title)
    }

    /// Cancel the running conversation. Returns whether one was running.
    pub fn stop(&self) -> bool {
        match self.running.lock().take() {
            Some(running) => {
                let was_running = !running.task.is_finished();
                running.cancel.cancel();
                was_running
            }
            None => false,
        }
    }
}
