//! Panelcast Core Library
//!
//! Real-time delivery relay for a staged panel conversation: subscribers
//! attach to the `left`, `right` and `audience` channels, producers queue
//! utterances, and a single dispatcher delivers them one at a time while
//! honouring the speaking flags reported back by the viewers.

pub mod audience;
pub mod channel;
pub mod config;
pub mod conversation;
mod dispatcher;
pub mod drain;
pub mod error;
pub mod payload;
pub mod queue;
pub mod relay;
pub mod script;
pub mod server;
pub mod session;
pub mod speaking;

pub use audience::{FileQuestionSource, QuestionSource};
pub use channel::{Channel, ChannelRegistry, Connection, ConnectionId};
pub use config::Config;
pub use conversation::{
    ConversationEvent, ConversationRunner, ConversationSummary, ScriptDriver, TranscriptEntry,
};
pub use dispatcher::DispatchOutcome;
pub use error::PanelError;
pub use payload::{InboundFrame, OutboundPayload, SpeakingUpdate};
pub use queue::{DeliveryQueue, QueueItem, SequenceKey};
pub use relay::Relay;
pub use script::{Script, ScriptLine, Speaker, Topic};
pub use server::ServerHandle;
pub use speaking::SpeakingState;
