//! Chat sessions: preferences, follow-up questions, the retrieval-augmented
//! turn loop and the service that ties them to the history store

mod config;
mod follow_up;
mod orchestrator;
mod service;
mod session;
mod subject;

pub use config::{AiPreferences, FollowUpConfig, PreferencesHandle};
pub use follow_up::{FollowUpGenerator, parse_follow_up_questions};
pub use orchestrator::{ChatCollaborators, ChatOrchestrator};
pub use service::AiService;
pub use session::ChatSession;
pub use subject::ChatSubject;
