//! Prompt templates for the system message, the grounded user message and
//! follow-up question generation

mod loader;
mod renderer;
mod templates;

pub use loader::{TemplateLoader, TemplatesConfig};
pub use renderer::TemplateRenderer;
pub use templates::{
    AiTemplateKind, AiTemplates, DEFAULT_FOLLOW_UP_TEMPLATE, DEFAULT_SYSTEM_MESSAGE_TEMPLATE,
    DEFAULT_USER_MESSAGE_TEMPLATE,
};
