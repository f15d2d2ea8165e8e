//! Token-budgeted chat memory for citechat

mod token;
mod window;

pub use token::{
    HeuristicTokenEstimator, TokenEstimator, estimate_message_tokens, estimate_tokens,
};
pub use window::{ChatMemoryWindow, WindowedMemory};
