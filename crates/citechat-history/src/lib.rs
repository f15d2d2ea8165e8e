//! Conversation histories for library entries and groups, loaded lazily from
//! a persistence backend and written back on close

mod record;
mod store;

pub use store::ChatHistoryStore;
