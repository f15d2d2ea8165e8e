//! Bibliographic library model: entries, linked files, groups

mod context;
mod entry;
mod group;
mod keygen;

pub use context::{LibraryContext, LibraryEvent, LibraryId};
pub use entry::{BibEntry, EntryId, LinkedFile};
pub use group::{Group, GroupId};
pub use keygen::CitationKeyGenerator;
