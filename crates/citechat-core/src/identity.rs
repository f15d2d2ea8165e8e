//! Persistence identities for conversation histories

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::library::LibraryId;

/// Backend key of a stored history. Entry keys and group names live in
/// separate namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum HistoryKey {
    Entry(String),
    Group(String),
}

impl HistoryKey {
    pub fn namespace(&self) -> &'static str {
        match self {
            HistoryKey::Entry(_) => "entry",
            HistoryKey::Group(_) => "group",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            HistoryKey::Entry(name) | HistoryKey::Group(name) => name,
        }
    }
}

impl fmt::Display for HistoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace(), self.name())
    }
}

/// (library path, citation key) of an entry whose key is present and unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryIdentity {
    pub library_path: PathBuf,
    pub citation_key: String,
}

impl EntryIdentity {
    pub fn history_key(&self) -> HistoryKey {
        HistoryKey::Entry(self.citation_key.clone())
    }
}

/// (library id, group name) of a group in a library that has a file path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupIdentity {
    pub library_id: LibraryId,
    pub library_path: PathBuf,
    pub group_name: String,
}

impl GroupIdentity {
    pub fn history_key(&self) -> HistoryKey {
        HistoryKey::Group(self.group_name.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NonPersistableReason {
    UnknownEntry,
    UnknownGroup,
    MissingCitationKey,
    DuplicateCitationKey(String),
    MissingLibraryPath,
    LibraryClosed,
}

impl fmt::Display for NonPersistableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NonPersistableReason::UnknownEntry => write!(f, "entry is not in the library"),
            NonPersistableReason::UnknownGroup => write!(f, "group is not in the library"),
            NonPersistableReason::MissingCitationKey => write!(f, "entry has no citation key"),
            NonPersistableReason::DuplicateCitationKey(key) => {
                write!(f, "citation key '{}' is not unique", key)
            }
            NonPersistableReason::MissingLibraryPath => write!(f, "library has no file path"),
            NonPersistableReason::LibraryClosed => write!(f, "library is no longer open"),
        }
    }
}

/// Result of the persistability check. Non-persistable conversations live in
/// memory only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persistence<I> {
    Persistable(I),
    NonPersistable(NonPersistableReason),
}

impl<I> Persistence<I> {
    pub fn is_persistable(&self) -> bool {
        matches!(self, Persistence::Persistable(_))
    }

    pub fn identity(&self) -> Option<&I> {
        match self {
            Persistence::Persistable(identity) => Some(identity),
            Persistence::NonPersistable(_) => None,
        }
    }

    pub fn into_identity(self) -> Option<I> {
        match self {
            Persistence::Persistable(identity) => Some(identity),
            Persistence::NonPersistable(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_key_display() {
        assert_eq!(HistoryKey::Entry("Smith2020".into()).to_string(), "entry:Smith2020");
        assert_eq!(HistoryKey::Group("Reading".into()).to_string(), "group:Reading");
    }

    #[test]
    fn test_persistence_accessors() {
        let p: Persistence<u8> = Persistence::Persistable(1);
        assert!(p.is_persistable());
        assert_eq!(p.identity(), Some(&1));

        let n: Persistence<u8> =
            Persistence::NonPersistable(NonPersistableReason::MissingCitationKey);
        assert!(!n.is_persistable());
        assert_eq!(n.into_identity(), None);
    }
}
