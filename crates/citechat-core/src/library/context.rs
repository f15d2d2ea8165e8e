use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::identity::{EntryIdentity, GroupIdentity, NonPersistableReason, Persistence};

use super::entry::{BibEntry, EntryId, LinkedFile};
use super::group::{Group, GroupId};
use super::keygen::CitationKeyGenerator;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LibraryId(Uuid);

impl LibraryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LibraryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LibraryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Change notifications emitted by a library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryEvent {
    CitationKeyChanged {
        entry: EntryId,
        old: Option<String>,
        new: Option<String>,
    },
    EntryFilesChanged {
        entry: EntryId,
    },
    EntryRemoved {
        entry: EntryId,
    },
    GroupRenamed {
        group: GroupId,
        old_name: String,
        new_name: String,
    },
    GroupMembershipChanged {
        group: GroupId,
    },
}

#[derive(Default)]
struct LibraryState {
    entries: Vec<BibEntry>,
    groups: Vec<Group>,
}

/// An open bibliographic library: its entries, groups and file path.
///
/// Mutations that affect chat identities or retrieval scope are announced on
/// a broadcast channel; observers subscribe explicitly and unsubscribe by
/// dropping their receiver.
pub struct LibraryContext {
    id: LibraryId,
    path: RwLock<Option<PathBuf>>,
    state: RwLock<LibraryState>,
    events: broadcast::Sender<LibraryEvent>,
}

impl LibraryContext {
    /// A library that has not been saved to disk yet.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            id: LibraryId::new(),
            path: RwLock::new(None),
            state: RwLock::new(LibraryState::default()),
            events,
        }
    }

    pub fn with_path(path: impl AsRef<Path>) -> Self {
        let library = Self::new();
        library.set_path(path);
        library
    }

    pub fn id(&self) -> LibraryId {
        self.id
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.path.read().clone()
    }

    pub fn set_path(&self, path: impl AsRef<Path>) {
        *self.path.write() = Some(path.as_ref().to_path_buf());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: LibraryEvent) {
        debug!(library = %self.id, ?event, "Library event");
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    pub fn add_entry(&self, entry: BibEntry) -> EntryId {
        let id = entry.id;
        self.state.write().entries.push(entry);
        id
    }

    pub fn remove_entry(&self, id: EntryId) -> Option<BibEntry> {
        let removed = {
            let mut state = self.state.write();
            let position = state.entries.iter().position(|e| e.id == id)?;
            for group in &mut state.groups {
                group.entries.remove(&id);
            }
            state.entries.remove(position)
        };
        self.emit(LibraryEvent::EntryRemoved { entry: id });
        Some(removed)
    }

    pub fn entry(&self, id: EntryId) -> Option<BibEntry> {
        self.state.read().entries.iter().find(|e| e.id == id).cloned()
    }

    pub fn entries(&self) -> Vec<BibEntry> {
        self.state.read().entries.clone()
    }

    /// Entries for the given ids, in the given order; unknown ids are skipped.
    pub fn entries_by_ids(&self, ids: &[EntryId]) -> Vec<BibEntry> {
        let state = self.state.read();
        ids.iter()
            .filter_map(|id| state.entries.iter().find(|e| e.id == *id).cloned())
            .collect()
    }

    pub fn set_citation_key(&self, id: EntryId, key: Option<String>) -> Result<()> {
        let key = key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty());
        let old = {
            let mut state = self.state.write();
            let entry = state
                .entries
                .iter_mut()
                .find(|e| e.id == id)
                .ok_or_else(|| ChatError::UnknownEntry(id.to_string()))?;
            let old = entry.citation_key().map(str::to_string);
            if old == key {
                return Ok(());
            }
            entry.citation_key = key.clone();
            old
        };
        self.emit(LibraryEvent::CitationKeyChanged {
            entry: id,
            old,
            new: key,
        });
        Ok(())
    }

    /// Give the entry a generated citation key if it has none.
    ///
    /// Returns the entry's key afterwards, or `None` if nothing could be
    /// generated.
    pub fn ensure_citation_key(
        &self,
        id: EntryId,
        generator: &CitationKeyGenerator,
    ) -> Result<Option<String>> {
        let generated = {
            let state = self.state.read();
            let entry = state
                .entries
                .iter()
                .find(|e| e.id == id)
                .ok_or_else(|| ChatError::UnknownEntry(id.to_string()))?;
            if let Some(key) = entry.citation_key() {
                return Ok(Some(key.to_string()));
            }
            generator.generate(entry, state.entries.iter().filter_map(|e| e.citation_key()))
        };

        if let Some(key) = &generated {
            self.set_citation_key(id, Some(key.clone()))?;
        }
        Ok(generated)
    }

    pub fn citation_key_count(&self, key: &str) -> usize {
        self.state
            .read()
            .entries
            .iter()
            .filter(|e| e.citation_key() == Some(key))
            .count()
    }

    pub fn is_citation_key_unique(&self, key: &str) -> bool {
        self.citation_key_count(key) == 1
    }

    pub fn add_file(&self, id: EntryId, file: LinkedFile) -> Result<()> {
        {
            let mut state = self.state.write();
            let entry = state
                .entries
                .iter_mut()
                .find(|e| e.id == id)
                .ok_or_else(|| ChatError::UnknownEntry(id.to_string()))?;
            entry.files.push(file);
        }
        self.emit(LibraryEvent::EntryFilesChanged { entry: id });
        Ok(())
    }

    pub fn remove_file(&self, id: EntryId, link: &str) -> Result<()> {
        {
            let mut state = self.state.write();
            let entry = state
                .entries
                .iter_mut()
                .find(|e| e.id == id)
                .ok_or_else(|| ChatError::UnknownEntry(id.to_string()))?;
            entry.files.retain(|f| f.link != link);
        }
        self.emit(LibraryEvent::EntryFilesChanged { entry: id });
        Ok(())
    }

    /// The entry that owns a linked file, if any.
    pub fn entry_for_link(&self, link: &str) -> Option<BibEntry> {
        self.state
            .read()
            .entries
            .iter()
            .find(|e| e.has_file_link(link))
            .cloned()
    }

    pub fn add_group(&self, name: impl Into<String>) -> GroupId {
        let group = Group::new(name);
        let id = group.id;
        self.state.write().groups.push(group);
        id
    }

    pub fn group(&self, id: GroupId) -> Option<Group> {
        self.state.read().groups.iter().find(|g| g.id == id).cloned()
    }

    pub fn groups(&self) -> Vec<Group> {
        self.state.read().groups.clone()
    }

    pub fn rename_group(&self, id: GroupId, new_name: impl Into<String>) -> Result<()> {
        let new_name = new_name.into();
        let old_name = {
            let mut state = self.state.write();
            let group = state
                .groups
                .iter_mut()
                .find(|g| g.id == id)
                .ok_or_else(|| ChatError::UnknownGroup(id.to_string()))?;
            if group.name == new_name {
                return Ok(());
            }
            std::mem::replace(&mut group.name, new_name.clone())
        };
        self.emit(LibraryEvent::GroupRenamed {
            group: id,
            old_name,
            new_name,
        });
        Ok(())
    }

    pub fn assign_to_group(&self, group: GroupId, entry: EntryId) -> Result<()> {
        self.update_membership(group, |g| g.entries.insert(entry))
    }

    pub fn unassign_from_group(&self, group: GroupId, entry: EntryId) -> Result<()> {
        self.update_membership(group, |g| g.entries.remove(&entry))
    }

    fn update_membership(&self, id: GroupId, update: impl FnOnce(&mut Group) -> bool) -> Result<()> {
        let changed = {
            let mut state = self.state.write();
            let group = state
                .groups
                .iter_mut()
                .find(|g| g.id == id)
                .ok_or_else(|| ChatError::UnknownGroup(id.to_string()))?;
            update(group)
        };
        if changed {
            self.emit(LibraryEvent::GroupMembershipChanged { group: id });
        }
        Ok(())
    }

    pub fn group_entries(&self, id: GroupId) -> Vec<BibEntry> {
        let state = self.state.read();
        match state.groups.iter().find(|g| g.id == id) {
            Some(group) => state
                .entries
                .iter()
                .filter(|e| group.contains(e.id))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Persistence identity of an entry's conversation, derived from the
    /// current citation key and library path.
    pub fn entry_identity(&self, id: EntryId) -> Persistence<EntryIdentity> {
        let Some(entry) = self.entry(id) else {
            return Persistence::NonPersistable(NonPersistableReason::UnknownEntry);
        };
        let Some(key) = entry.citation_key() else {
            return Persistence::NonPersistable(NonPersistableReason::MissingCitationKey);
        };
        if !self.is_citation_key_unique(key) {
            return Persistence::NonPersistable(NonPersistableReason::DuplicateCitationKey(
                key.to_string(),
            ));
        }
        match self.path() {
            Some(library_path) => Persistence::Persistable(EntryIdentity {
                library_path,
                citation_key: key.to_string(),
            }),
            None => Persistence::NonPersistable(NonPersistableReason::MissingLibraryPath),
        }
    }

    pub fn group_identity(&self, id: GroupId) -> Persistence<GroupIdentity> {
        let Some(group) = self.group(id) else {
            return Persistence::NonPersistable(NonPersistableReason::UnknownGroup);
        };
        match self.path() {
            Some(library_path) => Persistence::Persistable(GroupIdentity {
                library_id: self.id,
                library_path,
                group_name: group.name,
            }),
            None => Persistence::NonPersistable(NonPersistableReason::MissingLibraryPath),
        }
    }
}

impl Default for LibraryContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LibraryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("LibraryContext")
            .field("id", &self.id)
            .field("path", &self.path())
            .field("entries", &state.entries.len())
            .field("groups", &state.groups.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library_with(entries: Vec<BibEntry>) -> LibraryContext {
        let library = LibraryContext::with_path("/tmp/library.bib");
        for entry in entries {
            library.add_entry(entry);
        }
        library
    }

    #[test]
    fn test_entry_identity_persistable() {
        let entry = BibEntry::new("article").with_citation_key("Smith2020");
        let id = entry.id();
        let library = library_with(vec![entry]);

        let identity = library.entry_identity(id).into_identity().unwrap();
        assert_eq!(identity.citation_key, "Smith2020");
        assert_eq!(identity.library_path, PathBuf::from("/tmp/library.bib"));
    }

    #[test]
    fn test_entry_identity_duplicate_key() {
        let a = BibEntry::new("article").with_citation_key("Dup");
        let b = BibEntry::new("article").with_citation_key("Dup");
        let id = a.id();
        let library = library_with(vec![a, b]);

        assert_eq!(
            library.entry_identity(id),
            Persistence::NonPersistable(NonPersistableReason::DuplicateCitationKey("Dup".into()))
        );
    }

    #[test]
    fn test_entry_identity_missing_key_and_path() {
        let entry = BibEntry::new("article");
        let id = entry.id();
        let library = library_with(vec![entry]);
        assert_eq!(
            library.entry_identity(id),
            Persistence::NonPersistable(NonPersistableReason::MissingCitationKey)
        );

        let keyed = BibEntry::new("article").with_citation_key("K");
        let keyed_id = keyed.id();
        let unsaved = LibraryContext::new();
        unsaved.add_entry(keyed);
        assert_eq!(
            unsaved.entry_identity(keyed_id),
            Persistence::NonPersistable(NonPersistableReason::MissingLibraryPath)
        );
    }

    #[test]
    fn test_group_identity_requires_path() {
        let unsaved = LibraryContext::new();
        let group = unsaved.add_group("Reading");
        assert!(!unsaved.group_identity(group).is_persistable());

        unsaved.set_path("/tmp/saved.bib");
        let identity = unsaved.group_identity(group).into_identity().unwrap();
        assert_eq!(identity.group_name, "Reading");
        assert_eq!(identity.library_id, unsaved.id());
    }

    #[tokio::test]
    async fn test_set_citation_key_emits_event() {
        let entry = BibEntry::new("article").with_citation_key("Old");
        let id = entry.id();
        let library = library_with(vec![entry]);
        let mut rx = library.subscribe();

        library.set_citation_key(id, Some("New".into())).unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            LibraryEvent::CitationKeyChanged {
                entry: id,
                old: Some("Old".into()),
                new: Some("New".into()),
            }
        );
        assert_eq!(library.entry(id).unwrap().citation_key(), Some("New"));
    }

    #[test]
    fn test_set_same_citation_key_is_silent() {
        let entry = BibEntry::new("article").with_citation_key("Same");
        let id = entry.id();
        let library = library_with(vec![entry]);
        let mut rx = library.subscribe();

        library.set_citation_key(id, Some("Same".into())).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_ensure_citation_key_generates_unique() {
        let existing = BibEntry::new("article").with_citation_key("Smith2020");
        let missing = BibEntry::new("article")
            .with_field("author", "Smith, Jane")
            .with_field("year", "2020");
        let id = missing.id();
        let library = library_with(vec![existing, missing]);

        let key = library
            .ensure_citation_key(id, &CitationKeyGenerator::new())
            .unwrap();
        assert_eq!(key.as_deref(), Some("Smith2020a"));
        assert!(library.entry_identity(id).is_persistable());
    }

    #[test]
    fn test_entry_for_link() {
        let entry = BibEntry::new("article")
            .with_citation_key("Linked")
            .with_file(LinkedFile::new("docs/linked.pdf"));
        let library = library_with(vec![entry]);

        assert_eq!(
            library.entry_for_link("docs/linked.pdf").unwrap().citation_key(),
            Some("Linked")
        );
        assert!(library.entry_for_link("docs/other.pdf").is_none());
    }

    #[tokio::test]
    async fn test_group_rename_and_membership() {
        let entry = BibEntry::new("article").with_citation_key("Member");
        let entry_id = entry.id();
        let library = library_with(vec![entry]);
        let group = library.add_group("Old name");
        let mut rx = library.subscribe();

        library.assign_to_group(group, entry_id).unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            LibraryEvent::GroupMembershipChanged { group }
        );
        assert_eq!(library.group_entries(group).len(), 1);

        library.rename_group(group, "New name").unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            LibraryEvent::GroupRenamed {
                group,
                old_name: "Old name".into(),
                new_name: "New name".into(),
            }
        );
    }

    #[test]
    fn test_remove_entry_drops_group_membership() {
        let entry = BibEntry::new("article");
        let entry_id = entry.id();
        let library = library_with(vec![entry]);
        let group = library.add_group("G");
        library.assign_to_group(group, entry_id).unwrap();

        assert!(library.remove_entry(entry_id).is_some());
        assert!(library.group(group).unwrap().entries.is_empty());
        assert!(library.entry(entry_id).is_none());
    }
}
