use citechat_core::{BibEntry, EntryId, GroupId, LibraryContext, LibraryEvent};

/// What a conversation is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatSubject {
    Entry(EntryId),
    /// All entries currently assigned to the group.
    Group(GroupId),
}

impl ChatSubject {
    pub fn entries(&self, library: &LibraryContext) -> Vec<BibEntry> {
        match self {
            ChatSubject::Entry(id) => library.entry(*id).into_iter().collect(),
            ChatSubject::Group(id) => library.group_entries(*id),
        }
    }

    /// Conversation title: the citation key or group name.
    pub fn display_name(&self, library: &LibraryContext) -> String {
        match self {
            ChatSubject::Entry(id) => library
                .entry(*id)
                .and_then(|e| e.citation_key().map(str::to_string))
                .unwrap_or_else(|| "untitled entry".to_string()),
            ChatSubject::Group(id) => library
                .group(*id)
                .map(|g| g.name)
                .unwrap_or_else(|| "unknown group".to_string()),
        }
    }

    /// Whether `event` can change the subject entries, their files or the
    /// conversation name. `current` are the subject entries as last seen.
    pub fn is_affected_by(&self, event: &LibraryEvent, current: &[BibEntry]) -> bool {
        let touches_current = |entry: &EntryId| current.iter().any(|e| e.id() == *entry);
        match (self, event) {
            (ChatSubject::Group(id), LibraryEvent::GroupRenamed { group, .. })
            | (ChatSubject::Group(id), LibraryEvent::GroupMembershipChanged { group }) => {
                id == group
            }
            (_, LibraryEvent::CitationKeyChanged { entry, .. })
            | (_, LibraryEvent::EntryFilesChanged { entry })
            | (_, LibraryEvent::EntryRemoved { entry }) => touches_current(entry),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use citechat_core::LinkedFile;

    #[test]
    fn test_entry_subject() {
        let library = LibraryContext::new();
        let id = library.add_entry(BibEntry::new("article").with_citation_key("Smith2020"));
        let subject = ChatSubject::Entry(id);

        assert_eq!(subject.entries(&library).len(), 1);
        assert_eq!(subject.display_name(&library), "Smith2020");

        let current = subject.entries(&library);
        assert!(subject.is_affected_by(&LibraryEvent::EntryFilesChanged { entry: id }, &current));
        let other = library.add_entry(BibEntry::new("article"));
        assert!(!subject.is_affected_by(
            &LibraryEvent::EntryFilesChanged { entry: other },
            &current
        ));
    }

    #[test]
    fn test_group_subject_follows_membership() {
        let library = LibraryContext::new();
        let group = library.add_group("Reading");
        let a = library.add_entry(
            BibEntry::new("article").with_file(LinkedFile::new("a.pdf")),
        );
        let b = library.add_entry(BibEntry::new("article"));
        library.assign_to_group(group, a).unwrap();

        let subject = ChatSubject::Group(group);
        let current = subject.entries(&library);
        assert_eq!(current.len(), 1);
        assert_eq!(subject.display_name(&library), "Reading");

        assert!(subject.is_affected_by(
            &LibraryEvent::GroupMembershipChanged { group },
            &current
        ));
        assert!(subject.is_affected_by(&LibraryEvent::EntryFilesChanged { entry: a }, &current));
        assert!(!subject.is_affected_by(&LibraryEvent::EntryFilesChanged { entry: b }, &current));

        library.assign_to_group(group, b).unwrap();
        assert_eq!(subject.entries(&library).len(), 2);
    }
}
