use std::collections::BTreeSet;

use citechat_core::{BibEntry, MetadataFilter};

/// Derives the search scope of a conversation from its subject entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetrievalFilterBuilder;

impl RetrievalFilterBuilder {
    /// `None` means unfiltered search: no subject entry has a linked file.
    pub fn build(entries: &[BibEntry]) -> Option<MetadataFilter> {
        let links: BTreeSet<String> = entries
            .iter()
            .flat_map(|entry| entry.files.iter())
            .map(|file| file.link.clone())
            .filter(|link| !link.is_empty())
            .collect();

        if links.is_empty() {
            None
        } else {
            Some(MetadataFilter::link_in(links))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use citechat_core::{LinkedFile, TextSegment};

    #[test]
    fn test_no_entries_no_filter() {
        assert_eq!(RetrievalFilterBuilder::build(&[]), None);
    }

    #[test]
    fn test_entry_without_files_no_filter() {
        let entry = BibEntry::new("article").with_citation_key("Smith2020");
        assert_eq!(RetrievalFilterBuilder::build(&[entry]), None);
    }

    #[test]
    fn test_filter_matches_only_linked_files() {
        let entry = BibEntry::new("article").with_file(LinkedFile::new("papers/x.pdf"));
        let filter = RetrievalFilterBuilder::build(&[entry]).unwrap();

        assert!(filter.matches(&TextSegment::new("t").with_link("papers/x.pdf").metadata));
        assert!(!filter.matches(&TextSegment::new("t").with_link("papers/y.pdf").metadata));
    }

    #[test]
    fn test_filter_unions_all_entries() {
        let a = BibEntry::new("article").with_file(LinkedFile::new("a.pdf"));
        let b = BibEntry::new("book")
            .with_file(LinkedFile::new("b.pdf"))
            .with_file(LinkedFile::new("a.pdf"));

        match RetrievalFilterBuilder::build(&[a, b]) {
            Some(MetadataFilter::IsIn { key, values }) => {
                assert_eq!(key, "link");
                assert_eq!(values.len(), 2);
            }
            other => panic!("unexpected filter {:?}", other),
        }
    }
}
