use serde::{Deserialize, Serialize};

use citechat_core::{EmbeddingMatch, LibraryContext};

/// Retrieved text plus the citation key of the entry it came from.
/// The key is empty when no entry owns the segment's link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Excerpt {
    pub citation_key: String,
    pub text: String,
}

impl Excerpt {
    pub fn new(citation_key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            citation_key: citation_key.into(),
            text: text.into(),
        }
    }
}

/// Map search matches back to their owning entries. Unresolvable matches
/// are kept with an empty key; order is preserved.
pub fn resolve_excerpts(library: &LibraryContext, matches: Vec<EmbeddingMatch>) -> Vec<Excerpt> {
    matches
        .into_iter()
        .map(|m| {
            let citation_key = m
                .segment
                .link()
                .and_then(|link| library.entry_for_link(link))
                .and_then(|entry| entry.citation_key().map(str::to_string))
                .unwrap_or_default();
            Excerpt {
                citation_key,
                text: m.segment.text,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use citechat_core::{BibEntry, LinkedFile, TextSegment};

    fn hit(text: &str, link: Option<&str>) -> EmbeddingMatch {
        let segment = match link {
            Some(link) => TextSegment::new(text).with_link(link),
            None => TextSegment::new(text),
        };
        EmbeddingMatch {
            score: 0.9,
            segment,
        }
    }

    #[test]
    fn test_resolve_known_and_unknown_links() {
        let library = LibraryContext::new();
        library.add_entry(
            BibEntry::new("article")
                .with_citation_key("Smith2020")
                .with_file(LinkedFile::new("smith.pdf")),
        );
        library.add_entry(BibEntry::new("article").with_file(LinkedFile::new("nokey.pdf")));

        let excerpts = resolve_excerpts(
            &library,
            vec![
                hit("first", Some("smith.pdf")),
                hit("second", Some("elsewhere.pdf")),
                hit("third", None),
                hit("fourth", Some("nokey.pdf")),
            ],
        );

        assert_eq!(
            excerpts,
            vec![
                Excerpt::new("Smith2020", "first"),
                Excerpt::new("", "second"),
                Excerpt::new("", "third"),
                Excerpt::new("", "fourth"),
            ]
        );
    }
}
