//! Citation key generation for entries that lack one

use super::entry::BibEntry;

/// Generates `[FirstAuthorSurname][Year]` keys, appending `a`, `b`, ... when
/// the key is already taken.
#[derive(Debug, Clone, Default)]
pub struct CitationKeyGenerator;

impl CitationKeyGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Returns `None` when the entry carries neither an author nor a year.
    pub fn generate<'a>(
        &self,
        entry: &BibEntry,
        existing: impl IntoIterator<Item = &'a str>,
    ) -> Option<String> {
        let base = format!(
            "{}{}",
            first_author_surname(entry).unwrap_or_default(),
            year(entry).unwrap_or_default()
        );
        if base.is_empty() {
            return None;
        }

        let existing: Vec<&str> = existing.into_iter().collect();
        if !existing.contains(&base.as_str()) {
            return Some(base);
        }

        ('a'..='z')
            .map(|suffix| format!("{}{}", base, suffix))
            .find(|candidate| !existing.contains(&candidate.as_str()))
    }
}

fn first_author_surname(entry: &BibEntry) -> Option<String> {
    let authors = entry.field("author").or_else(|| entry.field("editor"))?;
    let first = authors.split(" and ").next()?.trim();

    let surname = match first.split_once(',') {
        Some((last, _)) => last.trim(),
        None => first.split_whitespace().last()?,
    };

    let cleaned: String = surname.chars().filter(|c| c.is_alphanumeric()).collect();
    (!cleaned.is_empty()).then_some(cleaned)
}

fn year(entry: &BibEntry) -> Option<String> {
    let source = entry.field("year").or_else(|| entry.field("date"))?;
    let digits: String = source.chars().filter(|c| c.is_ascii_digit()).take(4).collect();
    (digits.len() == 4).then_some(digits)
}
