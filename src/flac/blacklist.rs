use std::path::Path;

/// Keywords that disqualify a track when they appear anywhere in its path (live cuts, covers,
/// karaoke versions, uploader channels and the like).
#[derive(Debug, Clone, Default)]
pub(crate) struct Blacklist {
    /// Lowercased once up front; matching is case-insensitive.
    keywords: Vec<String>,
}

impl Blacklist {
    pub(crate) fn new(keywords: &[String]) -> Self {
        Blacklist {
            keywords: keywords
                .iter()
                .map(|keyword| keyword.trim().to_lowercase())
                .filter(|keyword| !keyword.is_empty())
                .collect(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// Returns the first keyword contained in `text`, ignoring case.
    pub(crate) fn matching_keyword(&self, text: &str) -> Option<&str> {
        let lower = text.to_lowercase();
        self.keywords
            .iter()
            .find(|keyword| lower.contains(keyword.as_str()))
            .map(String::as_str)
    }

    pub(crate) fn matches_path(&self, path: &Path) -> Option<&str> {
        self.matching_keyword(&path.to_string_lossy())
    }
}

/// True when any of `needles` appears in `haystack`, ignoring case.
///
/// Used for performer matching, where the embedded artist tag is often a joined list
/// ("A / B feat. C") rather than an exact name.
pub(crate) fn contains_any_ignore_case(haystack: &str, needles: &[String]) -> bool {
    let lower = haystack.to_lowercase();
    needles
        .iter()
        .filter(|needle| !needle.is_empty())
        .any(|needle| lower.contains(&needle.to_lowercase()))
}
