use strsim::jaro_winkler;

/// Similarity score (Jaro-Winkler) at or above which two distinct name keys
/// are worth surfacing as a near-miss during identity resolution.
pub const NEAR_MISS_SIMILARITY: f64 = 0.90;

/// Canonicalized game-title key used for identity matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NameKey {
    normalized: String,
}

impl NameKey {
    /// Build a normalized comparison key from a raw game title.
    ///
    /// Normalization steps:
    /// - trim whitespace
    /// - lowercase and drop everything but ASCII alphanumerics
    /// - strip trademark/registered marks before the alnum filter handles
    ///   the rest
    /// - strip common edition suffixes ("Game of the Year Edition",
    ///   "Deluxe Edition", ...) so store SKUs of the same game collide
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim().to_lowercase();
        let without_suffix = strip_edition_suffixes(&trimmed);
        let normalized: String = without_suffix
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        Self { normalized }
    }

    /// The normalization output as a lowercase ASCII alphanumeric token.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// Keys of unnamed or symbol-only titles normalize to nothing and must
    /// never be used for matching.
    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }

    /// Jaro-Winkler similarity between two normalized keys.
    pub fn similarity(&self, other: &Self) -> f64 {
        jaro_winkler(self.normalized(), other.normalized())
    }
}

impl std::fmt::Display for NameKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.normalized)
    }
}

fn strip_edition_suffixes(input: &str) -> &str {
    const SUFFIXES: [&str; 6] = [
        "game of the year edition",
        "definitive edition",
        "complete edition",
        "deluxe edition",
        "standard edition",
        "remastered",
    ];
    for suffix in SUFFIXES {
        if let Some(rest) = input.strip_suffix(suffix) {
            return rest.trim_end_matches([' ', '-', ':']);
        }
    }
    input
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_punctuation_and_case() {
        let a = NameKey::new("The Witcher® 3: Wild Hunt");
        let b = NameKey::new("the witcher 3 wild hunt");
        assert_eq!(a, b);
    }

    #[test]
    fn strips_edition_suffixes() {
        let base = NameKey::new("The Witcher 3: Wild Hunt");
        let goty = NameKey::new("The Witcher 3: Wild Hunt - Game of the Year Edition");
        assert_eq!(base, goty);
    }

    #[test]
    fn distinct_sequels_stay_distinct() {
        let a = NameKey::new("Dark Souls II");
        let b = NameKey::new("Dark Souls III");
        assert_ne!(a, b);
        assert!(a.similarity(&b) < 1.0);
    }

    #[test]
    fn near_miss_scores_high_but_not_equal() {
        let a = NameKey::new("Hollow Knight");
        let b = NameKey::new("Hollow Knigt"); // storefront typo
        assert_ne!(a, b);
        assert!(a.similarity(&b) >= NEAR_MISS_SIMILARITY);
    }

    #[test]
    fn symbol_only_title_is_empty() {
        assert!(NameKey::new("???").is_empty());
    }
}
