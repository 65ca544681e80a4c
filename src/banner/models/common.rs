use serde::{Deserialize, Serialize};

/// A code/description pair as returned by every Banner lookup endpoint
/// (terms, subjects, campuses, instructional methods, attributes, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pair {
    pub code: String,
    pub description: String,
}

/// A term listing from `/classSearch/getTerms`.
pub type BannerTerm = Pair;

impl BannerTerm {
    /// Returns true if the term is in an archival (view-only) state.
    pub fn is_archived(&self) -> bool {
        self.description.contains("View Only")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archived_detection() {
        let term = BannerTerm {
            code: "202110".to_owned(),
            description: "Fall 2020 (View Only)".to_owned(),
        };
        assert!(term.is_archived());

        let term = BannerTerm {
            code: "202610".to_owned(),
            description: "Fall 2025".to_owned(),
        };
        assert!(!term.is_archived());
    }
}
