//! Controlled research-category vocabulary.
//!
//! The classifier is constrained to this fixed label set. `Unclassified` is the
//! degradation sentinel assigned when classification exhausts its retries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Research category labels the classifier may assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CategoryLabel {
    #[serde(rename = "arts-humanities")]
    ArtsHumanities,
    #[serde(rename = "business")]
    Business,
    #[serde(rename = "computer-science")]
    ComputerScience,
    #[serde(rename = "education")]
    Education,
    #[serde(rename = "engineering")]
    Engineering,
    #[serde(rename = "life-sciences")]
    LifeSciences,
    #[serde(rename = "mathematics")]
    Mathematics,
    #[serde(rename = "medicine-health")]
    MedicineHealth,
    #[serde(rename = "physical-sciences")]
    PhysicalSciences,
    #[serde(rename = "social-sciences")]
    SocialSciences,
    /// Sentinel for records that could not be classified
    #[serde(rename = "unclassified")]
    Unclassified,
}

/// All labels the model is allowed to return (excludes the sentinel).
pub const ASSIGNABLE_LABELS: &[CategoryLabel] = &[
    CategoryLabel::ArtsHumanities,
    CategoryLabel::Business,
    CategoryLabel::ComputerScience,
    CategoryLabel::Education,
    CategoryLabel::Engineering,
    CategoryLabel::LifeSciences,
    CategoryLabel::Mathematics,
    CategoryLabel::MedicineHealth,
    CategoryLabel::PhysicalSciences,
    CategoryLabel::SocialSciences,
];

impl CategoryLabel {
    /// Stable string form used in prompts, JSON output, and CSV columns.
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryLabel::ArtsHumanities => "arts-humanities",
            CategoryLabel::Business => "business",
            CategoryLabel::ComputerScience => "computer-science",
            CategoryLabel::Education => "education",
            CategoryLabel::Engineering => "engineering",
            CategoryLabel::LifeSciences => "life-sciences",
            CategoryLabel::Mathematics => "mathematics",
            CategoryLabel::MedicineHealth => "medicine-health",
            CategoryLabel::PhysicalSciences => "physical-sciences",
            CategoryLabel::SocialSciences => "social-sciences",
            CategoryLabel::Unclassified => "unclassified",
        }
    }

    /// Parse a model-returned label, case-insensitively.
    ///
    /// Returns `None` for anything outside the assignable set; the sentinel is
    /// not parseable on purpose so the model cannot self-assign it.
    pub fn parse_assignable(value: &str) -> Option<Self> {
        let needle = value.trim().to_lowercase();
        ASSIGNABLE_LABELS
            .iter()
            .copied()
            .find(|label| label.as_str() == needle)
    }

    /// Whether this label is the degradation sentinel.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, CategoryLabel::Unclassified)
    }
}

impl fmt::Display for CategoryLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comma-separated list of assignable labels for prompt interpolation.
pub fn assignable_label_list() -> String {
    ASSIGNABLE_LABELS
        .iter()
        .map(|l| l.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignable() {
        assert_eq!(
            CategoryLabel::parse_assignable("computer-science"),
            Some(CategoryLabel::ComputerScience)
        );
        assert_eq!(
            CategoryLabel::parse_assignable("  Engineering "),
            Some(CategoryLabel::Engineering)
        );
        assert_eq!(CategoryLabel::parse_assignable("astrology"), None);
    }

    #[test]
    fn test_sentinel_not_assignable() {
        assert_eq!(CategoryLabel::parse_assignable("unclassified"), None);
        assert!(CategoryLabel::Unclassified.is_sentinel());
        assert!(!CategoryLabel::Business.is_sentinel());
    }

    #[test]
    fn test_label_list_covers_all() {
        let list = assignable_label_list();
        for label in ASSIGNABLE_LABELS {
            assert!(list.contains(label.as_str()));
        }
        assert!(!list.contains("unclassified"));
    }
}
