//! Change descriptions and the squash summary.
//!
//! Every edit notification from the UI carries a [`ChangeDescription`]. When
//! several buffered edits are squashed into one version their descriptions
//! are merged by [`merge_descriptions`]:
//!
//! - all edits touch one category and say the same thing: keep that label
//!   (`"Changed name"`)
//! - all edits touch one category with different labels: `"Changed stats"`
//! - edits span two or more categories: `"Edited name, tier, type"`, listing
//!   at most [`MAX_SUMMARY_CATEGORIES`] categories by priority

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Maximum number of categories named in a merged summary.
pub const MAX_SUMMARY_CATEGORIES: usize = 3;

/// Area of the character record touched by an edit.
///
/// Declaration order is the summary priority: earlier variants are listed
/// first when a squash spans several categories.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS,
)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "kebab-case")]
pub enum ChangeCategory {
    Name,
    Tier,
    Type,
    Descriptor,
    Focus,
    Stats,
    Skills,
    Abilities,
    Cyphers,
    Equipment,
    Notes,
    Portrait,
    Restore,
    Other,
}

impl ChangeCategory {
    /// Lowercase display name used in summaries.
    pub fn display_name(self) -> &'static str {
        match self {
            ChangeCategory::Name => "name",
            ChangeCategory::Tier => "tier",
            ChangeCategory::Type => "type",
            ChangeCategory::Descriptor => "descriptor",
            ChangeCategory::Focus => "focus",
            ChangeCategory::Stats => "stats",
            ChangeCategory::Skills => "skills",
            ChangeCategory::Abilities => "abilities",
            ChangeCategory::Cyphers => "cyphers",
            ChangeCategory::Equipment => "equipment",
            ChangeCategory::Notes => "notes",
            ChangeCategory::Portrait => "portrait",
            ChangeCategory::Restore => "restore",
            ChangeCategory::Other => "details",
        }
    }

    /// Keywords that classify a free-text label or field name.
    fn keywords(self) -> &'static [&'static str] {
        match self {
            ChangeCategory::Name => &["name"],
            ChangeCategory::Tier => &["tier", "level", "advancement", "xp"],
            ChangeCategory::Type => &["type", "class"],
            ChangeCategory::Descriptor => &["descriptor"],
            ChangeCategory::Focus => &["focus"],
            ChangeCategory::Stats => &[
                "stat", "pool", "might", "speed", "intellect", "edge", "effort", "damage",
            ],
            ChangeCategory::Skills => &["skill", "training", "trained", "specialized"],
            ChangeCategory::Abilities => &["abilit", "power", "special"],
            ChangeCategory::Cyphers => &["cypher", "artifact", "oddit"],
            ChangeCategory::Equipment => &["equipment", "item", "armor", "weapon", "shin"],
            ChangeCategory::Notes => &["note", "background", "description"],
            ChangeCategory::Portrait => &["portrait", "image", "avatar"],
            ChangeCategory::Restore => &["restore"],
            ChangeCategory::Other => &[],
        }
    }

    const ALL: [ChangeCategory; 14] = [
        ChangeCategory::Name,
        ChangeCategory::Tier,
        ChangeCategory::Type,
        ChangeCategory::Descriptor,
        ChangeCategory::Focus,
        ChangeCategory::Stats,
        ChangeCategory::Skills,
        ChangeCategory::Abilities,
        ChangeCategory::Cyphers,
        ChangeCategory::Equipment,
        ChangeCategory::Notes,
        ChangeCategory::Portrait,
        ChangeCategory::Restore,
        ChangeCategory::Other,
    ];

    /// Classify a label or field name by keyword.
    ///
    /// Whole words are checked before substrings so "Changed type" is a
    /// type change even though "type" is not the first keyword matched by
    /// substring search.
    pub fn classify(text: &str) -> ChangeCategory {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        // Restore wins outright, its labels usually also name a version
        if words.iter().any(|w| w.starts_with("restor")) {
            return ChangeCategory::Restore;
        }

        for category in Self::ALL {
            if category
                .keywords()
                .iter()
                .any(|k| words.iter().any(|w| w == k))
            {
                return category;
            }
        }

        for category in Self::ALL {
            if category
                .keywords()
                .iter()
                .any(|k| words.iter().any(|w| w.starts_with(k)))
            {
                return category;
            }
        }

        ChangeCategory::Other
    }
}

impl fmt::Display for ChangeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ChangeCategory {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.display_name() == lower || format!("{:?}", c).to_lowercase() == lower)
            .ok_or(())
    }
}

/// Description of a single edit, as reported by the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDescription {
    /// Area of the record that changed
    pub category: ChangeCategory,

    /// Field that changed, when the UI knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    /// Human-readable label (e.g. "Changed name")
    pub label: String,
}

impl ChangeDescription {
    /// Create a description with an explicit category.
    pub fn new(category: ChangeCategory, label: impl Into<String>) -> Self {
        Self {
            category,
            field: None,
            label: label.into(),
        }
    }

    /// Create a description for a single field; the category is inferred
    /// from the field name.
    pub fn for_field(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            category: ChangeCategory::classify(&field),
            label: format!("Changed {}", field),
            field: Some(field),
        }
    }

    /// Create a description from a free-text label, inferring the category.
    pub fn from_label(label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            category: ChangeCategory::classify(&label),
            field: None,
            label,
        }
    }
}

impl From<&str> for ChangeDescription {
    fn from(label: &str) -> Self {
        ChangeDescription::from_label(label)
    }
}

impl From<String> for ChangeDescription {
    fn from(label: String) -> Self {
        ChangeDescription::from_label(label)
    }
}

impl fmt::Display for ChangeDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Merge buffered descriptions into one summary for a squashed version.
///
/// Returns an empty string for an empty slice.
pub fn merge_descriptions(descriptions: &[ChangeDescription]) -> String {
    let Some(last) = descriptions.last() else {
        return String::new();
    };

    let mut categories: Vec<ChangeCategory> = descriptions.iter().map(|d| d.category).collect();
    categories.sort();
    categories.dedup();

    if categories.len() >= 2 {
        let named: Vec<&str> = categories
            .iter()
            .take(MAX_SUMMARY_CATEGORIES)
            .map(|c| c.display_name())
            .collect();
        return format!("Edited {}", named.join(", "));
    }

    let all_same_label = descriptions.iter().all(|d| d.label == last.label);
    if all_same_label {
        last.label.clone()
    } else {
        format!("Changed {}", last.category.display_name())
    }
}
