//! Domain types for the Loom workflow ledger.
//!
//! Feature and epic names are validated kebab-case identifiers because they
//! become directory names. Story, task and commit ids are opaque but must be
//! usable as a single path segment.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use regex::Regex;

use crate::error::InvariantViolation;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9]*(-[a-z0-9]+)*$").expect("name regex is valid"));

fn check_name(kind: &'static str, raw: &str) -> Result<(), InvariantViolation> {
    if NAME_RE.is_match(raw) {
        return Ok(());
    }
    Err(InvariantViolation::InvalidName {
        kind,
        name: raw.to_owned(),
        reason: "expected lowercase kebab-case (letters, digits, single hyphens)".into(),
    })
}

fn check_id(kind: &'static str, raw: &str) -> Result<(), InvariantViolation> {
    let reason = if raw.is_empty() {
        "must not be empty"
    } else if raw.chars().any(char::is_whitespace) {
        "must not contain whitespace"
    } else if raw.contains(|c: char| c == '/' || c == '\\') {
        "must not contain path separators"
    } else if raw == "." || raw == ".." {
        "must not be a relative path segment"
    } else {
        return Ok(());
    };
    Err(InvariantViolation::InvalidName {
        kind,
        name: raw.to_owned(),
        reason: reason.into(),
    })
}

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

macro_rules! validated_newtype {
    ($(#[$meta:meta])* $ty:ident, $kind:literal, $check:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $ty(String);

        impl $ty {
            pub fn new(raw: impl Into<String>) -> Result<Self, InvariantViolation> {
                let raw = raw.into();
                $check($kind, &raw)?;
                Ok(Self(raw))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $ty {
            type Err = InvariantViolation;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = InvariantViolation;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl From<$ty> for String {
            fn from(v: $ty) -> String {
                v.0
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

validated_newtype!(
    /// Name of a feature; also the feature's directory under `features/`.
    FeatureName,
    "feature",
    check_name
);

validated_newtype!(
    /// Name of an epic, unique within its feature.
    EpicName,
    "epic",
    check_name
);

validated_newtype!(
    /// Story identifier, unique within its epic.
    StoryId,
    "story",
    check_id
);

validated_newtype!(
    /// Task identifier, unique within its story.
    TaskId,
    "task",
    check_id
);

validated_newtype!(
    /// Opaque reference to the commit that completed a task.
    CommitId,
    "commit",
    check_id
);

// ---------------------------------------------------------------------------
// Story lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle status of a story. The derived ordering is the lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoryStatus {
    #[default]
    NotStarted,
    InProgress,
    WaitingForReview,
    Done,
}

impl StoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StoryStatus::NotStarted => "not-started",
            StoryStatus::InProgress => "in-progress",
            StoryStatus::WaitingForReview => "waiting-for-review",
            StoryStatus::Done => "done",
        }
    }

    pub fn all() -> &'static [StoryStatus] {
        &[
            StoryStatus::NotStarted,
            StoryStatus::InProgress,
            StoryStatus::WaitingForReview,
            StoryStatus::Done,
        ]
    }
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StoryStatus::all()
            .iter()
            .copied()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown story status '{s}'"))
    }
}

/// Where a task came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOrigin {
    #[default]
    Planned,
    Review,
}

// ---------------------------------------------------------------------------
// Entity references
// ---------------------------------------------------------------------------

/// Fully-qualified reference to a story.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoryRef {
    pub feature: FeatureName,
    pub epic: EpicName,
    pub story: StoryId,
}

impl StoryRef {
    pub fn new(feature: FeatureName, epic: EpicName, story: StoryId) -> Self {
        Self {
            feature,
            epic,
            story,
        }
    }

    /// Parse `feature/epic/story`.
    pub fn parse(path: &str) -> Result<Self, InvariantViolation> {
        let parts: Vec<&str> = path.split('/').collect();
        match parts.as_slice() {
            [f, e, s] => Ok(Self::new(f.parse()?, e.parse()?, s.parse()?)),
            _ => Err(InvariantViolation::InvalidName {
                kind: "story path",
                name: path.to_owned(),
                reason: "expected <feature>/<epic>/<story>".into(),
            }),
        }
    }
}

impl fmt::Display for StoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.feature, self.epic, self.story)
    }
}

/// Any tracked entity of the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntityRef {
    Feature {
        feature: FeatureName,
    },
    Epic {
        feature: FeatureName,
        epic: EpicName,
    },
    Story {
        feature: FeatureName,
        epic: EpicName,
        story: StoryId,
    },
}

impl EntityRef {
    pub fn feature(&self) -> &FeatureName {
        match self {
            EntityRef::Feature { feature }
            | EntityRef::Epic { feature, .. }
            | EntityRef::Story { feature, .. } => feature,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EntityRef::Feature { .. } => "feature",
            EntityRef::Epic { .. } => "epic",
            EntityRef::Story { .. } => "story",
        }
    }

    /// The chain of entities from the feature down to `self`, inclusive.
    pub fn lineage(&self) -> Vec<EntityRef> {
        match self {
            EntityRef::Feature { .. } => vec![self.clone()],
            EntityRef::Epic { feature, .. } => vec![
                EntityRef::Feature {
                    feature: feature.clone(),
                },
                self.clone(),
            ],
            EntityRef::Story { feature, epic, .. } => vec![
                EntityRef::Feature {
                    feature: feature.clone(),
                },
                EntityRef::Epic {
                    feature: feature.clone(),
                    epic: epic.clone(),
                },
                self.clone(),
            ],
        }
    }
}

impl From<StoryRef> for EntityRef {
    fn from(r: StoryRef) -> Self {
        EntityRef::Story {
            feature: r.feature,
            epic: r.epic,
            story: r.story,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Feature { feature } => write!(f, "{feature}"),
            EntityRef::Epic { feature, epic } => write!(f, "{feature}/{epic}"),
            EntityRef::Story {
                feature,
                epic,
                story,
            } => write!(f, "{feature}/{epic}/{story}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("payments")]
    #[case("epic-1")]
    #[case("user-auth-v2")]
    #[case("a")]
    fn valid_feature_names(#[case] raw: &str) {
        assert_eq!(FeatureName::new(raw).unwrap().as_str(), raw);
    }

    #[rstest]
    #[case("")]
    #[case("Payments")]
    #[case("1payments")]
    #[case("pay--ments")]
    #[case("payments-")]
    #[case("pay ments")]
    #[case("pay/ments")]
    fn invalid_feature_names(#[case] raw: &str) {
        let err = FeatureName::new(raw).unwrap_err();
        assert!(matches!(err, InvariantViolation::InvalidName { kind: "feature", .. }));
    }

    #[rstest]
    #[case("")]
    #[case("story 1")]
    #[case("a/b")]
    #[case("..")]
    fn invalid_story_ids(#[case] raw: &str) {
        assert!(StoryId::new(raw).is_err());
    }

    #[test]
    fn story_id_is_opaque() {
        assert_eq!(StoryId::new("US_42.b").unwrap().to_string(), "US_42.b");
    }

    #[test]
    fn status_order_is_lifecycle_order() {
        let mut all = StoryStatus::all().to_vec();
        all.reverse();
        all.sort();
        assert_eq!(all, StoryStatus::all());
        assert!(StoryStatus::NotStarted < StoryStatus::Done);
    }

    #[test]
    fn status_parse_display_agree() {
        for st in StoryStatus::all() {
            assert_eq!(st.as_str().parse::<StoryStatus>().unwrap(), *st);
        }
        assert!("finished".parse::<StoryStatus>().is_err());
    }

    #[test]
    fn story_ref_parse_and_display() {
        let r = StoryRef::parse("payments/epic-1/story-1").unwrap();
        assert_eq!(r.to_string(), "payments/epic-1/story-1");
        assert_eq!(EntityRef::from(r).to_string(), "payments/epic-1/story-1");
        assert!(StoryRef::parse("payments/epic-1").is_err());
        assert!(StoryRef::parse("Payments/epic-1/s").is_err());
    }

    #[test]
    fn lineage_lists_parents_first() {
        let r: EntityRef = StoryRef::parse("a/b/c").unwrap().into();
        let kinds: Vec<_> = r.lineage().iter().map(EntityRef::kind).collect();
        assert_eq!(kinds, ["feature", "epic", "story"]);
    }

    #[test]
    fn names_deserialize_with_validation() {
        let ok: FeatureName = serde_json::from_str("\"billing\"").unwrap();
        assert_eq!(ok.as_str(), "billing");
        assert!(serde_json::from_str::<FeatureName>("\"Bad Name\"").is_err());
    }
}
