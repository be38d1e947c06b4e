//! Findings: one detected discrepancy between the blueprint and the project,
//! tagged with the concern that owns it and an optional suggested fix.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use loom_core::layout::{AgentSpec, DocumentSpec};
use loom_core::types::{EntityRef, FeatureName};

// ---------------------------------------------------------------------------
// Concern
// ---------------------------------------------------------------------------

/// The closed set of concerns. Validators and reconcilers are partitioned by
/// concern; declaration order is the order ledger edits are applied in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Concern {
    Entities,
    Documents,
    Structure,
    Agents,
    Configuration,
}

impl Concern {
    pub fn all() -> &'static [Concern] {
        &[
            Concern::Entities,
            Concern::Documents,
            Concern::Structure,
            Concern::Agents,
            Concern::Configuration,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Concern::Entities => "entities",
            Concern::Documents => "documents",
            Concern::Structure => "structure",
            Concern::Agents => "agents",
            Concern::Configuration => "configuration",
        }
    }
}

impl fmt::Display for Concern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Derived ordering runs from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Critical and High findings block convergence.
    pub fn is_must_fix(self) -> bool {
        self >= Severity::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// What a finding is about.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Target {
    /// A file or directory, relative to the project root.
    Path(PathBuf),
    /// A feature, epic or story.
    Entity(EntityRef),
    /// A section of the state document, or a worker that failed.
    State(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Path(p) => write!(f, "{}", p.display()),
            Target::Entity(e) => write!(f, "{} {e}", e.kind()),
            Target::State(s) => write!(f, "state:{s}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Suggested fixes
// ---------------------------------------------------------------------------

/// State document blocks that can be inserted when missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBlock {
    Aml,
    Yolo,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum FixAction {
    CreateDirectory { path: PathBuf },
    CreateDocument { doc: DocumentSpec },
    AppendSections { doc: DocumentSpec, sections: Vec<String> },
    CreateAgentFile { agent: AgentSpec },
    CreateInstructions,
    CreateSettings,
    /// Overwrite an unparseable settings file with the rendered default.
    ReplaceSettings,
    CreateEntityDocument { entity: EntityRef },
    TrackEntity { entity: EntityRef },
    InsertStateBlock { block: StateBlock },
    DeactivateFeatures { keep: Option<FeatureName> },
    ClearPosition,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SuggestedFix {
    pub action: FixAction,
    /// Applying the fix may discard user content.
    pub destructive: bool,
}

impl SuggestedFix {
    pub fn additive(action: FixAction) -> Self {
        Self {
            action,
            destructive: false,
        }
    }

    pub fn destructive(action: FixAction) -> Self {
        Self {
            action,
            destructive: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Finding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub concern: Concern,
    pub severity: Severity,
    pub target: Target,
    pub description: String,
    pub fix: Option<SuggestedFix>,
}

impl Finding {
    pub fn new(
        concern: Concern,
        severity: Severity,
        target: Target,
        description: impl Into<String>,
    ) -> Self {
        Self {
            concern,
            severity,
            target,
            description: description.into(),
            fix: None,
        }
    }

    pub fn with_fix(mut self, fix: SuggestedFix) -> Self {
        self.fix = Some(fix);
        self
    }

    /// The single finding reported for a validator that could not finish.
    pub fn worker_failure(concern: Concern, reason: &str) -> Self {
        Self::new(
            concern,
            Severity::Critical,
            Target::State(format!("validator/{concern}")),
            format!("{concern} validator failed: {reason}"),
        )
    }

    pub fn is_must_fix(&self) -> bool {
        self.severity.is_must_fix()
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}): {}",
            self.severity, self.target, self.concern, self.description
        )
    }
}
