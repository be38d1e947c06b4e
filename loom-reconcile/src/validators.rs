//! Validators: read-only checks, one per [`Concern`].
//!
//! A validator looks only at the [`Snapshot`] it is handed plus the contents
//! of files the snapshot lists. It never writes, so any number of them can
//! run at once.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use loom_core::error::InvariantViolation;
use loom_core::layout::{entity_doc, missing_sections, INSTRUCTIONS_FILE, SETTINGS_FILE};
use loom_core::types::StoryRef;

use crate::error::{worker_io, WorkerError};
use crate::finding::{Concern, Finding, FixAction, Severity, StateBlock, SuggestedFix, Target};
use crate::snapshot::Snapshot;

/// A pure check of one concern.
pub trait Validator: Send + Sync {
    fn concern(&self) -> Concern;

    fn validate(&self, snapshot: &Snapshot) -> Result<Vec<Finding>, WorkerError>;
}

/// One validator per concern, in concern order.
pub fn standard() -> Vec<Arc<dyn Validator>> {
    vec![
        Arc::new(EntitiesValidator),
        Arc::new(DocumentsValidator),
        Arc::new(StructureValidator),
        Arc::new(AgentsValidator),
        Arc::new(ConfigurationValidator),
    ]
}

fn read(snapshot: &Snapshot, rel: &Path) -> Result<String, WorkerError> {
    let path = snapshot.absolute(rel);
    fs::read_to_string(&path).map_err(|e| worker_io(path, e))
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Ledger invariants, the current position, and ledger/disk agreement.
pub struct EntitiesValidator;

impl Validator for EntitiesValidator {
    fn concern(&self) -> Concern {
        Concern::Entities
    }

    fn validate(&self, snapshot: &Snapshot) -> Result<Vec<Finding>, WorkerError> {
        let c = Concern::Entities;
        let ledger = snapshot.ledger();
        let mut out = Vec::new();

        for violation in ledger.violations() {
            let finding = match &violation {
                InvariantViolation::MultipleActiveFeatures { .. } => {
                    let keep = ledger
                        .position
                        .feature
                        .clone()
                        .filter(|p| ledger.feature(p).is_some_and(|f| f.is_active))
                        .or_else(|| ledger.active_features().next().map(|f| f.name.clone()));
                    Finding::new(c, Severity::Critical, Target::State("features".into()), violation.to_string())
                        .with_fix(SuggestedFix::additive(FixAction::DeactivateFeatures { keep }))
                }
                InvariantViolation::NotFound { .. } => Finding::new(
                    c,
                    Severity::Critical,
                    Target::State("current-position".into()),
                    format!("current position is dangling: {violation}"),
                )
                .with_fix(SuggestedFix::additive(FixAction::ClearPosition)),
                InvariantViolation::OpenWork { story, .. } => {
                    let target = StoryRef::parse(story)
                        .map(|r| Target::Entity(r.into()))
                        .unwrap_or_else(|_| Target::State("features".into()));
                    Finding::new(c, Severity::Critical, target, violation.to_string())
                }
                other => Finding::new(
                    c,
                    Severity::Critical,
                    Target::State("features".into()),
                    other.to_string(),
                ),
            };
            out.push(finding);
        }

        for entity in snapshot.model.orphaned() {
            out.push(
                Finding::new(
                    c,
                    Severity::High,
                    Target::Entity(entity.clone()),
                    format!("tracked but {} is missing", entity_doc(entity).display()),
                )
                .with_fix(SuggestedFix::additive(FixAction::CreateEntityDocument {
                    entity: entity.clone(),
                })),
            );
        }

        for entity in snapshot.model.untracked() {
            out.push(
                Finding::new(
                    c,
                    Severity::High,
                    Target::Entity(entity.clone()),
                    format!("{} exists on disk but is not tracked", entity_doc(entity).display()),
                )
                .with_fix(SuggestedFix::additive(FixAction::TrackEntity {
                    entity: entity.clone(),
                })),
            );
        }

        for invalid in snapshot.model.invalid_paths() {
            out.push(Finding::new(
                c,
                Severity::Low,
                Target::State("features".into()),
                invalid.clone(),
            ));
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// Required documents exist and carry their required sections.
pub struct DocumentsValidator;

impl Validator for DocumentsValidator {
    fn concern(&self) -> Concern {
        Concern::Documents
    }

    fn validate(&self, snapshot: &Snapshot) -> Result<Vec<Finding>, WorkerError> {
        let c = Concern::Documents;
        let mut out = Vec::new();
        for doc in &snapshot.blueprint.documents {
            let rel = snapshot.blueprint.document_path(doc);
            if !snapshot.tree.has_file(&rel) {
                out.push(
                    Finding::new(c, Severity::High, Target::Path(rel), format!("missing {}", doc.title))
                        .with_fix(SuggestedFix::additive(FixAction::CreateDocument { doc: doc.clone() })),
                );
                continue;
            }
            let body = read(snapshot, &rel)?;
            let missing: Vec<String> = missing_sections(doc, &body)
                .into_iter()
                .map(str::to_owned)
                .collect();
            if missing.is_empty() {
                continue;
            }
            out.push(
                Finding::new(
                    c,
                    Severity::Medium,
                    Target::Path(rel),
                    format!("missing sections: {}", missing.join(", ")),
                )
                .with_fix(SuggestedFix::additive(FixAction::AppendSections {
                    doc: doc.clone(),
                    sections: missing,
                })),
            );
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Structure
// ---------------------------------------------------------------------------

/// Required directories exist.
pub struct StructureValidator;

impl Validator for StructureValidator {
    fn concern(&self) -> Concern {
        Concern::Structure
    }

    fn validate(&self, snapshot: &Snapshot) -> Result<Vec<Finding>, WorkerError> {
        Ok(snapshot
            .blueprint
            .directories
            .iter()
            .filter(|d| !snapshot.tree.has_dir(d))
            .map(|d| {
                Finding::new(
                    Concern::Structure,
                    Severity::High,
                    Target::Path(d.clone()),
                    "missing directory",
                )
                .with_fix(SuggestedFix::additive(FixAction::CreateDirectory { path: d.clone() }))
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// Required agent files exist and are not blank.
pub struct AgentsValidator;

impl Validator for AgentsValidator {
    fn concern(&self) -> Concern {
        Concern::Agents
    }

    fn validate(&self, snapshot: &Snapshot) -> Result<Vec<Finding>, WorkerError> {
        let c = Concern::Agents;
        let mut out = Vec::new();
        for agent in &snapshot.blueprint.agents {
            let rel = agent.file();
            let problem = if !snapshot.tree.has_file(&rel) {
                "missing agent definition"
            } else if read(snapshot, &rel)?.trim().is_empty() {
                "agent definition is empty"
            } else {
                continue;
            };
            out.push(
                Finding::new(c, Severity::High, Target::Path(rel), format!("{problem}: {}", agent.name))
                    .with_fix(SuggestedFix::additive(FixAction::CreateAgentFile { agent: agent.clone() })),
            );
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Project instructions, agent settings and the state document's mode blocks.
pub struct ConfigurationValidator;

impl Validator for ConfigurationValidator {
    fn concern(&self) -> Concern {
        Concern::Configuration
    }

    fn validate(&self, snapshot: &Snapshot) -> Result<Vec<Finding>, WorkerError> {
        let c = Concern::Configuration;
        let mut out = Vec::new();

        let instructions = Path::new(INSTRUCTIONS_FILE);
        if !snapshot.tree.has_file(instructions) {
            out.push(
                Finding::new(c, Severity::High, Target::Path(instructions.into()), "missing project instructions")
                    .with_fix(SuggestedFix::additive(FixAction::CreateInstructions)),
            );
        }

        let settings = Path::new(SETTINGS_FILE);
        if !snapshot.tree.has_file(settings) {
            out.push(
                Finding::new(c, Severity::High, Target::Path(settings.into()), "missing agent settings")
                    .with_fix(SuggestedFix::additive(FixAction::CreateSettings)),
            );
        } else if let Err(err) = serde_json::from_str::<serde_json::Value>(&read(snapshot, settings)?) {
            out.push(
                Finding::new(
                    c,
                    Severity::High,
                    Target::Path(settings.into()),
                    format!("settings are not valid JSON: {err}"),
                )
                .with_fix(SuggestedFix::destructive(FixAction::ReplaceSettings)),
            );
        }

        let ledger = snapshot.ledger();
        let blocks = [
            (StateBlock::Aml, ledger.aml.is_none(), "aml"),
            (StateBlock::Yolo, ledger.yolo.is_none(), "yolo"),
        ];
        for (block, missing, name) in blocks {
            if missing {
                out.push(
                    Finding::new(
                        c,
                        Severity::Medium,
                        Target::State(name.into()),
                        format!("state document has no <{name}> block"),
                    )
                    .with_fix(SuggestedFix::additive(FixAction::InsertStateBlock { block })),
                );
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::types::{EntityRef, FeatureName};
    use loom_core::{Blueprint, Ledger, Model};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn snapshot(dir: &TempDir, ledger: Ledger) -> Snapshot {
        Snapshot::capture(dir.path(), ledger, Blueprint::standard()).expect("snapshot")
    }

    fn write(dir: &TempDir, rel: &str, body: &str) {
        let p = dir.path().join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, body).unwrap();
    }

    #[test]
    fn empty_project_reports_every_required_artefact() {
        let dir = TempDir::new().unwrap();
        let snap = snapshot(&dir, Ledger::new("demo"));

        let docs = DocumentsValidator.validate(&snap).unwrap();
        assert_eq!(docs.len(), 12);
        assert!(docs.iter().all(|f| f.severity == Severity::High));

        let dirs = StructureValidator.validate(&snap).unwrap();
        assert_eq!(dirs.len(), 5);

        let agents = AgentsValidator.validate(&snap).unwrap();
        assert_eq!(agents.len(), 6);

        let config = ConfigurationValidator.validate(&snap).unwrap();
        assert_eq!(config.iter().filter(|f| f.is_must_fix()).count(), 2);
        assert_eq!(config.iter().filter(|f| !f.is_must_fix()).count(), 2);
    }

    #[test]
    fn missing_sections_are_medium_and_listed() {
        let dir = TempDir::new().unwrap();
        write(&dir, "docs/PRD.md", "# Product Requirements\n\n## Users\n");
        let snap = snapshot(&dir, Ledger::new("demo"));
        let findings = DocumentsValidator.validate(&snap).unwrap();
        let prd = findings
            .iter()
            .find(|f| f.target == Target::Path(PathBuf::from("docs/PRD.md")))
            .expect("prd finding");
        assert_eq!(prd.severity, Severity::Medium);
        match &prd.fix.as_ref().unwrap().action {
            FixAction::AppendSections { sections, .. } => {
                assert_eq!(sections, &["Problem Statement", "Features", "Success Metrics"]);
            }
            other => panic!("unexpected fix {other:?}"),
        }
    }

    #[test]
    fn blank_agent_file_is_reported() {
        let dir = TempDir::new().unwrap();
        write(&dir, ".claude/agents/coordinator.md", "  \n");
        let snap = snapshot(&dir, Ledger::new("demo"));
        let findings = AgentsValidator.validate(&snap).unwrap();
        assert!(findings
            .iter()
            .any(|f| f.description.starts_with("agent definition is empty")));
    }

    #[test]
    fn invalid_settings_suggest_destructive_replace() {
        let dir = TempDir::new().unwrap();
        write(&dir, ".claude/settings.json", "{ not json");
        let snap = snapshot(&dir, Ledger::new("demo"));
        let findings = ConfigurationValidator.validate(&snap).unwrap();
        let fix = findings
            .iter()
            .find_map(|f| f.fix.as_ref().filter(|x| x.action == FixAction::ReplaceSettings))
            .expect("replace fix");
        assert!(fix.destructive);
    }

    #[test]
    fn ledger_breaks_are_critical() {
        let dir = TempDir::new().unwrap();
        let mut ledger = Ledger::new("demo");
        let mut m = Model::new(ledger.clone());
        for name in ["payments", "search"] {
            let f = FeatureName::new(name).unwrap();
            m.create_feature(&f).unwrap();
            write(&dir, &format!("features/{name}/FEATURE.md"), "# f\n");
        }
        ledger = m.into_ledger();
        for f in &mut ledger.features {
            f.is_active = true;
        }
        ledger.position.feature = Some(FeatureName::new("gone").unwrap());

        let snap = snapshot(&dir, ledger);
        let findings = EntitiesValidator.validate(&snap).unwrap();
        let critical: Vec<&Finding> = findings
            .iter()
            .filter(|f| f.severity == Severity::Critical)
            .collect();
        assert_eq!(critical.len(), 2, "{findings:#?}");
        assert!(critical.iter().any(|f| f.fix.as_ref().map(|x| &x.action)
            == Some(&FixAction::ClearPosition)));
        assert!(critical.iter().any(|f| matches!(
            f.fix.as_ref().map(|x| &x.action),
            Some(FixAction::DeactivateFeatures { keep: Some(k) }) if k.as_str() == "payments"
        )));
    }

    #[test]
    fn each_closed_story_with_open_work_is_its_own_finding() {
        use loom_core::ledger::{Epic, Feature, Story, Task};
        use loom_core::types::{EpicName, StoryId, StoryStatus, TaskId};

        let dir = TempDir::new().unwrap();
        let mut epic = Epic::new(EpicName::new("epic-1").unwrap());
        for id in ["s1", "s2"] {
            let mut story = Story::new(StoryId::new(id).unwrap());
            story.status = StoryStatus::Done;
            story.tasks.push(Task::new(TaskId::new("1").unwrap(), "open"));
            epic.stories.push(story);
            write(&dir, &format!("features/payments/epics/epic-1/stories/{id}.md"), "# s\n");
        }
        let mut feature = Feature::new(FeatureName::new("payments").unwrap());
        feature.epics.push(epic);
        let mut ledger = Ledger::new("demo");
        ledger.features.push(feature);
        write(&dir, "features/payments/FEATURE.md", "# f\n");
        write(&dir, "features/payments/epics/epic-1/EPIC.md", "# e\n");

        let snap = snapshot(&dir, ledger);
        let findings = EntitiesValidator.validate(&snap).unwrap();
        let targets: Vec<String> = findings
            .iter()
            .filter(|f| f.severity == Severity::Critical)
            .map(|f| f.target.to_string())
            .collect();
        assert_eq!(
            targets,
            ["story payments/epic-1/s1", "story payments/epic-1/s2"],
            "{findings:#?}"
        );

        let plan = crate::synthesizer::synthesize(vec![findings]);
        assert_eq!(plan.must_fix.len(), 2);
    }

    #[test]
    fn disk_and_ledger_disagreement() {
        let dir = TempDir::new().unwrap();
        write(&dir, "features/search/FEATURE.md", "# search\n");
        write(&dir, "features/Bad_Name/FEATURE.md", "# bad\n");
        let mut m = Model::new(Ledger::new("demo"));
        m.create_feature(&FeatureName::new("payments").unwrap()).unwrap();

        let snap = snapshot(&dir, m.into_ledger());
        let findings = EntitiesValidator.validate(&snap).unwrap();
        let payments = EntityRef::Feature {
            feature: FeatureName::new("payments").unwrap(),
        };
        let search = EntityRef::Feature {
            feature: FeatureName::new("search").unwrap(),
        };
        assert!(findings.iter().any(|f| f.target == Target::Entity(payments.clone())
            && matches!(f.fix.as_ref().unwrap().action, FixAction::CreateEntityDocument { .. })));
        assert!(findings.iter().any(|f| f.target == Target::Entity(search.clone())
            && matches!(f.fix.as_ref().unwrap().action, FixAction::TrackEntity { .. })));
        assert!(findings
            .iter()
            .any(|f| f.severity == Severity::Low && f.fix.is_none()));
    }
}
