//! Tera rendering engine for every file Loom scaffolds.
//!
//! # Artifacts
//!
//! | Artifact        | Template             | Output path                                   |
//! |-----------------|----------------------|-----------------------------------------------|
//! | Document        | `document.md.tera`   | `docs/<FILE>.md`                              |
//! | Missing sections| `sections.md.tera`   | appended to an existing document              |
//! | Agent           | `agent.md.tera`      | `.claude/agents/<name>.md`                    |
//! | Instructions    | `claude.md.tera`     | `CLAUDE.md`                                   |
//! | Settings        | `settings.json.tera` | `.claude/settings.json`                       |
//! | Feature         | `feature.md.tera`    | `features/<f>/FEATURE.md`                     |
//! | Epic            | `epic.md.tera`       | `features/<f>/epics/<e>/EPIC.md`              |
//! | Story           | `story.md.tera`      | `features/<f>/epics/<e>/stories/<s>.md`       |
//!
//! Any of these can be overridden by a same-named file in `.loom/templates/`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tera::Tera;

use loom_core::layout::{self, AgentSpec, DocumentSpec, INSTRUCTIONS_FILE, SETTINGS_FILE};
use loom_core::ledger::Ledger;
use loom_core::types::EntityRef;

use crate::context::{AgentCtx, DocumentCtx, EntityCtx, TemplateContext};
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates, baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("_partials/header.tera", include_str!("templates/_partials/header.tera")),
    ("document.md.tera", include_str!("templates/document.md.tera")),
    ("sections.md.tera", include_str!("templates/sections.md.tera")),
    ("agent.md.tera", include_str!("templates/agent.md.tera")),
    ("claude.md.tera", include_str!("templates/claude.md.tera")),
    ("settings.json.tera", include_str!("templates/settings.json.tera")),
    ("feature.md.tera", include_str!("templates/feature.md.tera")),
    ("epic.md.tera", include_str!("templates/epic.md.tera")),
    ("story.md.tera", include_str!("templates/story.md.tera")),
];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Override { path: path.into(), source }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

fn collect_template_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), RenderError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let meta = entry.metadata().map_err(|e| io_err(&path, e))?;
        if meta.is_dir() {
            collect_template_files(&path, out)?;
        } else if meta.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn load_override_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut files = Vec::new();
    collect_template_files(dir, &mut files)?;
    files.sort();
    let mut templates = Vec::new();
    for path in files {
        let is_template = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("tera"));
        if !is_template {
            continue;
        }
        let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((normalize_template_name(rel), contents));
    }
    Ok(templates)
}

fn build_tera(override_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = HashMap::new();
    for (name, content) in TPLS {
        templates.insert(normalize_template_name(Path::new(name)), (*content).to_string());
    }
    if let Some(dir) = override_dir {
        for (name, content) in load_override_templates(dir)? {
            templates.insert(name, content);
        }
    }

    let mut tera = Tera::default();
    tera.autoescape_on(vec![]);
    tera.add_raw_templates(templates.into_iter().collect::<Vec<_>>())
        .map_err(RenderError::Compile)?;
    Ok(tera)
}

fn normalize_newlines(s: String) -> String {
    if s.contains('\r') {
        s.replace("\r\n", "\n")
    } else {
        s
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renders scaffold content. Create once per run and reuse.
pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    /// Embedded templates only.
    pub fn new() -> Result<Self, RenderError> {
        Self::with_overrides(None)
    }

    /// Embedded templates plus any `.tera` overrides found under `dir`.
    pub fn with_overrides(dir: Option<&Path>) -> Result<Self, RenderError> {
        Ok(Renderer {
            tera: build_tera(dir)?,
        })
    }

    /// Renderer for a project root, honouring `<root>/.loom/templates/`.
    pub fn for_project(root: &Path) -> Result<Self, RenderError> {
        Self::with_overrides(Some(&root.join(layout::TEMPLATES_DIR)))
    }

    fn render(&self, template: &'static str, ctx: &tera::Context) -> Result<String, RenderError> {
        let out = self
            .tera
            .render(template, ctx)
            .map_err(|source| RenderError::Render { template, source })?;
        Ok(normalize_newlines(out))
    }

    pub fn render_document(
        &self,
        ctx: &TemplateContext,
        doc: &DocumentSpec,
    ) -> Result<String, RenderError> {
        let mut tctx = ctx.to_tera_context()?;
        tctx.insert("document", &DocumentCtx::from(doc));
        self.render("document.md.tera", &tctx)
    }

    /// Text to append to an existing document that lacks `sections`.
    pub fn render_sections(&self, sections: &[&str]) -> Result<String, RenderError> {
        let mut tctx = tera::Context::new();
        tctx.insert("sections", sections);
        self.render("sections.md.tera", &tctx)
    }

    pub fn render_agent(
        &self,
        ctx: &TemplateContext,
        agent: &AgentSpec,
    ) -> Result<String, RenderError> {
        let mut tctx = ctx.to_tera_context()?;
        tctx.insert("agent", &AgentCtx::from(agent));
        self.render("agent.md.tera", &tctx)
    }

    /// `(CLAUDE.md, content)`
    pub fn render_instructions(
        &self,
        ctx: &TemplateContext,
    ) -> Result<(PathBuf, String), RenderError> {
        let content = self.render("claude.md.tera", &ctx.to_tera_context()?)?;
        Ok((PathBuf::from(INSTRUCTIONS_FILE), content))
    }

    /// `(.claude/settings.json, content)`
    pub fn render_settings(
        &self,
        ctx: &TemplateContext,
    ) -> Result<(PathBuf, String), RenderError> {
        let content = self.render("settings.json.tera", &ctx.to_tera_context()?)?;
        Ok((PathBuf::from(SETTINGS_FILE), content))
    }

    /// Document for a feature, epic or story, with its path relative to the
    /// project root.
    pub fn render_entity(
        &self,
        ctx: &TemplateContext,
        ledger: &Ledger,
        entity: &EntityRef,
    ) -> Result<(PathBuf, String), RenderError> {
        let template = match entity {
            EntityRef::Feature { .. } => "feature.md.tera",
            EntityRef::Epic { .. } => "epic.md.tera",
            EntityRef::Story { .. } => "story.md.tera",
        };
        let mut tctx = ctx.to_tera_context()?;
        tctx.insert("entity", &EntityCtx::from_ledger(ledger, entity));
        let content = self.render(template, &tctx)?;
        Ok((layout::entity_doc(entity), content))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
