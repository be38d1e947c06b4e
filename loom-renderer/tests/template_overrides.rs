use std::fs;

use loom_core::{layout::Blueprint, Ledger};
use loom_renderer::{RenderError, Renderer, TemplateContext};
use tempfile::TempDir;

#[test]
fn override_dir_replaces_embedded_template() {
    let dir = TempDir::new().expect("tempdir");
    let tpl_dir = dir.path().join(".loom").join("templates");
    fs::create_dir_all(&tpl_dir).unwrap();
    fs::write(
        tpl_dir.join("claude.md.tera"),
        "custom instructions for {{ project.name }}\n",
    )
    .unwrap();

    let renderer = Renderer::for_project(dir.path()).expect("renderer");
    let ledger = Ledger::new("acme");
    let ctx = TemplateContext::new(&ledger, &Blueprint::standard());
    let (_, content) = renderer.render_instructions(&ctx).unwrap();
    assert_eq!(content, "custom instructions for acme\n");

    // templates that were not overridden keep their embedded form
    let (_, settings) = renderer.render_settings(&ctx).unwrap();
    assert!(settings.contains("\"acme\""));
}

#[test]
fn override_names_are_case_insensitive() {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("AGENT.MD.TERA"), "agent {{ agent.name }}").unwrap();

    let renderer = Renderer::with_overrides(Some(dir.path())).expect("renderer");
    let bp = Blueprint::standard();
    let ctx = TemplateContext::new(&Ledger::new("acme"), &bp);
    let out = renderer.render_agent(&ctx, &bp.agents[1]).unwrap();
    assert_eq!(out, "agent backend-developer");
}

#[test]
fn broken_override_fails_to_compile() {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("story.md.tera"), "{% if %}").unwrap();
    let err = Renderer::with_overrides(Some(dir.path())).err().expect("compile error");
    assert!(matches!(err, RenderError::Compile(_)), "{err}");
}

#[test]
fn override_with_unknown_variable_names_the_template() {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("claude.md.tera"), "{{ no_such.value }}").unwrap();
    let renderer = Renderer::with_overrides(Some(dir.path())).expect("renderer");
    let ctx = TemplateContext::new(&Ledger::new("acme"), &Blueprint::standard());
    let err = renderer.render_instructions(&ctx).unwrap_err();
    assert!(
        matches!(err, RenderError::Render { template: "claude.md.tera", .. }),
        "{err}"
    );
    assert!(err.to_string().contains("claude.md.tera"));
}

#[test]
fn missing_override_dir_is_fine() {
    let dir = TempDir::new().expect("tempdir");
    assert!(Renderer::for_project(&dir.path().join("nope")).is_ok());
}
