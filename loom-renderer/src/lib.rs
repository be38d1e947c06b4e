//! # loom-renderer
//!
//! Tera-based template engine that renders the documents, agent definitions,
//! configuration files and entity documents Loom scaffolds.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use loom_core::{layout::Blueprint, Ledger};
//! use loom_renderer::{Renderer, TemplateContext};
//!
//! fn render_docs(ledger: &Ledger) {
//!     let blueprint = Blueprint::standard();
//!     let ctx = TemplateContext::new(ledger, &blueprint);
//!     if let Ok(renderer) = Renderer::new() {
//!         for doc in &blueprint.documents {
//!             if let Ok(content) = renderer.render_document(&ctx, doc) {
//!                 println!("{}: {} bytes", doc.file.display(), content.len());
//!             }
//!         }
//!     }
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::{EntityCtx, TemplateContext};
pub use engine::Renderer;
pub use error::RenderError;
