//! Rendering failures, each naming the template or file involved.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    /// The embedded set plus project overrides did not compile.
    #[error("failed to compile templates: {0}")]
    Compile(#[source] tera::Error),

    #[error("failed to render {template}: {source}")]
    Render {
        template: &'static str,
        #[source]
        source: tera::Error,
    },

    /// The ledger summary could not be turned into a tera context.
    #[error("failed to build template context: {0}")]
    Context(#[source] tera::Error),

    #[error("cannot read override template {path}: {source}")]
    Override {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
