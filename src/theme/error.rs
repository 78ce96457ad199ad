//! Template engine error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    /// No embedded template with that name
    #[error("Template not found: {0}")]
    NotFound(String),

    /// An embedded template failed to parse at startup
    #[error("Failed to load templates: {0}")]
    Load(String),

    #[error("Template error: {0}")]
    Render(String),
}
