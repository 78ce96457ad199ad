//! Template engine
//!
//! Pages are Tera templates compiled into the binary from `templates/`.
//! Every page gets the same standard variables (site name, current user,
//! flash messages) on top of its own context.

use chrono::Datelike;
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error as StdError;
use tera::{Context as TeraContext, Tera, Value};

use crate::models::User;

mod error;

pub use error::TemplateError;

#[derive(RustEmbed)]
#[folder = "templates/"]
#[include = "*.html"]
struct Templates;

/// Renders the embedded templates
pub struct ThemeEngine {
    tera: Tera,
}

impl ThemeEngine {
    pub fn new() -> Result<Self, TemplateError> {
        let mut sources = Vec::new();
        for name in Templates::iter() {
            let Some(file) = Templates::get(&name) else {
                continue;
            };
            let source = String::from_utf8(file.data.into_owned())
                .map_err(|e| TemplateError::Load(format!("{} is not UTF-8: {}", name, e)))?;
            sources.push((name.to_string(), source));
        }

        let mut tera = Tera::default();
        tera.autoescape_on(vec![".html"]);
        tera.add_raw_templates(sources)
            .map_err(|e| TemplateError::Load(describe(&e)))?;
        tera.register_filter("plural", plural);

        tracing::debug!("Loaded {} templates", tera.get_template_names().count());
        Ok(Self { tera })
    }

    pub fn has_template(&self, template: &str) -> bool {
        self.tera.get_template_names().any(|name| name == template)
    }

    pub fn render(&self, template: &str, context: &TeraContext) -> Result<String, TemplateError> {
        if !self.has_template(template) {
            return Err(TemplateError::NotFound(template.to_string()));
        }
        self.tera
            .render(template, context)
            .map_err(|e| TemplateError::Render(format!("Failed to render '{}': {}", template, describe(&e))))
    }

    /// Render with the standard variables merged into `context`
    pub fn render_page(
        &self,
        template: &str,
        context: &TeraContext,
        vars: &StandardTemplateVars,
    ) -> Result<String, TemplateError> {
        let mut full_context = context.clone();
        full_context.insert("site_name", &vars.site_name);
        full_context.insert("base_url", &vars.base_url);
        full_context.insert("request_path", &vars.request_path);
        full_context.insert("year", &vars.year);
        full_context.insert("current_user", &vars.current_user);
        full_context.insert("flash_errors", &vars.flash_errors);
        full_context.insert("flash_success", &vars.flash_success);
        full_context.insert("form", &vars.form);

        self.render(template, &full_context)
    }
}

/// Error message with its whole source chain
fn describe(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(s) = source {
        message.push_str(&format!("\n  Caused by: {}", s));
        source = s.source();
    }
    message
}

/// `{{ count | plural(word="comment") }}` gives "1 comment" or "3 comments"
fn plural(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let count = value
        .as_i64()
        .ok_or_else(|| tera::Error::msg("plural expects a number"))?;
    let word = args
        .get("word")
        .and_then(Value::as_str)
        .ok_or_else(|| tera::Error::msg("plural expects a `word` argument"))?;
    let suffix = if count == 1 { "" } else { "s" };
    Ok(Value::String(format!("{} {}{}", count, word, suffix)))
}

/// Variables every page can use
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardTemplateVars {
    pub site_name: String,
    pub base_url: String,
    pub request_path: String,
    pub year: i32,
    pub current_user: Option<CurrentUser>,
    pub flash_errors: Vec<String>,
    pub flash_success: Option<String>,
    /// Values of the form that failed validation, to refill it
    pub form: HashMap<String, String>,
}

impl StandardTemplateVars {
    pub fn new(
        site_name: impl Into<String>,
        base_url: impl Into<String>,
        request_path: impl Into<String>,
    ) -> Self {
        Self {
            site_name: site_name.into(),
            base_url: base_url.into(),
            request_path: request_path.into(),
            year: chrono::Utc::now().year(),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user: Option<&User>) -> Self {
        self.current_user = user.map(CurrentUser::from);
        self
    }
}

/// The logged-in user as templates see it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: i64,
    pub username: String,
    pub slug: String,
    pub avatar: Option<String>,
    pub is_admin: bool,
}

impl From<&User> for CurrentUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            slug: user.slug.clone(),
            avatar: user.avatar.clone(),
            is_admin: user.is_admin(),
        }
    }
}
