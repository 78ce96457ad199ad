//! Static informational pages

use axum::{extract::State, response::Response};
use tera::Context as TeraContext;

use crate::web::middleware::AppState;
use crate::web::responses::{PageError, View};

/// GET /contact/
pub async fn contact(State(state): State<AppState>, view: View) -> Result<Response, PageError> {
    let mut context = TeraContext::new();
    context.insert("contact_email", &state.config.mail.from_address);
    view.render("contact.html", &context)
}

/// GET /privacy-policy/
pub async fn privacy_policy(view: View) -> Result<Response, PageError> {
    view.render("privacy_policy.html", &TeraContext::new())
}

/// GET /terms-of-service/
pub async fn terms_of_service(State(state): State<AppState>, view: View) -> Result<Response, PageError> {
    let mut context = TeraContext::new();
    context.insert("anonymous_username", &state.config.site.anonymous_username);
    view.render("terms_of_service.html", &context)
}
