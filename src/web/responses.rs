//! Shared response types
//!
//! `ApiError` is the JSON error body of `/api/*`. `PageError` is what page
//! handlers fail with; it is turned into the HTML error page by
//! [`render_error_pages`], which has access to the template engine.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::{Html, IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::PrivateCookieJar;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tera::Context as TeraContext;

use crate::models::User;
use crate::services::{
    BlueprintServiceError, CommentServiceError, TagServiceError, UserServiceError,
};
use crate::theme::{StandardTemplateVars, TemplateError, ThemeEngine};
use crate::web::flash::Flash;
use crate::web::middleware::{user_from_extensions, AppState, MaybeUser};

/// JSON error body: `{"error": "..."}`
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    pub error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            error: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl From<BlueprintServiceError> for ApiError {
    fn from(e: BlueprintServiceError) -> Self {
        match e {
            BlueprintServiceError::ValidationError(msg) => Self::validation_error(msg),
            BlueprintServiceError::Forbidden(msg) => Self::new(StatusCode::FORBIDDEN, msg),
            BlueprintServiceError::NotFound => Self::new(StatusCode::NOT_FOUND, "Blueprint not found"),
            BlueprintServiceError::InternalError(e) => {
                tracing::error!("API request failed: {:#}", e);
                Self::internal_error("Internal server error")
            }
        }
    }
}

/// Failure of a page or form handler
#[derive(Debug)]
pub enum PageError {
    BadRequest(String),
    Forbidden(String),
    NotFound,
    Internal(String),
}

/// Marker left on a response for [`render_error_pages`]
#[derive(Debug, Clone)]
struct ErrorPage {
    message: String,
}

impl PageError {
    fn status(&self) -> StatusCode {
        match self {
            PageError::BadRequest(_) => StatusCode::BAD_REQUEST,
            PageError::Forbidden(_) => StatusCode::FORBIDDEN,
            PageError::NotFound => StatusCode::NOT_FOUND,
            PageError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            PageError::BadRequest(msg) | PageError::Forbidden(msg) => msg,
            PageError::NotFound => "This page does not exist.".to_string(),
            PageError::Internal(detail) => {
                tracing::error!("Request failed: {}", detail);
                "Something went wrong on our side.".to_string()
            }
        };
        let mut response = (status, message.clone()).into_response();
        response.extensions_mut().insert(ErrorPage { message });
        response
    }
}

impl From<anyhow::Error> for PageError {
    fn from(e: anyhow::Error) -> Self {
        PageError::Internal(format!("{:#}", e))
    }
}

impl From<TemplateError> for PageError {
    fn from(e: TemplateError) -> Self {
        PageError::Internal(e.to_string())
    }
}

impl From<BlueprintServiceError> for PageError {
    fn from(e: BlueprintServiceError) -> Self {
        match e {
            BlueprintServiceError::NotFound => PageError::NotFound,
            BlueprintServiceError::Forbidden(msg) => PageError::Forbidden(msg),
            BlueprintServiceError::ValidationError(msg) => PageError::BadRequest(msg),
            BlueprintServiceError::InternalError(e) => e.into(),
        }
    }
}

impl From<CommentServiceError> for PageError {
    fn from(e: CommentServiceError) -> Self {
        match e {
            CommentServiceError::NotFound | CommentServiceError::BlueprintNotFound => PageError::NotFound,
            CommentServiceError::Forbidden(msg) => PageError::Forbidden(msg),
            CommentServiceError::Closed => PageError::Forbidden("Comments are closed".to_string()),
            CommentServiceError::ValidationError(msg) => PageError::BadRequest(msg),
            CommentServiceError::InternalError(e) => e.into(),
        }
    }
}

impl From<TagServiceError> for PageError {
    fn from(e: TagServiceError) -> Self {
        match e {
            TagServiceError::NotFound(_) => PageError::NotFound,
            TagServiceError::ValidationError(msg) => PageError::BadRequest(msg),
            TagServiceError::InternalError(e) => e.into(),
        }
    }
}

impl From<UserServiceError> for PageError {
    fn from(e: UserServiceError) -> Self {
        match e {
            UserServiceError::NotFound => PageError::NotFound,
            UserServiceError::Forbidden(msg) => PageError::Forbidden(msg),
            UserServiceError::InternalError(e) => e.into(),
            other => PageError::BadRequest(other.to_string()),
        }
    }
}

/// Replace bodies of [`PageError`] responses with the rendered error page
pub async fn render_error_pages(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let user = user_from_extensions(request.extensions());
    let path = request.uri().path().to_string();

    let response = next.run(request).await;
    let Some(page) = response.extensions().get::<ErrorPage>().cloned() else {
        return response;
    };

    let status = response.status();
    let vars = StandardTemplateVars::new(&state.config.site.name, &state.config.site.base_url, path)
        .with_user(user.as_ref());
    let mut context = TeraContext::new();
    context.insert("status", &status.as_u16());
    context.insert("message", &page.message);

    match state.theme.render_page("error.html", &context, &vars) {
        Ok(html) => {
            let (mut parts, _) = response.into_parts();
            parts.headers.remove(header::CONTENT_LENGTH);
            parts.headers.remove(header::CONTENT_TYPE);
            (parts, Html(html)).into_response()
        }
        Err(e) => {
            tracing::error!("Failed to render error page: {}", e);
            response
        }
    }
}

/// Everything a page handler needs to render a template
pub struct View {
    theme: Arc<ThemeEngine>,
    vars: StandardTemplateVars,
    jar: PrivateCookieJar,
    user: Option<User>,
}

impl FromRequestParts<AppState> for View {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = MaybeUser::from_request_parts(parts, state).await?.0;
        let jar = PrivateCookieJar::from_headers(&parts.headers, state.cookie_key.clone());
        let (jar, flash) = Flash::take(jar);

        let mut vars = StandardTemplateVars::new(
            &state.config.site.name,
            &state.config.site.base_url,
            parts.uri.path(),
        )
        .with_user(user.as_ref());
        if let Some(flash) = flash {
            vars.flash_errors = flash.errors;
            vars.flash_success = flash.success;
            vars.form = flash.form;
        }

        Ok(View {
            theme: state.theme.clone(),
            vars,
            jar,
            user,
        })
    }
}

impl View {
    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn render(self, template: &str, context: &TeraContext) -> Result<Response, PageError> {
        let html = self.theme.render_page(template, context, &self.vars)?;
        Ok((self.jar, Html(html)).into_response())
    }
}
