//! Comment forms

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    response::Response,
    Form,
};
use axum_extra::extract::cookie::PrivateCookieJar;
use serde::{Deserialize, Serialize};

use crate::services::CommentServiceError;
use crate::web::flash::Flash;
use crate::web::middleware::{AppState, AuthenticatedUser};
use crate::web::responses::PageError;

#[derive(Debug, Serialize, Deserialize)]
pub struct CommentForm {
    #[serde(default)]
    pub comment: String,
}

fn comments_url(slug: &str) -> String {
    format!("/blueprint/{}/#comments", slug)
}

/// Same-site page the form was posted from
fn back(headers: &HeaderMap) -> String {
    headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<axum::http::Uri>().ok())
        .map(|uri| uri.path().to_string())
        .filter(|path| path.starts_with('/') && !path.starts_with("//"))
        .unwrap_or_else(|| "/".to_string())
}

/// POST /blueprint/{slug}/comment/
pub async fn add(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(slug): Path<String>,
    jar: PrivateCookieJar,
    Form(form): Form<CommentForm>,
) -> Result<Response, PageError> {
    match state.services.comments.add(&user, &slug, &form.comment).await {
        Ok(_) => Ok(Flash::success("Comment added").redirect(jar, &comments_url(&slug))),
        Err(CommentServiceError::ValidationError(msg)) => {
            Ok(Flash::error(msg).with_form(&form).redirect(jar, &comments_url(&slug)))
        }
        Err(CommentServiceError::Closed) => {
            Ok(Flash::error("Comments are closed").redirect(jar, &comments_url(&slug)))
        }
        Err(e) => Err(e.into()),
    }
}

/// POST /comment/{id}/edit/
pub async fn edit(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    headers: HeaderMap,
    jar: PrivateCookieJar,
    Form(form): Form<CommentForm>,
) -> Result<Response, PageError> {
    match state.services.comments.edit(&user, id, &form.comment).await {
        Ok(slug) => Ok(Flash::success("Comment updated").redirect(jar, &comments_url(&slug))),
        Err(CommentServiceError::ValidationError(msg)) => {
            Ok(Flash::error(msg).redirect(jar, &back(&headers)))
        }
        Err(e) => Err(e.into()),
    }
}

/// POST /comment/{id}/delete/
pub async fn delete(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    jar: PrivateCookieJar,
) -> Result<Response, PageError> {
    let slug = state.services.comments.delete(&user, id).await?;
    Ok(Flash::success("Comment deleted").redirect(jar, &comments_url(&slug)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_back_keeps_same_site_paths() {
        let mut headers = HeaderMap::new();
        assert_eq!(back(&headers), "/");

        headers.insert(header::REFERER, HeaderValue::from_static("http://localhost:8080/blueprint/abc/"));
        assert_eq!(back(&headers), "/blueprint/abc/");
    }
}
