//! JSON endpoints for tools and editor plugins

use axum::{
    extract::{
        rejection::{FormRejection, JsonRejection},
        State,
    },
    http::HeaderMap,
    Form, Json,
};
use serde::{Deserialize, Serialize};

use crate::services::blueprint::{render_lines, CreateBlueprintInput};
use crate::web::middleware::AppState;
use crate::web::responses::ApiError;

const TOKEN_HEADER: &str = "x-token";

#[derive(Debug, Deserialize)]
pub struct RenderRequest {
    #[serde(default)]
    pub blueprint: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RenderResponse {
    pub html: String,
}

/// POST /api/render
pub async fn render(
    payload: Result<Json<RenderRequest>, JsonRejection>,
) -> Result<Json<RenderResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::validation_error(e.body_text()))?;
    if request.blueprint.trim().is_empty() {
        return Err(ApiError::validation_error("Blueprint is required"));
    }
    Ok(Json(RenderResponse {
        html: render_lines(&request.blueprint),
    }))
}

#[derive(Debug, Deserialize)]
pub struct UploadForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub exposure: String,
    #[serde(default)]
    pub expiration: String,
    #[serde(default)]
    pub ue_version: String,
    #[serde(default)]
    pub blueprint: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub key: String,
}

/// POST /api/upload, authenticated by the `X-Token` API key
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<UploadForm>, FormRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let token = headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();
    if token.is_empty() {
        return Err(ApiError::unauthorized("Missing X-Token header"));
    }
    let user = state
        .services
        .users
        .get_by_api_key(token)
        .await
        .map_err(|e| {
            tracing::error!("API key lookup failed: {}", e);
            ApiError::internal_error("Internal server error")
        })?
        .ok_or_else(|| ApiError::unauthorized("Invalid API key"))?;

    let Form(form) = form.map_err(|e| ApiError::validation_error(e.body_text()))?;
    let input = CreateBlueprintInput {
        title: form.title,
        exposure: form.exposure,
        expiration: form.expiration,
        ue_version: form.ue_version,
        content: form.blueprint,
    };
    let blueprint = state.services.blueprints.create(Some(&user), input).await?;

    tracing::info!("Blueprint {} uploaded through the API by {}", blueprint.slug, user.username);
    Ok(Json(UploadResponse { key: blueprint.slug }))
}
