//! Blueprint pages and the owner's forms

use axum::{
    extract::{Multipart, Path, State},
    response::Response,
    Form,
};
use axum_extra::extract::cookie::PrivateCookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tera::Context as TeraContext;

use crate::models::{Blueprint, BlueprintVersion, CommentWithAuthor, User};
use crate::services::blueprint::{render_lines, EditBlueprintInput};
use crate::services::diff;
use crate::services::BlueprintServiceError;
use crate::web::common::{
    checkbox, exposure_options, expiration_options, read_image, ue_version_options,
};
use crate::web::flash::Flash;
use crate::web::middleware::{AppState, AuthenticatedUser};
use crate::web::responses::{PageError, View};

#[derive(Debug, Serialize)]
struct AuthorView {
    username: String,
    slug: String,
}

#[derive(Debug, Serialize)]
struct VersionView {
    version: i64,
    reason: String,
    created_at: DateTime<Utc>,
    /// Version right before this one, for the diff link
    previous: Option<i64>,
}

/// Versions come newest first, so each one's predecessor is the next entry
fn version_views(versions: &[BlueprintVersion]) -> Vec<VersionView> {
    versions
        .iter()
        .enumerate()
        .map(|(i, v)| VersionView {
            version: v.version,
            reason: v.reason.clone(),
            created_at: v.created_at,
            previous: versions.get(i + 1).map(|p| p.version),
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct CommentView {
    id: i64,
    author: String,
    author_slug: Option<String>,
    content: String,
    created_at: DateTime<Utc>,
    can_edit: bool,
    can_delete: bool,
}

impl CommentView {
    fn new(comment: CommentWithAuthor, viewer: Option<&User>) -> Self {
        let author_id = comment.comment.id_author;
        let is_author = viewer.is_some_and(|u| author_id == Some(u.id));
        Self {
            id: comment.comment.id,
            author: comment.display_name().to_string(),
            author_slug: comment.author_slug.clone(),
            content: comment.comment.content.clone(),
            created_at: comment.comment.created_at,
            can_edit: is_author,
            can_delete: is_author || viewer.is_some_and(User::is_admin),
        }
    }
}

/// GET /blueprint/{slug}/
pub async fn blueprint_page(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    view: View,
) -> Result<Response, PageError> {
    let blueprint = state.services.blueprints.get_visible(&slug, view.user()).await?;
    let version = blueprint.current_version;
    render_blueprint(&state, view, blueprint, version).await
}

/// GET /blueprint/{slug}/{version}/
pub async fn blueprint_version_page(
    State(state): State<AppState>,
    Path((slug, version)): Path<(String, i64)>,
    view: View,
) -> Result<Response, PageError> {
    let blueprint = state.services.blueprints.get_visible(&slug, view.user()).await?;
    render_blueprint(&state, view, blueprint, version).await
}

async fn render_blueprint(
    state: &AppState,
    view: View,
    blueprint: Blueprint,
    version: i64,
) -> Result<Response, PageError> {
    let services = &state.services;
    let content = services.blueprints.get_version_content(&blueprint, version).await?;
    let versions = services.blueprints.list_versions(&blueprint).await?;
    let author = services.blueprints.get_author(&blueprint).await?;
    let anonymous_owned = services.blueprints.is_anonymous_owned(&blueprint).await?;
    let tags = services.blueprints.tags_for(&blueprint).await?;
    let comments: Vec<CommentView> = services
        .comments
        .list_for_blueprint(&blueprint)
        .await?
        .into_iter()
        .map(|c| CommentView::new(c, view.user()))
        .collect();

    let viewer = view.user();
    let is_owner = viewer.is_some_and(|u| blueprint.is_owned_by(u));
    let can_delete = viewer.is_some_and(|u| u.can_moderate(blueprint.id_author));

    let mut context = TeraContext::new();
    context.insert("blueprint", &blueprint);
    context.insert(
        "author",
        &AuthorView {
            username: author.username,
            slug: author.slug,
        },
    );
    context.insert("tags", &tags);
    context.insert("is_owner", &is_owner);
    context.insert("anonymous_owned", &anonymous_owned);
    context.insert("can_delete", &can_delete);
    context.insert("version", &version);
    context.insert("versions", &version_views(&versions));
    context.insert("content_html", &render_lines(&content));
    context.insert("content", &content);
    context.insert("comments", &comments);
    view.render("blueprint.html", &context)
}

/// GET /blueprint/{slug}/diff/{previous}/{current}/
pub async fn diff_page(
    State(state): State<AppState>,
    Path((slug, previous, current)): Path<(String, i64, i64)>,
    view: View,
) -> Result<Response, PageError> {
    let blueprint = state.services.blueprints.get_visible(&slug, view.user()).await?;
    let lines = state.services.blueprints.diff(&blueprint, previous, current).await?;

    let mut context = TeraContext::new();
    context.insert("blueprint", &blueprint);
    context.insert("previous", &previous);
    context.insert("current", &current);
    context.insert("stats", &diff::stats(&lines));
    context.insert("lines", &lines);
    view.render("diff.html", &context)
}

/// GET /render/{slug}/{version}/
pub async fn render_page(
    State(state): State<AppState>,
    Path((slug, version)): Path<(String, i64)>,
    view: View,
) -> Result<Response, PageError> {
    let blueprint = state.services.blueprints.get_visible(&slug, view.user()).await?;
    let content = state.services.blueprints.get_version_content(&blueprint, version).await?;

    let mut context = TeraContext::new();
    context.insert("blueprint", &blueprint);
    context.insert("version", &version);
    context.insert("content_html", &render_lines(&content));
    view.render("render.html", &context)
}

/// The blueprint, if `user` may change it
async fn owned_blueprint(state: &AppState, user: &User, slug: &str) -> Result<Blueprint, PageError> {
    let blueprint = state.services.blueprints.get_visible(slug, Some(user)).await?;
    if !blueprint.is_owned_by(user) {
        return Err(PageError::Forbidden(
            "Only the author can edit this blueprint".to_string(),
        ));
    }
    Ok(blueprint)
}

fn edit_url(slug: &str) -> String {
    format!("/blueprint/{}/edit/", slug)
}

/// GET /blueprint/{slug}/edit/
pub async fn edit_page(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(slug): Path<String>,
    view: View,
) -> Result<Response, PageError> {
    let blueprint = owned_blueprint(&state, &user, &slug).await?;
    let tags = state.services.tags.input_for(blueprint.id).await?;
    let versions = state.services.blueprints.list_versions(&blueprint).await?;

    let mut context = TeraContext::new();
    context.insert("description", blueprint.description.as_deref().unwrap_or(""));
    context.insert("video", blueprint.video.as_deref().unwrap_or(""));
    context.insert("blueprint", &blueprint);
    context.insert("tags", &tags);
    context.insert("exposures", &exposure_options(true));
    context.insert("expirations", &expiration_options(true));
    context.insert("ue_versions", &ue_version_options(&state.config));
    context.insert("versions", &version_views(&versions));
    view.render("blueprint_edit.html", &context)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EditForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub exposure: String,
    #[serde(default)]
    pub expiration: String,
    #[serde(default)]
    pub ue_version: String,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub video: String,
    pub comments_hidden: Option<String>,
    pub comments_closed: Option<String>,
}

/// Turn the outcome of an owner form into a redirect back to the edit page
fn after_form<T>(
    result: Result<T, BlueprintServiceError>,
    jar: PrivateCookieJar,
    slug: &str,
    success: &str,
    form: Option<Flash>,
) -> Result<Response, PageError> {
    match result {
        Ok(_) => Ok(Flash::success(success).redirect(jar, &edit_url(slug))),
        Err(BlueprintServiceError::ValidationError(msg)) => {
            let mut flash = form.unwrap_or_default();
            flash.errors.push(msg);
            Ok(flash.redirect(jar, &edit_url(slug)))
        }
        Err(e) => Err(e.into()),
    }
}

/// POST /blueprint/{slug}/edit/
pub async fn edit(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(slug): Path<String>,
    jar: PrivateCookieJar,
    Form(form): Form<EditForm>,
) -> Result<Response, PageError> {
    let expiration = match form.expiration.as_str() {
        "" | "keep" => None,
        other => Some(other.to_string()),
    };
    let input = EditBlueprintInput {
        title: form.title.clone(),
        description: form.description.clone(),
        exposure: form.exposure.clone(),
        expiration,
        ue_version: form.ue_version.clone(),
        tags: form.tags.clone(),
        video: form.video.clone(),
        comments_hidden: checkbox(&form.comments_hidden),
        comments_closed: checkbox(&form.comments_closed),
    };

    let result = state.services.blueprints.edit(&user, &slug, input).await;
    after_form(
        result,
        jar,
        &slug,
        "Blueprint updated",
        Some(Flash::default().with_form(&form)),
    )
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddVersionForm {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub blueprint: String,
}

/// POST /blueprint/{slug}/add-version/
pub async fn add_version(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(slug): Path<String>,
    jar: PrivateCookieJar,
    Form(form): Form<AddVersionForm>,
) -> Result<Response, PageError> {
    let result = state
        .services
        .blueprints
        .add_version(&user, &slug, &form.blueprint, &form.reason)
        .await;
    match result {
        Ok(version) => {
            let to = format!("/blueprint/{}/{}/", slug, version.version);
            Ok(Flash::success("New version added").redirect(jar, &to))
        }
        Err(BlueprintServiceError::ValidationError(msg)) => {
            Ok(Flash::error(msg).with_form(&form).redirect(jar, &edit_url(&slug)))
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteVersionForm {
    pub version: i64,
}

/// POST /blueprint/{slug}/delete-version/
pub async fn delete_version(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(slug): Path<String>,
    jar: PrivateCookieJar,
    Form(form): Form<DeleteVersionForm>,
) -> Result<Response, PageError> {
    let result = state.services.blueprints.delete_version(&user, &slug, form.version).await;
    after_form(result, jar, &slug, "Version deleted", None)
}

/// POST /blueprint/{slug}/delete/
pub async fn delete(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(slug): Path<String>,
    jar: PrivateCookieJar,
) -> Result<Response, PageError> {
    state.services.blueprints.delete(&user, &slug).await?;
    tracing::info!("Blueprint {} deleted by {}", slug, user.username);
    Ok(Flash::success("Blueprint deleted").redirect(jar, &format!("/profile/{}/", user.slug)))
}

/// POST /blueprint/{slug}/thumbnail/
pub async fn upload_thumbnail(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(slug): Path<String>,
    jar: PrivateCookieJar,
    mut multipart: Multipart,
) -> Result<Response, PageError> {
    owned_blueprint(&state, &user, &slug).await?;
    let image = match read_image(&state.config, &mut multipart, "thumbnail").await? {
        Ok(image) => image,
        Err(msg) => return Ok(Flash::error(msg).redirect(jar, &edit_url(&slug))),
    };

    let result = state
        .services
        .blueprints
        .set_thumbnail(&user, &slug, &image.data, &image.content_type)
        .await;
    after_form(result, jar, &slug, "Thumbnail updated", None)
}

/// POST /blueprint/{slug}/thumbnail/delete/
pub async fn delete_thumbnail(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(slug): Path<String>,
    jar: PrivateCookieJar,
) -> Result<Response, PageError> {
    let result = state.services.blueprints.delete_thumbnail(&user, &slug).await;
    after_form(result, jar, &slug, "Thumbnail removed", None)
}
