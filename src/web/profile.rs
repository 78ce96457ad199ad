//! Profile pages and account settings

use axum::{
    extract::{Multipart, Path, Query, State},
    response::{IntoResponse, Redirect, Response},
    Form,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, PrivateCookieJar};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tera::Context as TeraContext;

use crate::models::{User, UserInfos};
use crate::services::user::{BlueprintsChoice, CommentsChoice, ProfileInfosInput};
use crate::services::UserServiceError;
use crate::web::common::{read_image, PageQuery};
use crate::web::flash::Flash;
use crate::web::middleware::{AppState, AuthenticatedUser, SESSION_COOKIE};
use crate::web::responses::{PageError, View};

#[derive(Debug, Serialize)]
struct ProfileView {
    username: String,
    slug: String,
    avatar: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<&User> for ProfileView {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            slug: user.slug.clone(),
            avatar: user.avatar.clone(),
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct LinkView {
    url: String,
    label: &'static str,
}

/// Full URL for a profile link given either as a URL or as a handle
fn link_url(base: &str, value: &str) -> String {
    let lower = value.to_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        value.to_string()
    } else {
        format!("{}{}", base, value.trim_start_matches('@'))
    }
}

fn profile_links(infos: &UserInfos) -> Vec<LinkView> {
    let sites: [(&Option<String>, &'static str, &str); 6] = [
        (&infos.link_website, "Website", ""),
        (&infos.link_twitter, "Twitter", "https://twitter.com/"),
        (&infos.link_github, "GitHub", "https://github.com/"),
        (&infos.link_twitch, "Twitch", "https://www.twitch.tv/"),
        (&infos.link_unreal, "Unreal forums", "https://forums.unrealengine.com/u/"),
        (&infos.link_youtube, "YouTube", "https://www.youtube.com/@"),
    ];
    sites
        .into_iter()
        .filter_map(|(value, label, base)| {
            value.as_deref().map(|v| LinkView {
                url: link_url(base, v),
                label,
            })
        })
        .collect()
}

/// GET /profile/{slug}/
pub async fn profile_page(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<PageQuery>,
    view: View,
) -> Result<Response, PageError> {
    let profile = state.services.users.get_profile(&slug).await?;
    let page = state
        .services
        .blueprints
        .list_by_author(&profile.user, view.user(), &query.params())
        .await?;
    let is_owner = view.user().is_some_and(|u| u.id == profile.user.id);

    let mut context = TeraContext::new();
    context.insert("profile", &ProfileView::from(&profile.user));
    context.insert("links", &profile_links(&profile.infos));
    context.insert("infos", &profile.infos);
    context.insert("is_owner", &is_owner);
    context.insert("total_pages", &page.total_pages());
    context.insert("page", &page);
    view.render("profile.html", &context)
}

/// Only the account owner may use the settings pages
fn check_owner(user: &User, slug: &str) -> Result<(), PageError> {
    if user.slug != slug {
        return Err(PageError::Forbidden("You can only edit your own profile".to_string()));
    }
    Ok(())
}

fn edit_url(user: &User) -> String {
    format!("/profile/{}/edit/", user.slug)
}

/// GET /profile/{slug}/edit/
pub async fn edit_page(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(slug): Path<String>,
    view: View,
) -> Result<Response, PageError> {
    check_owner(&user, &slug)?;
    let profile = state.services.users.get_profile(&slug).await?;

    let mut context = TeraContext::new();
    context.insert("profile", &ProfileView::from(&profile.user));
    context.insert("infos", &profile.infos);
    context.insert("email", &profile.user.email);
    context.insert("api_key", &profile.user.api_key);
    context.insert("anonymous_username", &state.config.site.anonymous_username);
    view.render("profile_edit.html", &context)
}

/// Redirect back to the settings page with the outcome
fn after_form<T>(
    result: Result<T, UserServiceError>,
    jar: PrivateCookieJar,
    user: &User,
    success: &str,
) -> Result<Response, PageError> {
    match result {
        Ok(_) => Ok(Flash::success(success).redirect(jar, &edit_url(user))),
        Err(UserServiceError::InternalError(e)) => Err(e.into()),
        Err(UserServiceError::NotFound) => Err(PageError::NotFound),
        Err(e) => Ok(Flash::error(user_message(e)).redirect(jar, &edit_url(user))),
    }
}

fn user_message(e: UserServiceError) -> String {
    match e {
        UserServiceError::ValidationError(msg)
        | UserServiceError::UserExists(msg)
        | UserServiceError::AuthenticationError(msg)
        | UserServiceError::Forbidden(msg) => msg,
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize)]
pub struct InfosForm {
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub link_website: String,
    #[serde(default)]
    pub link_twitter: String,
    #[serde(default)]
    pub link_github: String,
    #[serde(default)]
    pub link_twitch: String,
    #[serde(default)]
    pub link_unreal: String,
    #[serde(default)]
    pub link_youtube: String,
}

/// POST /profile/{slug}/edit/infos/
pub async fn edit_infos(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(slug): Path<String>,
    jar: PrivateCookieJar,
    Form(form): Form<InfosForm>,
) -> Result<Response, PageError> {
    check_owner(&user, &slug)?;
    let input = ProfileInfosInput {
        bio: form.bio,
        link_website: form.link_website,
        link_twitter: form.link_twitter,
        link_github: form.link_github,
        link_twitch: form.link_twitch,
        link_unreal: form.link_unreal,
        link_youtube: form.link_youtube,
    };
    let result = state.services.users.edit_profile_infos(&user, input).await;
    after_form(result, jar, &user, "Profile updated")
}

#[derive(Debug, Deserialize)]
pub struct UsernameForm {
    #[serde(default)]
    pub username: String,
}

/// POST /profile/{slug}/edit/username/
pub async fn change_username(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(slug): Path<String>,
    jar: PrivateCookieJar,
    Form(form): Form<UsernameForm>,
) -> Result<Response, PageError> {
    check_owner(&user, &slug)?;
    match state.services.users.change_username(&user, &form.username).await {
        Ok(renamed) => {
            state.services.blueprints.invalidate_lists();
            Ok(Flash::success("Username changed").redirect(jar, &edit_url(&renamed)))
        }
        Err(e) => after_form(Err::<(), _>(e), jar, &user, ""),
    }
}

#[derive(Debug, Deserialize)]
pub struct EmailForm {
    #[serde(default)]
    pub email: String,
}

/// POST /profile/{slug}/edit/email/
pub async fn change_email(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(slug): Path<String>,
    jar: PrivateCookieJar,
    Form(form): Form<EmailForm>,
) -> Result<Response, PageError> {
    check_owner(&user, &slug)?;
    let result = state.services.users.change_email(&user, &form.email).await;
    after_form(result, jar, &user, "Email changed")
}

#[derive(Debug, Deserialize)]
pub struct PasswordForm {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
    #[serde(default)]
    pub new_password_confirm: String,
}

/// POST /profile/{slug}/edit/password/
pub async fn change_password(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(slug): Path<String>,
    jar: PrivateCookieJar,
    Form(form): Form<PasswordForm>,
) -> Result<Response, PageError> {
    check_owner(&user, &slug)?;
    let result = state
        .services
        .users
        .change_password(&user, &form.current_password, &form.new_password, &form.new_password_confirm)
        .await;
    after_form(result, jar, &user, "Password changed")
}

/// POST /profile/{slug}/edit/api-key/
pub async fn generate_api_key(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(slug): Path<String>,
    jar: PrivateCookieJar,
) -> Result<Response, PageError> {
    check_owner(&user, &slug)?;
    let result = state.services.users.generate_api_key(&user).await;
    after_form(result, jar, &user, "New API key generated")
}

/// POST /profile/{slug}/edit/avatar/
pub async fn upload_avatar(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(slug): Path<String>,
    jar: PrivateCookieJar,
    mut multipart: Multipart,
) -> Result<Response, PageError> {
    check_owner(&user, &slug)?;
    let image = match read_image(&state.config, &mut multipart, "avatar").await? {
        Ok(image) => image,
        Err(msg) => return Ok(Flash::error(msg).redirect(jar, &edit_url(&user))),
    };
    let result = state
        .services
        .users
        .set_avatar(&user, &image.data, &image.content_type)
        .await;
    if result.is_ok() {
        state.services.blueprints.invalidate_lists();
    }
    after_form(result, jar, &user, "Avatar updated")
}

/// POST /profile/{slug}/edit/avatar/delete/
pub async fn delete_avatar(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(slug): Path<String>,
    jar: PrivateCookieJar,
) -> Result<Response, PageError> {
    check_owner(&user, &slug)?;
    let result = state.services.users.delete_avatar(&user).await;
    if result.is_ok() {
        state.services.blueprints.invalidate_lists();
    }
    after_form(result, jar, &user, "Avatar removed")
}

#[derive(Debug, Deserialize)]
pub struct DeleteAccountForm {
    #[serde(default)]
    pub blueprints: String,
    #[serde(default)]
    pub comments: String,
}

/// POST /profile/{slug}/edit/delete/
pub async fn delete_account(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(slug): Path<String>,
    cookies: CookieJar,
    jar: PrivateCookieJar,
    Form(form): Form<DeleteAccountForm>,
) -> Result<Response, PageError> {
    check_owner(&user, &slug)?;
    let choices = BlueprintsChoice::from_str(&form.blueprints)
        .and_then(|b| CommentsChoice::from_str(&form.comments).map(|c| (b, c)));
    let (blueprints, comments) = match choices {
        Ok(choices) => choices,
        Err(e) => return after_form(Err::<(), _>(e), jar, &user, ""),
    };

    if let Err(e) = state.services.users.delete_account(&user, blueprints, comments).await {
        return after_form(Err::<(), _>(e), jar, &user, "");
    }
    state.services.blueprints.invalidate_lists();

    let cookies = cookies.remove(Cookie::build(SESSION_COOKIE).path("/"));
    let jar = Flash::success("Your account has been deleted").store(jar);
    Ok((cookies, jar, Redirect::to("/")).into_response())
}
