//! Login, registration and password recovery

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    Form,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, PrivateCookieJar};
use serde::{Deserialize, Serialize};
use tera::Context as TeraContext;

use crate::services::user::{LoginInput, RegisterInput};
use crate::services::UserServiceError;
use crate::web::common::checkbox;
use crate::web::flash::Flash;
use crate::web::middleware::{AppState, ClientIp, SESSION_COOKIE};
use crate::web::responses::{PageError, View};

/// Errors a visitor can fix by correcting the form
fn is_user_error(e: &UserServiceError) -> bool {
    !matches!(e, UserServiceError::InternalError(_))
}

/// GET /login/
pub async fn login_page(view: View) -> Result<Response, PageError> {
    if view.user().is_some() {
        return Ok(Redirect::to("/").into_response());
    }
    view.render("login.html", &TeraContext::new())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub remember: Option<String>,
}

/// POST /login/
pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    cookies: CookieJar,
    jar: PrivateCookieJar,
    Form(form): Form<LoginForm>,
) -> Result<Response, PageError> {
    let input = LoginInput {
        username: form.username.clone(),
        password: form.password.clone(),
        remember: checkbox(&form.remember),
    };

    match state.services.users.login(input, ip).await {
        Ok((_, session)) => {
            let cookies = cookies.add(state.session_cookie(&session));
            Ok((cookies, Redirect::to("/")).into_response())
        }
        Err(e) if is_user_error(&e) => {
            let message = match &e {
                UserServiceError::RateLimited => e.to_string(),
                _ => "Invalid username or password".to_string(),
            };
            Ok(Flash::error(message).with_form(&form).redirect(jar, "/login/"))
        }
        Err(e) => Err(e.into()),
    }
}

/// POST /logout/
pub async fn logout(State(state): State<AppState>, cookies: CookieJar) -> Result<Response, PageError> {
    if let Some(token) = cookies.get(SESSION_COOKIE).map(|c| c.value().to_string()) {
        state.services.users.logout(&token).await?;
    }
    let cookies = cookies.remove(Cookie::build(SESSION_COOKIE).path("/"));
    Ok((cookies, Redirect::to("/")).into_response())
}

/// GET /register/
pub async fn register_page(view: View) -> Result<Response, PageError> {
    if view.user().is_some() {
        return Ok(Redirect::to("/").into_response());
    }
    view.render("register.html", &TeraContext::new())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_confirm: String,
}

/// POST /register/
pub async fn register(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Form(form): Form<RegisterForm>,
) -> Result<Response, PageError> {
    let input = RegisterInput {
        username: form.username.clone(),
        email: form.email.clone(),
        password: form.password.clone(),
        password_confirm: form.password_confirm.clone(),
    };

    match state.services.users.register(input).await {
        Ok(user) => Ok(Flash::success(format!(
            "Welcome {}! Check your mailbox to confirm your account.",
            user.username
        ))
        .redirect(jar, "/login/")),
        Err(e @ (UserServiceError::ValidationError(_) | UserServiceError::UserExists(_))) => {
            Ok(Flash::error(message_of(&e)).with_form(&form).redirect(jar, "/register/"))
        }
        Err(e) => Err(e.into()),
    }
}

/// Service error text without its category prefix
fn message_of(e: &UserServiceError) -> String {
    match e {
        UserServiceError::ValidationError(msg)
        | UserServiceError::UserExists(msg)
        | UserServiceError::AuthenticationError(msg)
        | UserServiceError::Forbidden(msg) => msg.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfirmQuery {
    #[serde(default)]
    pub confirmed_token: String,
}

/// GET /confirm-account/?confirmed_token=...
pub async fn confirm_account(
    State(state): State<AppState>,
    Query(query): Query<ConfirmQuery>,
    view: View,
) -> Result<Response, PageError> {
    let confirmed = match state.services.users.confirm_account(&query.confirmed_token).await {
        Ok(_) => true,
        Err(UserServiceError::InvalidToken) => false,
        Err(e) => return Err(e.into()),
    };
    let mut context = TeraContext::new();
    context.insert("confirmed", &confirmed);
    view.render("confirm_account.html", &context)
}

/// GET /forgot-password/
pub async fn forgot_password_page(view: View) -> Result<Response, PageError> {
    view.render("forgot_password.html", &TeraContext::new())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ForgotPasswordForm {
    #[serde(default)]
    pub email: String,
}

/// POST /forgot-password/
pub async fn forgot_password(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Form(form): Form<ForgotPasswordForm>,
) -> Result<Response, PageError> {
    match state.services.users.forgot_password(&form.email).await {
        Ok(()) => Ok(Flash::success(
            "If an account uses this address, a reset link is on its way.",
        )
        .redirect(jar, "/login/")),
        Err(e) if is_user_error(&e) => Ok(Flash::error(message_of(&e))
            .with_form(&form)
            .redirect(jar, "/forgot-password/")),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct ResetQuery {
    #[serde(default)]
    pub reset_token: String,
}

/// GET /reset-password/?reset_token=...
pub async fn reset_password_page(
    State(state): State<AppState>,
    Query(query): Query<ResetQuery>,
    view: View,
) -> Result<Response, PageError> {
    let token_valid = match state.services.users.check_reset_token(&query.reset_token).await {
        Ok(_) => true,
        Err(UserServiceError::InvalidToken) => false,
        Err(e) => return Err(e.into()),
    };
    let mut context = TeraContext::new();
    context.insert("token_valid", &token_valid);
    context.insert("token", &query.reset_token);
    view.render("reset_password.html", &context)
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordForm {
    #[serde(default)]
    pub reset_token: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_confirm: String,
}

/// POST /reset-password/
pub async fn reset_password(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Form(form): Form<ResetPasswordForm>,
) -> Result<Response, PageError> {
    let result = state
        .services
        .users
        .reset_password(&form.reset_token, &form.password, &form.password_confirm)
        .await;
    match result {
        Ok(_) => Ok(Flash::success("Your password has been changed, you can log in.").redirect(jar, "/login/")),
        Err(e) if is_user_error(&e) => {
            let back = format!(
                "/reset-password/?reset_token={}",
                urlencoding::encode(&form.reset_token)
            );
            Ok(Flash::error(message_of(&e)).redirect(jar, &back))
        }
        Err(e) => Err(e.into()),
    }
}
