//! Request middleware and extractors
//!
//! `load_user` resolves the `session` cookie once per request and stores the
//! user in the request extensions; `AuthenticatedUser` and `MaybeUser` read it
//! back in handlers.

use axum::{
    extract::{ConnectInfo, FromRef, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, Key, SameSite};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::config::{Config, ServerConfig};
use crate::models::{Session, User};
use crate::services::{Services, UserServiceError};
use crate::theme::ThemeEngine;

pub const SESSION_COOKIE: &str = "session";

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub services: Services,
    pub theme: Arc<ThemeEngine>,
    pub cookie_key: Key,
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

impl AppState {
    /// Cookies are only marked secure when the site is served over https
    pub fn secure_cookies(&self) -> bool {
        self.config.site.base_url.starts_with("https://")
    }

    /// Cookie carrying the session token until the session expires
    pub fn session_cookie(&self, session: &Session) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, session.id.clone()))
            .path("/")
            .http_only(true)
            .secure(self.secure_cookies())
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(session.remaining_seconds()))
            .build()
    }
}

/// Cookie key from configuration, or a fresh random one.
///
/// A generated key changes on every restart, which logs everyone out and
/// drops pending flash messages.
pub fn cookie_key(configured: &str) -> Key {
    if configured.is_empty() {
        return Key::generate();
    }
    match Key::try_from(configured.as_bytes()) {
        Ok(key) => key,
        Err(e) => {
            tracing::warn!("Ignoring site.cookie_key ({}), generating a random key", e);
            Key::generate()
        }
    }
}

/// The logged-in user, stored in request extensions by [`load_user`]
#[derive(Debug, Clone)]
struct CurrentUser(User);

/// User placed by [`load_user`], for middleware running after it
pub(crate) fn user_from_extensions(extensions: &axum::http::Extensions) -> Option<User> {
    extensions.get::<CurrentUser>().map(|u| u.0.clone())
}

/// Resolve the session cookie into a user for the rest of the stack
pub async fn load_user(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let jar = CookieJar::from_headers(request.headers());
    let Some(token) = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) else {
        return next.run(request).await;
    };

    let mut clear_cookie = false;
    match state.services.users.validate_session(&token).await {
        Ok(Some(user)) => {
            request.extensions_mut().insert(CurrentUser(user));
        }
        Ok(None) => clear_cookie = true,
        Err(UserServiceError::SessionExpired) => {
            tracing::debug!("Session expired, clearing cookie");
            clear_cookie = true;
        }
        Err(e) => tracing::error!("Session validation failed: {}", e),
    }

    let mut response = next.run(request).await;
    if clear_cookie {
        let removal = Cookie::build((SESSION_COOKIE, "")).path("/").max_age(time::Duration::ZERO).build();
        if let Ok(value) = HeaderValue::from_str(&removal.to_string()) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

/// Handler argument for pages and forms that need a login
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .map(|u| AuthenticatedUser(u.0.clone()))
            .ok_or_else(|| Redirect::to("/login/").into_response())
    }
}

/// Handler argument for pages open to everyone
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

impl MaybeUser {
    pub fn as_ref(&self) -> Option<&User> {
        self.0.as_ref()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for MaybeUser {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(parts.extensions.get::<CurrentUser>().map(|u| u.0.clone())))
    }
}

/// Client address. The socket peer, unless the peer is a trusted proxy; then
/// the nearest untrusted `X-Forwarded-For` hop.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub Option<IpAddr>);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip());
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok());
        Ok(ClientIp(client_ip(peer, forwarded, &state.config.server)))
    }
}

pub(crate) fn client_ip(
    peer: Option<IpAddr>,
    forwarded: Option<&str>,
    server: &ServerConfig,
) -> Option<IpAddr> {
    let peer = peer?;
    if !server.is_trusted_proxy(peer) {
        return Some(peer);
    }
    let Some(forwarded) = forwarded else {
        return Some(peer);
    };

    // Hops are appended left to right; walk back past our own proxies
    let mut client = peer;
    for hop in forwarded.rsplit(',') {
        match hop.trim().parse::<IpAddr>() {
            Ok(ip) => {
                client = ip;
                if !server.is_trusted_proxy(ip) {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    Some(client)
}
