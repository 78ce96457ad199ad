//! Web layer: routing, pages, forms and the JSON API
//!
//! Every page route ends with a slash. Page handlers fail with
//! [`responses::PageError`], which the error-page middleware turns into
//! a rendered HTML page; `/api/*` handlers answer with JSON errors instead.

pub mod api;
pub mod auth;
pub mod blueprints;
pub mod comments;
pub mod common;
pub mod flash;
pub mod home;
pub mod lists;
pub mod middleware;
pub mod profile;
pub mod responses;
pub mod site;
pub mod static_files;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

pub use middleware::AppState;
use responses::PageError;

/// Request bodies above this are refused; pasted blueprints can be large
const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// CORS for the JSON API. `*` allows any origin without credentials.
fn cors_layer(origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static("x-token")]);

    match origin.trim() {
        "" => cors,
        "*" => cors.allow_origin(Any),
        origin => match origin.parse::<HeaderValue>() {
            Ok(value) => cors.allow_origin(value),
            Err(e) => {
                tracing::warn!("Ignoring invalid server.cors_origin {:?}: {}", origin, e);
                cors
            }
        },
    }
}

fn blueprint_routes() -> Router<AppState> {
    Router::new()
        .route("/blueprint/{slug}/", get(blueprints::blueprint_page))
        .route("/blueprint/{slug}/{version}/", get(blueprints::blueprint_version_page))
        .route(
            "/blueprint/{slug}/diff/{previous}/{current}/",
            get(blueprints::diff_page),
        )
        .route(
            "/blueprint/{slug}/edit/",
            get(blueprints::edit_page).post(blueprints::edit),
        )
        .route("/blueprint/{slug}/add-version/", post(blueprints::add_version))
        .route("/blueprint/{slug}/delete-version/", post(blueprints::delete_version))
        .route("/blueprint/{slug}/delete/", post(blueprints::delete))
        .route("/blueprint/{slug}/thumbnail/", post(blueprints::upload_thumbnail))
        .route(
            "/blueprint/{slug}/thumbnail/delete/",
            post(blueprints::delete_thumbnail),
        )
        .route("/blueprint/{slug}/comment/", post(comments::add))
        .route("/comment/{id}/edit/", post(comments::edit))
        .route("/comment/{id}/delete/", post(comments::delete))
        .route("/render/{slug}/{version}/", get(blueprints::render_page))
}

fn list_routes() -> Router<AppState> {
    Router::new()
        .route("/last-blueprints/", get(lists::last_blueprints))
        .route("/most-discussed-blueprints/", get(lists::most_discussed))
        .route("/type/{kind}/", get(lists::by_type))
        .route("/tag/{slug}/", get(lists::by_tag))
        .route("/tags/", get(lists::tags))
        .route("/search/", get(lists::search))
}

fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/login/", get(auth::login_page).post(auth::login))
        .route("/logout/", post(auth::logout))
        .route("/register/", get(auth::register_page).post(auth::register))
        .route("/confirm-account/", get(auth::confirm_account))
        .route(
            "/forgot-password/",
            get(auth::forgot_password_page).post(auth::forgot_password),
        )
        .route(
            "/reset-password/",
            get(auth::reset_password_page).post(auth::reset_password),
        )
        .route("/profile/{slug}/", get(profile::profile_page))
        .route("/profile/{slug}/edit/", get(profile::edit_page))
        .route("/profile/{slug}/edit/infos/", post(profile::edit_infos))
        .route("/profile/{slug}/edit/username/", post(profile::change_username))
        .route("/profile/{slug}/edit/email/", post(profile::change_email))
        .route("/profile/{slug}/edit/password/", post(profile::change_password))
        .route("/profile/{slug}/edit/api-key/", post(profile::generate_api_key))
        .route("/profile/{slug}/edit/avatar/", post(profile::upload_avatar))
        .route("/profile/{slug}/edit/avatar/delete/", post(profile::delete_avatar))
        .route("/profile/{slug}/edit/delete/", post(profile::delete_account))
}

async fn not_found() -> PageError {
    PageError::NotFound
}

/// Build the complete router with middleware
pub fn build_router(state: AppState) -> Router {
    let body_limit = MAX_BODY_SIZE.max(state.config.storage.max_upload_size as usize + 64 * 1024);
    let medias = ServeDir::new(&state.config.storage.medias_dir);

    let api_routes = Router::new()
        .route("/api/render", post(api::render))
        .route("/api/upload", post(api::upload))
        .layer(cors_layer(&state.config.server.cors_origin));

    Router::new()
        .route("/", get(home::home_page).post(home::paste))
        .merge(blueprint_routes())
        .merge(list_routes())
        .merge(account_routes())
        .route("/contact/", get(site::contact))
        .route("/privacy-policy/", get(site::privacy_policy))
        .route("/terms-of-service/", get(site::terms_of_service))
        .route("/static/{*path}", get(static_files::serve_static))
        .nest_service("/medias", medias)
        .merge(api_routes)
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        // Runs after `load_user`, so error pages know who is logged in
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            responses::render_error_pages,
        ))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::load_user))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
