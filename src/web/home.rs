//! Home page and the paste form

use axum::{
    extract::State,
    response::{IntoResponse, Redirect, Response},
    Form,
};
use axum_extra::extract::cookie::PrivateCookieJar;
use serde::{Deserialize, Serialize};
use tera::Context as TeraContext;

use crate::services::blueprint::CreateBlueprintInput;
use crate::services::BlueprintServiceError;
use crate::web::common::{exposure_options, expiration_options, ue_version_options, HOME_COUNT};
use crate::web::flash::Flash;
use crate::web::middleware::{AppState, MaybeUser};
use crate::web::responses::{PageError, View};

/// GET /
pub async fn home_page(State(state): State<AppState>, view: View) -> Result<Response, PageError> {
    let blueprints = state.services.blueprints.home(HOME_COUNT).await?;

    let mut context = TeraContext::new();
    context.insert("blueprints", &blueprints);
    context.insert("exposures", &exposure_options(view.user().is_some()));
    context.insert("expirations", &expiration_options(false));
    context.insert("ue_versions", &ue_version_options(&state.config));
    context.insert("default_ue_version", state.config.site.default_ue_version());
    context.insert("anonymous_username", &state.config.site.anonymous_username);
    view.render("home.html", &context)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PasteForm {
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

/// POST /
pub async fn paste(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    jar: PrivateCookieJar,
    Form(form): Form<PasteForm>,
) -> Result<Response, PageError> {
    let input = CreateBlueprintInput {
        title: form.title.clone(),
        exposure: form.exposure.clone(),
        expiration: form.expiration.clone(),
        ue_version: form.ue_version.clone(),
        content: form.blueprint.clone(),
    };

    match state.services.blueprints.create(user.as_ref(), input).await {
        Ok(blueprint) => {
            tracing::info!("Blueprint {} pasted", blueprint.slug);
            Ok(Redirect::to(&format!("/blueprint/{}/", blueprint.slug)).into_response())
        }
        Err(BlueprintServiceError::ValidationError(msg)) => {
            Ok(Flash::error(msg).with_form(&form).redirect(jar, "/"))
        }
        Err(e) => Err(e.into()),
    }
}
