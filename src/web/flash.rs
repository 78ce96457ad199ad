//! Flash data
//!
//! Messages and the values of a rejected form survive exactly one redirect
//! in an encrypted cookie. The next rendered page consumes them.

use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const FLASH_COOKIE: &str = "flash";
/// Form values longer than this are not carried over; cookies are small.
const MAX_FORM_VALUE_LENGTH: usize = 1024;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Flash {
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub success: Option<String>,
    #[serde(default)]
    pub form: HashMap<String, String>,
}

impl Flash {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
            ..Default::default()
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: Some(message.into()),
            ..Default::default()
        }
    }

    /// Keep the submitted values so the form can be refilled.
    /// Password fields and oversized values are dropped.
    pub fn with_form<T: Serialize>(mut self, form: &T) -> Self {
        let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(form) else {
            return self;
        };
        for (name, value) in fields {
            if name.contains("password") {
                continue;
            }
            if let serde_json::Value::String(value) = value {
                if value.len() <= MAX_FORM_VALUE_LENGTH {
                    self.form.insert(name, value);
                }
            }
        }
        self
    }

    /// Remove the flash cookie, returning what it held
    pub fn take(jar: PrivateCookieJar) -> (PrivateCookieJar, Option<Flash>) {
        let flash = jar
            .get(FLASH_COOKIE)
            .and_then(|c| serde_json::from_str(c.value()).ok());
        match flash {
            Some(flash) => (jar.remove(Cookie::from(FLASH_COOKIE)), Some(flash)),
            None => (jar, None),
        }
    }

    pub fn store(self, jar: PrivateCookieJar) -> PrivateCookieJar {
        match serde_json::to_string(&self) {
            Ok(value) => jar.add(
                Cookie::build((FLASH_COOKIE, value))
                    .path("/")
                    .http_only(true)
                    .same_site(SameSite::Lax)
                    .build(),
            ),
            Err(e) => {
                tracing::warn!("Failed to store flash data: {}", e);
                jar
            }
        }
    }

    /// Store the flash and redirect (303) to `to`
    pub fn redirect(self, jar: PrivateCookieJar, to: &str) -> Response {
        (self.store(jar), Redirect::to(to)).into_response()
    }
}
