//! Helpers shared by page handlers

use axum::extract::multipart::Field;
use axum::extract::Multipart;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::models::{BlueprintType, Expiration, Exposure, ListParams};
use crate::web::responses::PageError;

/// Cards per listing page
pub const PER_PAGE: u32 = 15;
/// Cards on the home page
pub const HOME_COUNT: u32 = 5;

fn default_page() -> u32 {
    1
}

/// `?page=N` on listings
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
}

impl PageQuery {
    pub fn params(&self) -> ListParams {
        ListParams::new(self.page, PER_PAGE)
    }
}

/// One `<option>` of a select box
#[derive(Debug, Clone, Serialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

impl SelectOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

pub fn exposure_options(logged_in: bool) -> Vec<SelectOption> {
    let mut options = vec![
        SelectOption::new(Exposure::Public.as_str(), "Public"),
        SelectOption::new(Exposure::Unlisted.as_str(), "Unlisted"),
    ];
    if logged_in {
        options.push(SelectOption::new(Exposure::Private.as_str(), "Private"));
    }
    options
}

/// Expiration choices; the edit form adds one that keeps the current deadline
pub fn expiration_options(with_keep: bool) -> Vec<SelectOption> {
    let mut options = Vec::new();
    if with_keep {
        options.push(SelectOption::new("keep", "Keep current"));
    }
    options.extend([
        SelectOption::new(Expiration::Never.as_str(), "Never"),
        SelectOption::new(Expiration::OneHour.as_str(), "1 hour"),
        SelectOption::new(Expiration::OneDay.as_str(), "1 day"),
        SelectOption::new(Expiration::OneWeek.as_str(), "1 week"),
    ]);
    options
}

pub fn ue_version_options(config: &Config) -> Vec<SelectOption> {
    config
        .site
        .ue_versions
        .iter()
        .map(|v| SelectOption::new(v.clone(), v.clone()))
        .collect()
}

/// Search filters start with an "any" entry
pub fn search_ue_version_options(config: &Config) -> Vec<SelectOption> {
    let mut options = vec![SelectOption::new("", "Any version")];
    options.extend(ue_version_options(config));
    options
}

pub fn type_options() -> Vec<SelectOption> {
    let mut options = vec![SelectOption::new("", "Any type")];
    options.extend(
        BlueprintType::ALL
            .iter()
            .map(|t| SelectOption::new(t.url_segment(), t.label())),
    );
    options
}

/// HTML checkboxes are absent when unchecked
pub fn checkbox(value: &Option<String>) -> bool {
    matches!(value.as_deref(), Some("1") | Some("on") | Some("true"))
}

/// An uploaded image read from a multipart form
pub struct UploadedImage {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Read the file field `name`, enforcing the configured type and size limits
pub async fn read_image(
    config: &Config,
    multipart: &mut Multipart,
    name: &str,
) -> Result<Result<UploadedImage, String>, PageError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PageError::BadRequest(format!("Failed to read upload: {}", e)))?
    {
        if field.name() != Some(name) {
            continue;
        }
        return read_image_field(config, field).await;
    }
    Ok(Err("No file was uploaded".to_string()))
}

async fn read_image_field(
    config: &Config,
    field: Field<'_>,
) -> Result<Result<UploadedImage, String>, PageError> {
    let content_type = field
        .content_type()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());
    if !config.storage.is_type_allowed(&content_type) {
        return Ok(Err(format!("Invalid file type: {}", content_type)));
    }

    let data = field
        .bytes()
        .await
        .map_err(|e| PageError::BadRequest(format!("Failed to read upload: {}", e)))?;
    if data.is_empty() {
        return Ok(Err("No file was uploaded".to_string()));
    }
    if data.len() as u64 > config.storage.max_upload_size {
        return Ok(Err(format!(
            "File too large. Maximum size: {} MB",
            config.storage.max_upload_size / 1024 / 1024
        )));
    }

    Ok(Ok(UploadedImage {
        content_type,
        data: data.to_vec(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_exposure_needs_login() {
        let anonymous: Vec<_> = exposure_options(false).into_iter().map(|o| o.value).collect();
        assert_eq!(anonymous, vec!["public", "unlisted"]);
        assert_eq!(exposure_options(true).len(), 3);
    }

    #[test]
    fn test_keep_expiration_comes_first() {
        assert_eq!(expiration_options(true)[0].value, "keep");
        assert!(expiration_options(false).iter().all(|o| o.value != "keep"));
    }

    #[test]
    fn test_checkbox_values() {
        assert!(checkbox(&Some("1".to_string())));
        assert!(checkbox(&Some("on".to_string())));
        assert!(!checkbox(&None));
        assert!(!checkbox(&Some("0".to_string())));
    }

    #[test]
    fn test_page_query_clamps() {
        let params = PageQuery { page: 0 }.params();
        assert_eq!(params.page, 1);
        assert_eq!(params.per_page, PER_PAGE);
    }
}
