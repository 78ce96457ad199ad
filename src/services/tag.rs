//! Tag service
//!
//! Tags are typed as a comma separated list on the blueprint edit form.
//! Names are free text; identity is the slug.

use anyhow::Context;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::{keys, Cache};
use crate::db::repositories::TagRepository;
use crate::models::{Tag, TagGroup};
use crate::services::slug::slugify;

pub const MAX_TAG_LENGTH: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum TagServiceError {
    #[error("Tag not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct TagService {
    repo: Arc<dyn TagRepository>,
    cache: Cache,
}

/// Split the raw form value into `(name, slug)` pairs, first spelling wins.
pub fn parse_tag_input(input: &str) -> Result<Vec<(String, String)>, TagServiceError> {
    let mut seen = std::collections::HashSet::new();
    let mut tags = Vec::new();

    for raw in input.split(',') {
        let name = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if name.is_empty() {
            continue;
        }
        if name.chars().count() > MAX_TAG_LENGTH {
            return Err(TagServiceError::ValidationError(format!(
                "Tag \"{}\" is longer than {} characters",
                name.chars().take(20).collect::<String>(),
                MAX_TAG_LENGTH
            )));
        }
        let slug = slugify(&name);
        if slug.is_empty() || !seen.insert(slug.clone()) {
            continue;
        }
        tags.push((name, slug));
    }

    Ok(tags)
}

/// Group letter of a tag: upper-cased first letter, `#` when not alphabetic
fn group_letter(name: &str) -> String {
    match name.chars().next() {
        Some(c) if c.is_alphabetic() => c.to_uppercase().collect(),
        _ => "#".to_string(),
    }
}

/// `#` first, then letters in order
pub fn group_tags(tags: Vec<Tag>) -> Vec<TagGroup> {
    let mut groups: BTreeMap<String, Vec<Tag>> = BTreeMap::new();
    for tag in tags {
        groups.entry(group_letter(&tag.name)).or_default().push(tag);
    }

    groups
        .into_iter()
        .map(|(letter, mut tags)| {
            tags.sort_by_key(|t| t.name.to_lowercase());
            TagGroup { letter, tags }
        })
        .collect()
}

impl TagService {
    pub fn new(repo: Arc<dyn TagRepository>, cache: Cache) -> Self {
        Self { repo, cache }
    }

    /// Replace the tags of a blueprint with the ones typed in `input`.
    pub async fn sync_from_input(
        &self,
        id_blueprint: i64,
        input: &str,
    ) -> Result<Vec<Tag>, TagServiceError> {
        let parsed = parse_tag_input(input)?;

        let mut tags = Vec::with_capacity(parsed.len());
        for (name, slug) in parsed {
            tags.push(self.repo.get_or_create(&name, &slug).await?);
        }

        let ids: Vec<i64> = tags.iter().map(|t| t.id).collect();
        self.repo
            .set_for_blueprint(id_blueprint, &ids)
            .await
            .context("Failed to update blueprint tags")?;

        let pruned = self.repo.delete_unused().await?;
        if pruned > 0 {
            tracing::debug!("Removed {} unused tags", pruned);
        }
        self.invalidate().await;

        Ok(tags)
    }

    /// Every tag, grouped by first letter for the tag index
    pub async fn list_grouped(&self) -> Result<Vec<TagGroup>, TagServiceError> {
        let repo = self.repo.clone();
        let groups = self
            .cache
            .get_or_load(keys::TAGS_GROUPED, || async move {
                Ok(group_tags(repo.list_all().await?))
            })
            .await?;
        Ok(groups)
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Tag, TagServiceError> {
        self.repo
            .get_by_slug(slug)
            .await?
            .ok_or_else(|| TagServiceError::NotFound(slug.to_string()))
    }

    pub async fn tags_for(&self, id_blueprint: i64) -> Result<Vec<Tag>, TagServiceError> {
        Ok(self.repo.list_by_blueprint(id_blueprint).await?)
    }

    /// Comma separated names, as shown back in the edit form
    pub async fn input_for(&self, id_blueprint: i64) -> Result<String, TagServiceError> {
        let tags = self.tags_for(id_blueprint).await?;
        Ok(tags.into_iter().map(|t| t.name).collect::<Vec<_>>().join(", "))
    }

    pub async fn invalidate(&self) {
        self.cache.delete(keys::TAGS_GROUPED).await;
    }
}
