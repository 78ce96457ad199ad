//! Blueprint service
//!
//! Pasting, versioning, editing and listing blueprints. Contents are stored
//! on disk, one file per version; the database only holds metadata.

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::sync::Arc;

use crate::cache::{keys, Cache};
use crate::config::SiteConfig;
use crate::db::repositories::{
    BlueprintFilter, BlueprintOrder, BlueprintRepository, NewBlueprint, UserRepository,
};
use crate::models::{
    Blueprint, BlueprintCard, BlueprintType, BlueprintVersion, Expiration, Exposure, ListParams,
    PagedResult, Tag, User,
};
use crate::services::diff::{diff_lines, DiffLine};
use crate::services::slug::{random_slug, random_token};
use crate::services::storage::{image_extension, BlueprintStorage, MediaKind, MediaStorage};
use crate::services::tag::{TagService, TagServiceError};
use crate::services::video::parse_video_url;

pub const MAX_TITLE_LENGTH: usize = 255;
pub const FIRST_COMMIT_REASON: &str = "First commit";
const CONTENT_MARKER: &str = "Begin Object";
const SLUG_LENGTH: usize = 10;
const FILE_ID_LENGTH: usize = 24;
const MAX_KEY_ATTEMPTS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum BlueprintServiceError {
    #[error("Blueprint not found")]
    NotFound,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<TagServiceError> for BlueprintServiceError {
    fn from(e: TagServiceError) -> Self {
        match e {
            TagServiceError::ValidationError(msg) => BlueprintServiceError::ValidationError(msg),
            TagServiceError::NotFound(slug) => {
                BlueprintServiceError::ValidationError(format!("Unknown tag {}", slug))
            }
            TagServiceError::InternalError(e) => BlueprintServiceError::InternalError(e),
        }
    }
}

fn invalid(msg: impl Into<String>) -> BlueprintServiceError {
    BlueprintServiceError::ValidationError(msg.into())
}

/// Paste form, also used by the upload API
#[derive(Debug, Clone, Default)]
pub struct CreateBlueprintInput {
    pub title: String,
    pub exposure: String,
    pub expiration: String,
    pub ue_version: String,
    pub content: String,
}

/// Edit form. `expiration: None` keeps the current deadline.
#[derive(Debug, Clone, Default)]
pub struct EditBlueprintInput {
    pub title: String,
    pub description: String,
    pub exposure: String,
    pub expiration: Option<String>,
    pub ue_version: String,
    pub tags: String,
    pub video: String,
    pub comments_hidden: bool,
    pub comments_closed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub query: String,
    pub kind: Option<BlueprintType>,
    pub ue_version: Option<String>,
}

impl SearchQuery {
    pub fn is_empty(&self) -> bool {
        self.query.trim().is_empty() && self.kind.is_none() && self.ue_version.is_none()
    }
}

fn check_title(title: &str) -> Result<String, BlueprintServiceError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(invalid("Title is required"));
    }
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(invalid(format!(
            "Title must be at most {} characters",
            MAX_TITLE_LENGTH
        )));
    }
    Ok(title.to_string())
}

fn check_content(content: &str) -> Result<(), BlueprintServiceError> {
    if !content.contains(CONTENT_MARKER) {
        return Err(invalid("This does not look like an Unreal Engine blueprint"));
    }
    Ok(())
}

fn parse_exposure(value: &str) -> Result<Exposure, BlueprintServiceError> {
    Exposure::from_str(value.trim()).map_err(|_| invalid("Exposure is invalid"))
}

fn parse_expiration(value: &str) -> Result<Expiration, BlueprintServiceError> {
    Expiration::from_str(value).map_err(|_| invalid("Expiration is invalid"))
}

/// Escaped, line-numbered HTML for a blueprint's text
pub fn render_lines(content: &str) -> String {
    let mut html = String::with_capacity(content.len() * 2);
    html.push_str("<ol class=\"blueprint-lines\">");
    for line in content.lines() {
        html.push_str("<li><code>");
        html.push_str(&tera::escape_html(line));
        html.push_str("</code></li>");
    }
    html.push_str("</ol>");
    html
}

pub struct BlueprintService {
    repo: Arc<dyn BlueprintRepository>,
    user_repo: Arc<dyn UserRepository>,
    tags: Arc<TagService>,
    files: BlueprintStorage,
    medias: MediaStorage,
    cache: Cache,
    site: Arc<SiteConfig>,
}

impl BlueprintService {
    pub fn new(
        repo: Arc<dyn BlueprintRepository>,
        user_repo: Arc<dyn UserRepository>,
        tags: Arc<TagService>,
        files: BlueprintStorage,
        medias: MediaStorage,
        cache: Cache,
        site: Arc<SiteConfig>,
    ) -> Self {
        Self {
            repo,
            user_repo,
            tags,
            files,
            medias,
            cache,
            site,
        }
    }

    async fn anonymous(&self) -> Result<User, BlueprintServiceError> {
        self.user_repo
            .get_by_username(&self.site.anonymous_username)
            .await?
            .ok_or_else(|| anyhow!("Anonymous account is missing").into())
    }

    fn check_ue_version(&self, value: &str) -> Result<String, BlueprintServiceError> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(self.site.default_ue_version().to_string());
        }
        if !self.site.is_ue_version_allowed(value) {
            return Err(invalid(format!("Unknown UE version {}", value)));
        }
        Ok(value.to_string())
    }

    async fn unique_key(&self, len: usize, slug: bool) -> Result<String, BlueprintServiceError> {
        for _ in 0..MAX_KEY_ATTEMPTS {
            let key = if slug { random_slug(len) } else { random_token(len) };
            let taken = if slug {
                self.repo.slug_exists(&key).await?
            } else {
                self.repo.file_id_exists(&key).await?
            };
            if !taken {
                return Ok(key);
            }
        }
        Err(anyhow!("Could not generate a unique blueprint key").into())
    }

    async fn after_write(&self, id_author: i64) -> Result<(), BlueprintServiceError> {
        self.user_repo.refresh_counters(id_author).await?;
        self.invalidate_lists();
        Ok(())
    }

    /// Exposure or deletion changes move commenters' counters as well
    async fn after_visibility_change(&self, id: i64) -> Result<(), BlueprintServiceError> {
        for user in self.repo.participant_ids(id).await? {
            self.user_repo.refresh_counters(user).await?;
        }
        self.invalidate_lists();
        Ok(())
    }

    /// Drop cached listings; cards embed author names and avatars too
    pub fn invalidate_lists(&self) {
        self.cache.delete_prefix(keys::HOME_PREFIX);
        self.cache.delete_prefix(keys::BLUEPRINT_LISTS_PREFIX);
    }

    /// Paste a new blueprint. `author: None` pastes as the anonymous account.
    pub async fn create(
        &self,
        author: Option<&User>,
        input: CreateBlueprintInput,
    ) -> Result<Blueprint, BlueprintServiceError> {
        let anonymous = self.anonymous().await?;
        let author = match author {
            Some(user) => user.clone(),
            None => anonymous.clone(),
        };
        let is_anonymous = author.id == anonymous.id;

        let title = check_title(&input.title)?;
        let exposure = parse_exposure(&input.exposure)?;
        if is_anonymous && exposure == Exposure::Private {
            return Err(invalid("Anonymous blueprints cannot be private"));
        }
        let expiration = parse_expiration(&input.expiration)?;
        let ue_version = self.check_ue_version(&input.ue_version)?;
        check_content(&input.content)?;

        let now = Utc::now();
        let slug = self.unique_key(SLUG_LENGTH, true).await?;
        let file_id = self.unique_key(FILE_ID_LENGTH, false).await?;

        self.files.write(&file_id, 1, &input.content).await?;

        let blueprint = self
            .repo
            .create(&NewBlueprint {
                id_author: author.id,
                slug,
                file_id,
                title,
                kind: BlueprintType::detect(&input.content),
                ue_version,
                exposure,
                expiration: expiration.deadline(now),
                created_at: now,
            })
            .await
            .context("Failed to create blueprint")?;
        self.repo
            .create_version(blueprint.id, 1, FIRST_COMMIT_REASON, now)
            .await?;

        self.after_write(author.id).await?;
        tracing::info!(
            "Blueprint {} created by {} ({})",
            blueprint.slug,
            author.username,
            blueprint.kind
        );
        Ok(blueprint)
    }

    /// A blueprint `viewer` is allowed to see.
    pub async fn get_visible(
        &self,
        slug: &str,
        viewer: Option<&User>,
    ) -> Result<Blueprint, BlueprintServiceError> {
        let blueprint = self
            .repo
            .get_by_slug(slug)
            .await?
            .ok_or(BlueprintServiceError::NotFound)?;

        if !blueprint.is_visible_to(viewer, Utc::now()) {
            return Err(BlueprintServiceError::NotFound);
        }
        Ok(blueprint)
    }

    /// A live blueprint that `owner` authored
    async fn get_owned(&self, owner: &User, slug: &str) -> Result<Blueprint, BlueprintServiceError> {
        let blueprint = self.get_visible(slug, Some(owner)).await?;
        if !blueprint.is_owned_by(owner) {
            return Err(BlueprintServiceError::Forbidden(
                "Only the author can change this blueprint".to_string(),
            ));
        }
        Ok(blueprint)
    }

    pub async fn get_author(&self, blueprint: &Blueprint) -> Result<User, BlueprintServiceError> {
        self.user_repo
            .get_by_id(blueprint.id_author)
            .await?
            .ok_or_else(|| anyhow!("Author of blueprint {} is missing", blueprint.slug).into())
    }

    pub async fn is_anonymous_owned(&self, blueprint: &Blueprint) -> Result<bool, BlueprintServiceError> {
        Ok(blueprint.id_author == self.anonymous().await?.id)
    }

    pub async fn get_version_content(
        &self,
        blueprint: &Blueprint,
        version: i64,
    ) -> Result<String, BlueprintServiceError> {
        if self.repo.get_version(blueprint.id, version).await?.is_none() {
            return Err(BlueprintServiceError::NotFound);
        }
        self.files
            .read(&blueprint.file_id, version)
            .await?
            .ok_or_else(|| {
                anyhow!("Missing file for blueprint {} version {}", blueprint.slug, version).into()
            })
    }

    /// Newest first
    pub async fn list_versions(
        &self,
        blueprint: &Blueprint,
    ) -> Result<Vec<BlueprintVersion>, BlueprintServiceError> {
        Ok(self.repo.list_versions(blueprint.id).await?)
    }

    pub async fn add_version(
        &self,
        owner: &User,
        slug: &str,
        content: &str,
        reason: &str,
    ) -> Result<BlueprintVersion, BlueprintServiceError> {
        let blueprint = self.get_owned(owner, slug).await?;
        if self.is_anonymous_owned(&blueprint).await? {
            return Err(BlueprintServiceError::Forbidden(
                "Anonymous blueprints cannot get new versions".to_string(),
            ));
        }

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(invalid("Reason is required"));
        }
        check_content(content)?;

        let latest = self
            .repo
            .list_versions(blueprint.id)
            .await?
            .first()
            .map(|v| v.version)
            .unwrap_or(0);
        let number = latest + 1;
        let now = Utc::now();

        self.files.write(&blueprint.file_id, number, content).await?;
        let version = self.repo.create_version(blueprint.id, number, reason, now).await?;
        self.repo.set_current_version(blueprint.id, number, now).await?;

        self.after_write(blueprint.id_author).await?;
        tracing::info!("Blueprint {} now at version {}", blueprint.slug, number);
        Ok(version)
    }

    pub async fn delete_version(
        &self,
        owner: &User,
        slug: &str,
        version: i64,
    ) -> Result<(), BlueprintServiceError> {
        let blueprint = self.get_owned(owner, slug).await?;
        let versions = self.repo.list_versions(blueprint.id).await?;

        if !versions.iter().any(|v| v.version == version) {
            return Err(BlueprintServiceError::NotFound);
        }
        if versions.len() <= 1 {
            return Err(invalid("A blueprint must keep at least one version"));
        }

        self.repo.delete_version(blueprint.id, version).await?;
        self.files.delete(&blueprint.file_id, version).await?;

        if blueprint.current_version == version {
            let fallback = versions
                .iter()
                .map(|v| v.version)
                .filter(|v| *v != version)
                .max()
                .unwrap_or(1);
            self.repo
                .set_current_version(blueprint.id, fallback, Utc::now())
                .await?;
        }

        self.after_write(blueprint.id_author).await?;
        tracing::info!("Deleted version {} of blueprint {}", version, blueprint.slug);
        Ok(())
    }

    pub async fn edit(
        &self,
        owner: &User,
        slug: &str,
        input: EditBlueprintInput,
    ) -> Result<Blueprint, BlueprintServiceError> {
        let mut blueprint = self.get_owned(owner, slug).await?;
        if self.is_anonymous_owned(&blueprint).await? {
            return Err(BlueprintServiceError::Forbidden(
                "Anonymous blueprints cannot be edited".to_string(),
            ));
        }

        blueprint.title = check_title(&input.title)?;
        let description = input.description.trim();
        blueprint.description = (!description.is_empty()).then(|| description.to_string());
        blueprint.exposure = parse_exposure(&input.exposure)?;
        if let Some(expiration) = &input.expiration {
            blueprint.expiration = parse_expiration(expiration)?.deadline(Utc::now());
        }
        blueprint.ue_version = self.check_ue_version(&input.ue_version)?;

        let video = input.video.trim();
        if video.is_empty() {
            blueprint.video = None;
            blueprint.video_provider = None;
        } else {
            let embed = parse_video_url(video).ok_or_else(|| {
                invalid("Video must be a YouTube, Vimeo, Dailymotion, Bilibili or Niconico link")
            })?;
            blueprint.video = Some(embed.url);
            blueprint.video_provider = Some(embed.provider.to_string());
        }

        blueprint.comments_hidden = input.comments_hidden;
        blueprint.comments_closed = input.comments_closed;

        self.tags.sync_from_input(blueprint.id, &input.tags).await?;
        self.repo.update_properties(&blueprint).await?;
        self.after_visibility_change(blueprint.id).await?;

        self.repo
            .get_by_id(blueprint.id)
            .await?
            .ok_or(BlueprintServiceError::NotFound)
    }

    pub async fn set_thumbnail(
        &self,
        owner: &User,
        slug: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<String, BlueprintServiceError> {
        let blueprint = self.get_owned(owner, slug).await?;
        if image_extension(content_type).is_none() {
            return Err(invalid(format!("Unsupported image type: {}", content_type)));
        }
        if data.is_empty() {
            return Err(invalid("Image is empty"));
        }

        let name = self.medias.save(MediaKind::Thumbnail, data, content_type).await?;
        self.repo.set_thumbnail(blueprint.id, Some(&name)).await?;
        if let Some(old) = &blueprint.thumbnail {
            self.medias.delete(old).await?;
        }
        self.after_write(blueprint.id_author).await?;
        Ok(name)
    }

    pub async fn delete_thumbnail(&self, owner: &User, slug: &str) -> Result<(), BlueprintServiceError> {
        let blueprint = self.get_owned(owner, slug).await?;
        self.repo.set_thumbnail(blueprint.id, None).await?;
        if let Some(old) = &blueprint.thumbnail {
            self.medias.delete(old).await?;
        }
        self.after_write(blueprint.id_author).await?;
        Ok(())
    }

    /// Soft delete, by the author or an admin
    pub async fn delete(&self, actor: &User, slug: &str) -> Result<(), BlueprintServiceError> {
        let blueprint = self.get_visible(slug, Some(actor)).await?;
        if !actor.can_moderate(blueprint.id_author) {
            return Err(BlueprintServiceError::Forbidden(
                "Only the author can delete this blueprint".to_string(),
            ));
        }

        self.repo.soft_delete(blueprint.id, Utc::now()).await?;
        self.after_visibility_change(blueprint.id).await?;
        tracing::info!("Blueprint {} deleted by {}", blueprint.slug, actor.username);
        Ok(())
    }

    /// Soft-delete blueprints whose expiration passed; returns how many users
    /// (authors and commenters) had their counters refreshed
    pub async fn expire_due(&self, now: DateTime<Utc>) -> Result<usize, BlueprintServiceError> {
        let users = self.repo.expire_due(now).await?;
        for user in &users {
            self.user_repo.refresh_counters(*user).await?;
        }
        if !users.is_empty() {
            self.invalidate_lists();
        }
        Ok(users.len())
    }

    pub async fn diff(
        &self,
        blueprint: &Blueprint,
        previous: i64,
        current: i64,
    ) -> Result<Vec<DiffLine>, BlueprintServiceError> {
        let old = self.get_version_content(blueprint, previous).await?;
        let new = self.get_version_content(blueprint, current).await?;
        let lines = tokio::task::spawn_blocking(move || diff_lines(&old, &new))
            .await
            .context("Diff task failed")?;
        Ok(lines)
    }

    pub async fn tags_for(&self, blueprint: &Blueprint) -> Result<Vec<Tag>, BlueprintServiceError> {
        Ok(self.tags.tags_for(blueprint.id).await?)
    }

    async fn list(
        &self,
        filter: BlueprintFilter,
        order: BlueprintOrder,
        params: &ListParams,
    ) -> Result<PagedResult<BlueprintCard>, BlueprintServiceError> {
        Ok(self.repo.list(&filter, order, params).await?)
    }

    /// Cached public listing; entries are dropped on every write
    async fn cached_list(
        &self,
        key: String,
        filter: BlueprintFilter,
        order: BlueprintOrder,
        params: &ListParams,
    ) -> Result<PagedResult<BlueprintCard>, BlueprintServiceError> {
        let repo = self.repo.clone();
        let params = *params;
        let page = self
            .cache
            .get_or_load(&key, || async move { repo.list(&filter, order, &params).await })
            .await?;
        Ok(page)
    }

    /// Home page block
    pub async fn home(&self, count: u32) -> Result<Vec<BlueprintCard>, BlueprintServiceError> {
        let params = ListParams::new(1, count);
        let key = format!("{}latest:{}", keys::HOME_PREFIX, count);
        let page = self
            .cached_list(key, BlueprintFilter::default(), BlueprintOrder::Latest, &params)
            .await?;
        Ok(page.items)
    }

    pub async fn list_last(&self, params: &ListParams) -> Result<PagedResult<BlueprintCard>, BlueprintServiceError> {
        let key = format!("{}last:{}:{}", keys::BLUEPRINT_LISTS_PREFIX, params.page, params.per_page);
        self.cached_list(key, BlueprintFilter::default(), BlueprintOrder::Latest, params)
            .await
    }

    pub async fn list_most_discussed(
        &self,
        params: &ListParams,
    ) -> Result<PagedResult<BlueprintCard>, BlueprintServiceError> {
        let key = format!(
            "{}discussed:{}:{}",
            keys::BLUEPRINT_LISTS_PREFIX,
            params.page,
            params.per_page
        );
        self.cached_list(key, BlueprintFilter::default(), BlueprintOrder::MostDiscussed, params)
            .await
    }

    pub async fn list_by_type(
        &self,
        kind: BlueprintType,
        params: &ListParams,
    ) -> Result<PagedResult<BlueprintCard>, BlueprintServiceError> {
        let filter = BlueprintFilter {
            kind: Some(kind),
            ..Default::default()
        };
        self.list(filter, BlueprintOrder::Latest, params).await
    }

    pub async fn list_by_tag(
        &self,
        tag: &Tag,
        params: &ListParams,
    ) -> Result<PagedResult<BlueprintCard>, BlueprintServiceError> {
        let filter = BlueprintFilter {
            tag_id: Some(tag.id),
            ..Default::default()
        };
        self.list(filter, BlueprintOrder::Latest, params).await
    }

    pub async fn search(
        &self,
        query: &SearchQuery,
        params: &ListParams,
    ) -> Result<PagedResult<BlueprintCard>, BlueprintServiceError> {
        let text = query.query.trim();
        let filter = BlueprintFilter {
            kind: query.kind,
            ue_version: query.ue_version.clone(),
            query: (!text.is_empty()).then(|| text.to_string()),
            ..Default::default()
        };
        self.list(filter, BlueprintOrder::Latest, params).await
    }

    /// Profile listing; the owner also sees unlisted and private blueprints
    pub async fn list_by_author(
        &self,
        author: &User,
        viewer: Option<&User>,
        params: &ListParams,
    ) -> Result<PagedResult<BlueprintCard>, BlueprintServiceError> {
        let filter = BlueprintFilter {
            author: Some(author.id),
            include_hidden: viewer.is_some_and(|v| v.id == author.id),
            ..Default::default()
        };
        self.list(filter, BlueprintOrder::Latest, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{sample_blueprint, TestServices};

    fn paste(title: &str, exposure: &str) -> CreateBlueprintInput {
        CreateBlueprintInput {
            title: title.to_string(),
            exposure: exposure.to_string(),
            expiration: "never".to_string(),
            ue_version: "5.4".to_string(),
            content: sample_blueprint("K2Node_CallFunction"),
        }
    }

    fn edit_input(title: &str) -> EditBlueprintInput {
        EditBlueprintInput {
            title: title.to_string(),
            exposure: "public".to_string(),
            ue_version: "5.4".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_validation() {
        let t = TestServices::new().await;
        let alice = t.confirmed_user("alice").await;

        let cases = [
            CreateBlueprintInput { title: "  ".into(), ..paste("x", "public") },
            CreateBlueprintInput { title: "x".repeat(256), ..paste("x", "public") },
            paste("x", "secret"),
            CreateBlueprintInput { expiration: "2d".into(), ..paste("x", "public") },
            CreateBlueprintInput { ue_version: "3.0".into(), ..paste("x", "public") },
            CreateBlueprintInput { content: "hello".into(), ..paste("x", "public") },
        ];
        for input in cases {
            let result = t.blueprints.create(Some(&alice), input).await;
            assert!(matches!(result, Err(BlueprintServiceError::ValidationError(_))));
        }

        let result = t.blueprints.create(None, paste("x", "private")).await;
        assert!(matches!(result, Err(BlueprintServiceError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let t = TestServices::new().await;
        let alice = t.confirmed_user("alice").await;

        let mut input = paste("Material test", "public");
        input.content = sample_blueprint("MaterialGraphNode_Constant");
        input.ue_version = String::new();
        let bp = t.blueprints.create(Some(&alice), input.clone()).await.unwrap();

        assert_eq!(bp.kind, BlueprintType::Material);
        assert_eq!(bp.ue_version, "5.5");
        assert_eq!(bp.current_version, 1);
        assert_eq!(bp.slug.len(), SLUG_LENGTH);

        let versions = t.blueprints.list_versions(&bp).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].reason, FIRST_COMMIT_REASON);
        assert_eq!(t.blueprints.get_version_content(&bp, 1).await.unwrap(), input.content);

        let profile = t.users.get_profile("alice").await.unwrap();
        assert_eq!(profile.infos.count_public_blueprint, 1);
    }

    #[tokio::test]
    async fn test_anonymous_paste() {
        let t = TestServices::new().await;
        let alice = t.confirmed_user("alice").await;

        let bp = t.blueprints.create(None, paste("Anon", "unlisted")).await.unwrap();
        assert!(t.blueprints.is_anonymous_owned(&bp).await.unwrap());
        assert_eq!(t.blueprints.get_author(&bp).await.unwrap().username, "anonymous");

        let anonymous = t.users.ensure_anonymous().await.unwrap();
        let err = t.blueprints.edit(&alice, &bp.slug, edit_input("x")).await;
        assert!(matches!(err, Err(BlueprintServiceError::Forbidden(_))));
        let err = t.blueprints.edit(&anonymous, &bp.slug, edit_input("x")).await;
        assert!(matches!(err, Err(BlueprintServiceError::Forbidden(_))));
        let err = t
            .blueprints
            .add_version(&anonymous, &bp.slug, &sample_blueprint("X"), "fix")
            .await;
        assert!(matches!(err, Err(BlueprintServiceError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_visibility() {
        let t = TestServices::new().await;
        let alice = t.confirmed_user("alice").await;
        let bob = t.confirmed_user("bob").await;
        let admin = t.admin_user("root").await;

        let private = t.blueprints.create(Some(&alice), paste("Secret", "private")).await.unwrap();
        assert!(t.blueprints.get_visible(&private.slug, Some(&alice)).await.is_ok());
        assert!(t.blueprints.get_visible(&private.slug, Some(&admin)).await.is_ok());
        assert!(matches!(
            t.blueprints.get_visible(&private.slug, Some(&bob)).await,
            Err(BlueprintServiceError::NotFound)
        ));
        assert!(t.blueprints.get_visible(&private.slug, None).await.is_err());

        let unlisted = t.blueprints.create(Some(&alice), paste("Link", "unlisted")).await.unwrap();
        assert!(t.blueprints.get_visible(&unlisted.slug, None).await.is_ok());

        let page = t.blueprints.list_last(&ListParams::default()).await.unwrap();
        assert_eq!(page.total, 0);

        let own = t.blueprints.list_by_author(&alice, Some(&alice), &ListParams::default()).await.unwrap();
        assert_eq!(own.total, 2);
        let other = t.blueprints.list_by_author(&alice, Some(&bob), &ListParams::default()).await.unwrap();
        assert_eq!(other.total, 0);
    }

    #[tokio::test]
    async fn test_versions_lifecycle() {
        let t = TestServices::new().await;
        let alice = t.confirmed_user("alice").await;
        let bob = t.confirmed_user("bob").await;
        let bp = t.blueprints.create(Some(&alice), paste("Graph", "public")).await.unwrap();

        assert!(matches!(
            t.blueprints.add_version(&alice, &bp.slug, &sample_blueprint("Y"), "  ").await,
            Err(BlueprintServiceError::ValidationError(_))
        ));
        assert!(matches!(
            t.blueprints.add_version(&bob, &bp.slug, &sample_blueprint("Y"), "mine").await,
            Err(BlueprintServiceError::Forbidden(_))
        ));

        let v2 = t
            .blueprints
            .add_version(&alice, &bp.slug, &sample_blueprint("K2Node_IfThenElse"), "Add branch")
            .await
            .unwrap();
        assert_eq!(v2.version, 2);

        let diff = t.blueprints.diff(&bp, 1, 2).await.unwrap();
        assert!(diff.iter().any(|l| l.kind == crate::services::diff::DiffKind::Added));

        t.blueprints.delete_version(&alice, &bp.slug, 2).await.unwrap();
        let reloaded = t.blueprints.get_visible(&bp.slug, None).await.unwrap();
        assert_eq!(reloaded.current_version, 1);
        assert!(matches!(
            t.blueprints.get_version_content(&reloaded, 2).await,
            Err(BlueprintServiceError::NotFound)
        ));

        assert!(matches!(
            t.blueprints.delete_version(&alice, &bp.slug, 1).await,
            Err(BlueprintServiceError::ValidationError(_))
        ));

        let v2 = t
            .blueprints
            .add_version(&alice, &bp.slug, &sample_blueprint("Again"), "Retry")
            .await
            .unwrap();
        assert_eq!(v2.version, 2);
    }

    #[tokio::test]
    async fn test_edit_properties() {
        let t = TestServices::new().await;
        let alice = t.confirmed_user("alice").await;
        let bp = t.blueprints.create(Some(&alice), paste("Graph", "public")).await.unwrap();

        let mut input = edit_input("Renamed");
        input.video = "https://example.com/video".to_string();
        assert!(matches!(
            t.blueprints.edit(&alice, &bp.slug, input).await,
            Err(BlueprintServiceError::ValidationError(_))
        ));

        let input = EditBlueprintInput {
            title: "Renamed".to_string(),
            description: " Handles doors ".to_string(),
            exposure: "unlisted".to_string(),
            expiration: Some("1d".to_string()),
            ue_version: "5.1".to_string(),
            tags: "Doors, Gameplay".to_string(),
            video: "https://youtu.be/dQw4w9WgXcQ".to_string(),
            comments_hidden: false,
            comments_closed: true,
        };
        let edited = t.blueprints.edit(&alice, &bp.slug, input).await.unwrap();
        assert_eq!(edited.title, "Renamed");
        assert_eq!(edited.description.as_deref(), Some("Handles doors"));
        assert_eq!(edited.exposure, Exposure::Unlisted);
        assert!(edited.expiration.is_some());
        assert_eq!(edited.video_provider.as_deref(), Some("youtube"));
        assert!(edited.comments_closed);
        assert_eq!(t.blueprints.tags_for(&edited).await.unwrap().len(), 2);
        assert_eq!(t.tags.input_for(edited.id).await.unwrap(), "Doors, Gameplay");

        let mut keep = edit_input("Renamed");
        keep.expiration = None;
        let kept = t.blueprints.edit(&alice, &bp.slug, keep).await.unwrap();
        assert_eq!(kept.expiration, edited.expiration);
        assert!(kept.video.is_none());
    }

    #[tokio::test]
    async fn test_delete_and_expire() {
        let t = TestServices::new().await;
        let alice = t.confirmed_user("alice").await;
        let bob = t.confirmed_user("bob").await;
        let admin = t.admin_user("root").await;

        let bp = t.blueprints.create(Some(&alice), paste("One", "public")).await.unwrap();
        assert!(matches!(
            t.blueprints.delete(&bob, &bp.slug).await,
            Err(BlueprintServiceError::Forbidden(_))
        ));
        t.blueprints.delete(&admin, &bp.slug).await.unwrap();
        assert!(t.blueprints.get_visible(&bp.slug, Some(&alice)).await.is_err());

        let mut input = paste("Short lived", "public");
        input.expiration = "1h".to_string();
        let short = t.blueprints.create(Some(&alice), input).await.unwrap();
        assert_eq!(t.blueprints.expire_due(Utc::now()).await.unwrap(), 0);
        assert_eq!(
            t.blueprints.expire_due(Utc::now() + chrono::Duration::hours(2)).await.unwrap(),
            1
        );
        assert!(t.blueprints.get_visible(&short.slug, Some(&alice)).await.is_err());
    }

    #[tokio::test]
    async fn test_commenter_counters_follow_visibility() {
        let t = TestServices::new().await;
        let alice = t.confirmed_user("alice").await;
        let bob = t.confirmed_user("bob").await;
        let counts = |id: i64| {
            let users = t.repos.users.clone();
            async move {
                let infos = users.get_infos(id).await.unwrap().unwrap();
                (infos.count_public_comment, infos.count_private_comment)
            }
        };

        let bp = t.blueprints.create(Some(&alice), paste("Graph", "public")).await.unwrap();
        t.comments.add(&bob, &bp.slug, "Nice graph").await.unwrap();
        assert_eq!(counts(bob.id).await, (1, 0));

        let mut input = edit_input("Graph");
        input.exposure = "unlisted".to_string();
        t.blueprints.edit(&alice, &bp.slug, input).await.unwrap();
        assert_eq!(counts(bob.id).await, (0, 1));

        t.blueprints.delete(&alice, &bp.slug).await.unwrap();
        assert_eq!(counts(bob.id).await, (0, 0));

        let mut input = paste("Short lived", "public");
        input.expiration = "1h".to_string();
        let short = t.blueprints.create(Some(&alice), input).await.unwrap();
        t.comments.add(&bob, &short.slug, "Before it goes").await.unwrap();
        assert_eq!(counts(bob.id).await, (1, 0));

        let touched = t
            .blueprints
            .expire_due(Utc::now() + chrono::Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(touched, 2);
        assert_eq!(counts(bob.id).await, (0, 0));
    }

    #[tokio::test]
    async fn test_listings_follow_writes() {
        let t = TestServices::new().await;
        let alice = t.confirmed_user("alice").await;

        assert!(t.blueprints.home(5).await.unwrap().is_empty());
        let bp = t.blueprints.create(Some(&alice), paste("Door logic", "public")).await.unwrap();
        assert_eq!(t.blueprints.home(5).await.unwrap().len(), 1);

        let search = SearchQuery {
            query: "door".to_string(),
            ..Default::default()
        };
        assert_eq!(t.blueprints.search(&search, &ListParams::default()).await.unwrap().total, 1);

        let by_type = t
            .blueprints
            .list_by_type(BlueprintType::Blueprint, &ListParams::default())
            .await
            .unwrap();
        assert_eq!(by_type.total, 1);

        t.blueprints.delete(&alice, &bp.slug).await.unwrap();
        assert!(t.blueprints.home(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_thumbnail() {
        let t = TestServices::new().await;
        let alice = t.confirmed_user("alice").await;
        let bp = t.blueprints.create(Some(&alice), paste("Graph", "public")).await.unwrap();

        let name = t
            .blueprints
            .set_thumbnail(&alice, &bp.slug, b"GIF89a", "image/gif")
            .await
            .unwrap();
        assert!(name.starts_with("thumbnails/"));
        assert!(t.medias_path().join(&name).exists());

        t.blueprints.delete_thumbnail(&alice, &bp.slug).await.unwrap();
        assert!(!t.medias_path().join(&name).exists());
    }

    #[test]
    fn test_render_lines_escapes() {
        let html = render_lines("Begin Object Name=\"<K2>\"\nEnd Object");
        assert!(html.starts_with("<ol class=\"blueprint-lines\">"));
        assert_eq!(html.matches("<li>").count(), 2);
        assert!(html.contains("&lt;K2&gt;"));
        assert!(!html.contains("<K2>"));
    }
}
