//! Comment service

use anyhow::anyhow;
use chrono::Utc;
use std::sync::Arc;

use crate::db::repositories::{BlueprintRepository, CommentRepository, UserRepository};
use crate::models::{Blueprint, Comment, CommentWithAuthor, User};

pub const MAX_COMMENT_LENGTH: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum CommentServiceError {
    #[error("Comment not found")]
    NotFound,

    #[error("Blueprint not found")]
    BlueprintNotFound,

    #[error("Comments are closed")]
    Closed,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

fn check_content(content: &str) -> Result<String, CommentServiceError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(CommentServiceError::ValidationError(
            "Comment is required".to_string(),
        ));
    }
    if content.chars().count() > MAX_COMMENT_LENGTH {
        return Err(CommentServiceError::ValidationError(format!(
            "Comment must be at most {} characters",
            MAX_COMMENT_LENGTH
        )));
    }
    Ok(content.to_string())
}

pub struct CommentService {
    repo: Arc<dyn CommentRepository>,
    blueprint_repo: Arc<dyn BlueprintRepository>,
    user_repo: Arc<dyn UserRepository>,
}

impl CommentService {
    pub fn new(
        repo: Arc<dyn CommentRepository>,
        blueprint_repo: Arc<dyn BlueprintRepository>,
        user_repo: Arc<dyn UserRepository>,
    ) -> Self {
        Self {
            repo,
            blueprint_repo,
            user_repo,
        }
    }

    async fn visible_blueprint(
        &self,
        slug: &str,
        viewer: &User,
    ) -> Result<Blueprint, CommentServiceError> {
        let blueprint = self
            .blueprint_repo
            .get_by_slug(slug)
            .await?
            .ok_or(CommentServiceError::BlueprintNotFound)?;
        if !blueprint.is_visible_to(Some(viewer), Utc::now()) {
            return Err(CommentServiceError::BlueprintNotFound);
        }
        Ok(blueprint)
    }

    /// Keep the blueprint's comment count and both counters in sync
    async fn after_write(&self, blueprint: &Blueprint, id_author: i64) -> Result<(), CommentServiceError> {
        self.blueprint_repo.recount_comments(blueprint.id).await?;
        self.user_repo.refresh_counters(id_author).await?;
        if id_author != blueprint.id_author {
            self.user_repo.refresh_counters(blueprint.id_author).await?;
        }
        Ok(())
    }

    pub async fn add(
        &self,
        author: &User,
        blueprint_slug: &str,
        content: &str,
    ) -> Result<Comment, CommentServiceError> {
        let blueprint = self.visible_blueprint(blueprint_slug, author).await?;
        if blueprint.comments_closed || blueprint.comments_hidden {
            return Err(CommentServiceError::Closed);
        }
        let content = check_content(content)?;

        let comment = self
            .repo
            .create(blueprint.id, author.id, &content, Utc::now())
            .await?;
        self.after_write(&blueprint, author.id).await?;

        tracing::info!("{} commented on blueprint {}", author.username, blueprint.slug);
        Ok(comment)
    }

    async fn get_owned(&self, actor: &User, id: i64, admin_allowed: bool) -> Result<Comment, CommentServiceError> {
        let comment = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or(CommentServiceError::NotFound)?;

        let is_author = comment.id_author == Some(actor.id);
        if !is_author && !(admin_allowed && actor.is_admin()) {
            return Err(CommentServiceError::Forbidden(
                "Only the author can change this comment".to_string(),
            ));
        }
        Ok(comment)
    }

    /// Returns the slug of the commented blueprint
    pub async fn edit(&self, author: &User, id: i64, content: &str) -> Result<String, CommentServiceError> {
        let comment = self.get_owned(author, id, false).await?;
        let content = check_content(content)?;
        self.repo.update_content(comment.id, &content).await?;
        Ok(self.blueprint_slug(&comment).await?)
    }

    /// Returns the slug of the commented blueprint
    pub async fn delete(&self, actor: &User, id: i64) -> Result<String, CommentServiceError> {
        let comment = self.get_owned(actor, id, true).await?;
        self.repo.delete(comment.id).await?;

        let blueprint = self
            .blueprint_repo
            .get_by_id(comment.id_blueprint)
            .await?
            .ok_or_else(|| anyhow!("Blueprint {} of comment {} is missing", comment.id_blueprint, id))?;
        self.blueprint_repo.recount_comments(blueprint.id).await?;
        if let Some(id_author) = comment.id_author {
            self.user_repo.refresh_counters(id_author).await?;
        }
        self.user_repo.refresh_counters(blueprint.id_author).await?;

        tracing::info!("Comment {} deleted by {}", id, actor.username);
        Ok(blueprint.slug)
    }

    async fn blueprint_slug(&self, comment: &Comment) -> Result<String, CommentServiceError> {
        let blueprint = self
            .blueprint_repo
            .get_by_id(comment.id_blueprint)
            .await?
            .ok_or(CommentServiceError::BlueprintNotFound)?;
        Ok(blueprint.slug)
    }

    /// Oldest first; nothing when the owner hid the comments
    pub async fn list_for_blueprint(
        &self,
        blueprint: &Blueprint,
    ) -> Result<Vec<CommentWithAuthor>, CommentServiceError> {
        if blueprint.comments_hidden {
            return Ok(Vec::new());
        }
        Ok(self.repo.list_by_blueprint(blueprint.id).await?)
    }
}
