//! Comment repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::db::{DynDatabasePool, InsertId};
use crate::models::{Comment, CommentWithAuthor};
use crate::with_pool;

const COMMENT_COLUMNS: &str = "c.id, c.id_author, c.id_blueprint, c.name_fallback, c.content, c.created_at";

#[async_trait]
pub trait CommentRepository: Send + Sync {
    async fn create(
        &self,
        id_blueprint: i64,
        id_author: i64,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<Comment>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Comment>>;

    async fn update_content(&self, id: i64, content: &str) -> Result<()>;

    async fn delete(&self, id: i64) -> Result<()>;

    /// Comments of a blueprint, oldest first, joined with their author
    async fn list_by_blueprint(&self, id_blueprint: i64) -> Result<Vec<CommentWithAuthor>>;

    /// Comments written by a user, newest first
    async fn list_by_author(&self, id_author: i64, limit: i64) -> Result<Vec<Comment>>;

    async fn count_by_blueprint(&self, id_blueprint: i64) -> Result<i64>;
}

/// SQLx-based comment repository, SQLite or MySQL
pub struct SqlxCommentRepository {
    pool: DynDatabasePool,
}

impl SqlxCommentRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CommentRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl CommentRepository for SqlxCommentRepository {
    async fn create(
        &self,
        id_blueprint: i64,
        id_author: i64,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<Comment> {
        let id = with_pool!(self.pool, |p| {
            sqlx::query(
                "INSERT INTO comments (id_author, id_blueprint, content, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(id_author)
            .bind(id_blueprint)
            .bind(content)
            .bind(at)
            .execute(p)
            .await
            .context("Failed to create comment")?
            .insert_id()
        });

        Ok(Comment {
            id,
            id_author: Some(id_author),
            id_blueprint,
            name_fallback: None,
            content: content.to_string(),
            created_at: at,
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Comment>> {
        let sql = format!("SELECT {} FROM comments c WHERE c.id = ?", COMMENT_COLUMNS);
        let comment = with_pool!(self.pool, |p| {
            sqlx::query_as::<_, Comment>(&sql)
                .bind(id)
                .fetch_optional(p)
                .await
                .context("Failed to get comment")?
        });
        Ok(comment)
    }

    async fn update_content(&self, id: i64, content: &str) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query("UPDATE comments SET content = ? WHERE id = ?")
                .bind(content)
                .bind(id)
                .execute(p)
                .await
                .context("Failed to update comment")?;
        });
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query("DELETE FROM comments WHERE id = ?")
                .bind(id)
                .execute(p)
                .await
                .context("Failed to delete comment")?;
        });
        Ok(())
    }

    async fn list_by_blueprint(&self, id_blueprint: i64) -> Result<Vec<CommentWithAuthor>> {
        let sql = format!(
            "SELECT {}, u.username AS author_username, u.slug AS author_slug, \
             u.avatar AS author_avatar \
             FROM comments c LEFT JOIN users u ON u.id = c.id_author \
             WHERE c.id_blueprint = ? ORDER BY c.created_at ASC, c.id ASC",
            COMMENT_COLUMNS
        );
        let comments = with_pool!(self.pool, |p| {
            sqlx::query_as::<_, CommentWithAuthor>(&sql)
                .bind(id_blueprint)
                .fetch_all(p)
                .await
                .context("Failed to list comments")?
        });
        Ok(comments)
    }

    async fn list_by_author(&self, id_author: i64, limit: i64) -> Result<Vec<Comment>> {
        let sql = format!(
            "SELECT {} FROM comments c WHERE c.id_author = ? ORDER BY c.created_at DESC, c.id DESC LIMIT ?",
            COMMENT_COLUMNS
        );
        let comments = with_pool!(self.pool, |p| {
            sqlx::query_as::<_, Comment>(&sql)
                .bind(id_author)
                .bind(limit)
                .fetch_all(p)
                .await
                .context("Failed to list author comments")?
        });
        Ok(comments)
    }

    async fn count_by_blueprint(&self, id_blueprint: i64) -> Result<i64> {
        let count = with_pool!(self.pool, |p| {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM comments WHERE id_blueprint = ?")
                .bind(id_blueprint)
                .fetch_one(p)
                .await
                .context("Failed to count comments")?
        });
        Ok(count)
    }
}
