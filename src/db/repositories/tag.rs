//! Tag repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::db::{DynDatabasePool, InsertId};
use crate::models::Tag;
use crate::with_pool;

#[async_trait]
pub trait TagRepository: Send + Sync {
    /// Return the tag with this slug, creating it with `name` when missing
    async fn get_or_create(&self, name: &str, slug: &str) -> Result<Tag>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Tag>>;

    /// All tags, sorted by name
    async fn list_all(&self) -> Result<Vec<Tag>>;

    async fn list_by_blueprint(&self, id_blueprint: i64) -> Result<Vec<Tag>>;

    /// Replace the tag set of a blueprint
    async fn set_for_blueprint(&self, id_blueprint: i64, tag_ids: &[i64]) -> Result<()>;

    /// Remove tags no blueprint references anymore
    async fn delete_unused(&self) -> Result<u64>;
}

/// SQLx-based tag repository, SQLite or MySQL
pub struct SqlxTagRepository {
    pool: DynDatabasePool,
}

impl SqlxTagRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn TagRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl TagRepository for SqlxTagRepository {
    async fn get_or_create(&self, name: &str, slug: &str) -> Result<Tag> {
        if let Some(tag) = self.get_by_slug(slug).await? {
            return Ok(tag);
        }

        let id = with_pool!(self.pool, |p| {
            sqlx::query("INSERT INTO tags (name, slug) VALUES (?, ?)")
                .bind(name)
                .bind(slug)
                .execute(p)
                .await
                .context("Failed to create tag")?
                .insert_id()
        });

        Ok(Tag {
            id,
            name: name.to_string(),
            slug: slug.to_string(),
        })
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Tag>> {
        let tag = with_pool!(self.pool, |p| {
            sqlx::query_as::<_, Tag>("SELECT id, name, slug FROM tags WHERE slug = ?")
                .bind(slug)
                .fetch_optional(p)
                .await
                .context("Failed to get tag by slug")?
        });
        Ok(tag)
    }

    async fn list_all(&self) -> Result<Vec<Tag>> {
        let tags = with_pool!(self.pool, |p| {
            sqlx::query_as::<_, Tag>("SELECT id, name, slug FROM tags ORDER BY name ASC")
                .fetch_all(p)
                .await
                .context("Failed to list tags")?
        });
        Ok(tags)
    }

    async fn list_by_blueprint(&self, id_blueprint: i64) -> Result<Vec<Tag>> {
        let tags = with_pool!(self.pool, |p| {
            sqlx::query_as::<_, Tag>(
                "SELECT t.id, t.name, t.slug FROM tags t \
                 JOIN blueprints_tags bt ON bt.id_tag = t.id \
                 WHERE bt.id_blueprint = ? ORDER BY t.name ASC",
            )
            .bind(id_blueprint)
            .fetch_all(p)
            .await
            .context("Failed to list blueprint tags")?
        });
        Ok(tags)
    }

    async fn set_for_blueprint(&self, id_blueprint: i64, tag_ids: &[i64]) -> Result<()> {
        with_pool!(self.pool, |p| {
            let mut tx = p.begin().await.context("Failed to begin transaction")?;

            sqlx::query("DELETE FROM blueprints_tags WHERE id_blueprint = ?")
                .bind(id_blueprint)
                .execute(&mut *tx)
                .await
                .context("Failed to clear blueprint tags")?;

            for tag_id in tag_ids {
                sqlx::query("INSERT INTO blueprints_tags (id_blueprint, id_tag) VALUES (?, ?)")
                    .bind(id_blueprint)
                    .bind(*tag_id)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to add blueprint tag")?;
            }

            tx.commit().await.context("Failed to commit blueprint tags")?;
        });
        Ok(())
    }

    async fn delete_unused(&self) -> Result<u64> {
        let affected = with_pool!(self.pool, |p| {
            sqlx::query(
                "DELETE FROM tags WHERE id NOT IN (SELECT DISTINCT id_tag FROM blueprints_tags)",
            )
            .execute(p)
            .await
            .context("Failed to delete unused tags")?
            .rows_affected()
        });
        Ok(affected)
    }
}
