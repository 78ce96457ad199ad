//! Blueprint repository
//!
//! Blueprint rows, their version history and the filtered listings used by
//! the home page, type, tag, search and profile pages.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::db::{DynDatabasePool, InsertId};
use crate::models::{
    Blueprint, BlueprintCard, BlueprintType, BlueprintVersion, Exposure, ListParams, PagedResult,
};
use crate::with_pool;

const BLUEPRINT_COLUMNS: &str = "b.id, b.id_author, b.slug, b.file_id, b.title, b.type, \
     b.ue_version, b.current_version, b.thumbnail, b.description, b.exposure, b.expiration, \
     b.video, b.video_provider, b.comments_hidden, b.comments_closed, b.comments_count, \
     b.created_at, b.published_at, b.updated_at, b.deleted_at";

/// Data needed to insert a blueprint; version 1 is recorded separately
#[derive(Debug, Clone)]
pub struct NewBlueprint {
    pub id_author: i64,
    pub slug: String,
    pub file_id: String,
    pub title: String,
    pub kind: BlueprintType,
    pub ue_version: String,
    pub exposure: Exposure,
    pub expiration: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Listing filter. Deleted and expired blueprints are always excluded.
#[derive(Debug, Clone, Default)]
pub struct BlueprintFilter {
    pub author: Option<i64>,
    /// Also list unlisted and private blueprints (owner viewing their profile)
    pub include_hidden: bool,
    pub kind: Option<BlueprintType>,
    pub ue_version: Option<String>,
    pub tag_id: Option<i64>,
    /// Whitespace separated words that must all appear in the title
    pub query: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BlueprintOrder {
    #[default]
    Latest,
    MostDiscussed,
}

enum Arg {
    Int(i64),
    Text(String),
    Time(DateTime<Utc>),
}

#[async_trait]
pub trait BlueprintRepository: Send + Sync {
    async fn create(&self, blueprint: &NewBlueprint) -> Result<Blueprint>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Blueprint>>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Blueprint>>;

    async fn slug_exists(&self, slug: &str) -> Result<bool>;

    async fn file_id_exists(&self, file_id: &str) -> Result<bool>;

    /// Persist the editable properties of `blueprint` and bump `updated_at`
    async fn update_properties(&self, blueprint: &Blueprint) -> Result<()>;

    async fn set_thumbnail(&self, id: i64, thumbnail: Option<&str>) -> Result<()>;

    async fn set_current_version(&self, id: i64, version: i64, at: DateTime<Utc>) -> Result<()>;

    async fn soft_delete(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Soft-delete blueprints whose expiration has passed; returns the authors
    /// and commenters touched, sorted
    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<i64>>;

    /// Author and distinct comment authors of a blueprint, sorted
    async fn participant_ids(&self, id: i64) -> Result<Vec<i64>>;

    /// Recount `comments_count` from the comments table
    async fn recount_comments(&self, id: i64) -> Result<()>;

    async fn create_version(
        &self,
        id_blueprint: i64,
        version: i64,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<BlueprintVersion>;

    /// Versions, newest first
    async fn list_versions(&self, id_blueprint: i64) -> Result<Vec<BlueprintVersion>>;

    async fn get_version(&self, id_blueprint: i64, version: i64) -> Result<Option<BlueprintVersion>>;

    async fn delete_version(&self, id_blueprint: i64, version: i64) -> Result<()>;

    async fn list(
        &self,
        filter: &BlueprintFilter,
        order: BlueprintOrder,
        params: &ListParams,
    ) -> Result<PagedResult<BlueprintCard>>;
}

/// SQLx-based blueprint repository, SQLite or MySQL
pub struct SqlxBlueprintRepository {
    pool: DynDatabasePool,
}

impl SqlxBlueprintRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn BlueprintRepository> {
        Arc::new(Self::new(pool))
    }

    async fn get_by(&self, column: &str, text: Option<&str>, id: Option<i64>) -> Result<Option<Blueprint>> {
        let sql = format!("SELECT {} FROM blueprints b WHERE b.{} = ?", BLUEPRINT_COLUMNS, column);
        let blueprint = with_pool!(self.pool, |p| {
            let query = sqlx::query_as::<_, Blueprint>(&sql);
            let query = match text {
                Some(text) => query.bind(text),
                None => query.bind(id.unwrap_or_default()),
            };
            query
                .fetch_optional(p)
                .await
                .with_context(|| format!("Failed to get blueprint by {}", column))?
        });
        Ok(blueprint)
    }

    async fn exists(&self, column: &str, value: &str) -> Result<bool> {
        let sql = format!("SELECT COUNT(*) FROM blueprints WHERE {} = ?", column);
        let count = with_pool!(self.pool, |p| {
            sqlx::query_scalar::<_, i64>(&sql)
                .bind(value)
                .fetch_one(p)
                .await
                .with_context(|| format!("Failed to check blueprint {}", column))?
        });
        Ok(count > 0)
    }
}

/// Build the WHERE clause and its arguments for a listing
fn listing_clause(filter: &BlueprintFilter, now: DateTime<Utc>) -> (String, Vec<Arg>) {
    let mut conditions = vec![
        "b.deleted_at IS NULL".to_string(),
        "(b.expiration IS NULL OR b.expiration > ?)".to_string(),
    ];
    let mut args = vec![Arg::Time(now)];

    if !filter.include_hidden {
        conditions.push("b.exposure = 'public'".to_string());
    }
    if let Some(author) = filter.author {
        conditions.push("b.id_author = ?".to_string());
        args.push(Arg::Int(author));
    }
    if let Some(kind) = filter.kind {
        conditions.push("b.type = ?".to_string());
        args.push(Arg::Text(kind.as_str().to_string()));
    }
    if let Some(ue_version) = &filter.ue_version {
        conditions.push("b.ue_version = ?".to_string());
        args.push(Arg::Text(ue_version.clone()));
    }
    if let Some(tag_id) = filter.tag_id {
        conditions.push(
            "EXISTS (SELECT 1 FROM blueprints_tags bt WHERE bt.id_blueprint = b.id AND bt.id_tag = ?)"
                .to_string(),
        );
        args.push(Arg::Int(tag_id));
    }
    if let Some(query) = &filter.query {
        for word in query.split_whitespace() {
            let word: String = word.chars().filter(|c| *c != '%' && *c != '_').collect();
            if word.is_empty() {
                continue;
            }
            conditions.push("LOWER(b.title) LIKE ?".to_string());
            args.push(Arg::Text(format!("%{}%", word.to_lowercase())));
        }
    }

    (conditions.join(" AND "), args)
}

/// Bind listing arguments in order onto any sqlx query builder
macro_rules! bind_args {
    ($query:expr, $args:expr) => {{
        let mut query = $query;
        for arg in $args {
            query = match arg {
                Arg::Int(v) => query.bind(*v),
                Arg::Text(v) => query.bind(v.as_str()),
                Arg::Time(v) => query.bind(*v),
            };
        }
        query
    }};
}

#[async_trait]
impl BlueprintRepository for SqlxBlueprintRepository {
    async fn create(&self, blueprint: &NewBlueprint) -> Result<Blueprint> {
        let id = with_pool!(self.pool, |p| {
            sqlx::query(
                "INSERT INTO blueprints (id_author, slug, file_id, title, type, ue_version, \
                 current_version, exposure, expiration, created_at, published_at) \
                 VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)",
            )
            .bind(blueprint.id_author)
            .bind(&blueprint.slug)
            .bind(&blueprint.file_id)
            .bind(&blueprint.title)
            .bind(blueprint.kind.as_str())
            .bind(&blueprint.ue_version)
            .bind(blueprint.exposure.as_str())
            .bind(blueprint.expiration)
            .bind(blueprint.created_at)
            .bind(blueprint.created_at)
            .execute(p)
            .await
            .context("Failed to create blueprint")?
            .insert_id()
        });

        self.get_by_id(id)
            .await?
            .context("Created blueprint could not be read back")
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Blueprint>> {
        self.get_by("id", None, Some(id)).await
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Blueprint>> {
        self.get_by("slug", Some(slug), None).await
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool> {
        self.exists("slug", slug).await
    }

    async fn file_id_exists(&self, file_id: &str) -> Result<bool> {
        self.exists("file_id", file_id).await
    }

    async fn update_properties(&self, blueprint: &Blueprint) -> Result<()> {
        let now = Utc::now();
        with_pool!(self.pool, |p| {
            sqlx::query(
                "UPDATE blueprints SET title = ?, description = ?, exposure = ?, expiration = ?, \
                 ue_version = ?, video = ?, video_provider = ?, comments_hidden = ?, \
                 comments_closed = ?, updated_at = ? WHERE id = ?",
            )
            .bind(&blueprint.title)
            .bind(&blueprint.description)
            .bind(blueprint.exposure.as_str())
            .bind(blueprint.expiration)
            .bind(&blueprint.ue_version)
            .bind(&blueprint.video)
            .bind(&blueprint.video_provider)
            .bind(blueprint.comments_hidden)
            .bind(blueprint.comments_closed)
            .bind(now)
            .bind(blueprint.id)
            .execute(p)
            .await
            .context("Failed to update blueprint")?;
        });
        Ok(())
    }

    async fn set_thumbnail(&self, id: i64, thumbnail: Option<&str>) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query("UPDATE blueprints SET thumbnail = ? WHERE id = ?")
                .bind(thumbnail)
                .bind(id)
                .execute(p)
                .await
                .context("Failed to update blueprint thumbnail")?;
        });
        Ok(())
    }

    async fn set_current_version(&self, id: i64, version: i64, at: DateTime<Utc>) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query("UPDATE blueprints SET current_version = ?, updated_at = ? WHERE id = ?")
                .bind(version)
                .bind(at)
                .bind(id)
                .execute(p)
                .await
                .context("Failed to update current version")?;
        });
        Ok(())
    }

    async fn soft_delete(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query("UPDATE blueprints SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(at)
                .bind(id)
                .execute(p)
                .await
                .context("Failed to delete blueprint")?;
        });
        Ok(())
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<i64>> {
        let mut users = with_pool!(self.pool, |p| {
            let users = sqlx::query_scalar::<_, i64>(
                "SELECT id_author FROM blueprints \
                 WHERE deleted_at IS NULL AND expiration IS NOT NULL AND expiration <= ? \
                 UNION \
                 SELECT c.id_author FROM comments c JOIN blueprints b ON b.id = c.id_blueprint \
                 WHERE c.id_author IS NOT NULL AND b.deleted_at IS NULL \
                 AND b.expiration IS NOT NULL AND b.expiration <= ?",
            )
            .bind(now)
            .bind(now)
            .fetch_all(p)
            .await
            .context("Failed to find expired blueprints")?;

            sqlx::query(
                "UPDATE blueprints SET deleted_at = ? \
                 WHERE deleted_at IS NULL AND expiration IS NOT NULL AND expiration <= ?",
            )
            .bind(now)
            .bind(now)
            .execute(p)
            .await
            .context("Failed to expire blueprints")?;

            users
        });
        users.sort_unstable();
        Ok(users)
    }

    async fn participant_ids(&self, id: i64) -> Result<Vec<i64>> {
        let mut users = with_pool!(self.pool, |p| {
            sqlx::query_scalar::<_, i64>(
                "SELECT id_author FROM blueprints WHERE id = ? \
                 UNION \
                 SELECT id_author FROM comments WHERE id_blueprint = ? AND id_author IS NOT NULL",
            )
            .bind(id)
            .bind(id)
            .fetch_all(p)
            .await
            .context("Failed to list blueprint participants")?
        });
        users.sort_unstable();
        Ok(users)
    }

    async fn recount_comments(&self, id: i64) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query(
                "UPDATE blueprints SET comments_count = \
                 (SELECT COUNT(*) FROM comments WHERE id_blueprint = ?) WHERE id = ?",
            )
            .bind(id)
            .bind(id)
            .execute(p)
            .await
            .context("Failed to recount comments")?;
        });
        Ok(())
    }

    async fn create_version(
        &self,
        id_blueprint: i64,
        version: i64,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<BlueprintVersion> {
        let id = with_pool!(self.pool, |p| {
            sqlx::query(
                "INSERT INTO blueprints_version (id_blueprint, version, reason, created_at, published_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(id_blueprint)
            .bind(version)
            .bind(reason)
            .bind(at)
            .bind(at)
            .execute(p)
            .await
            .context("Failed to create blueprint version")?
            .insert_id()
        });

        Ok(BlueprintVersion {
            id,
            id_blueprint,
            version,
            reason: reason.to_string(),
            created_at: at,
            published_at: at,
        })
    }

    async fn list_versions(&self, id_blueprint: i64) -> Result<Vec<BlueprintVersion>> {
        let versions = with_pool!(self.pool, |p| {
            sqlx::query_as::<_, BlueprintVersion>(
                "SELECT id, id_blueprint, version, reason, created_at, published_at \
                 FROM blueprints_version WHERE id_blueprint = ? ORDER BY version DESC",
            )
            .bind(id_blueprint)
            .fetch_all(p)
            .await
            .context("Failed to list blueprint versions")?
        });
        Ok(versions)
    }

    async fn get_version(&self, id_blueprint: i64, version: i64) -> Result<Option<BlueprintVersion>> {
        let found = with_pool!(self.pool, |p| {
            sqlx::query_as::<_, BlueprintVersion>(
                "SELECT id, id_blueprint, version, reason, created_at, published_at \
                 FROM blueprints_version WHERE id_blueprint = ? AND version = ?",
            )
            .bind(id_blueprint)
            .bind(version)
            .fetch_optional(p)
            .await
            .context("Failed to get blueprint version")?
        });
        Ok(found)
    }

    async fn delete_version(&self, id_blueprint: i64, version: i64) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query("DELETE FROM blueprints_version WHERE id_blueprint = ? AND version = ?")
                .bind(id_blueprint)
                .bind(version)
                .execute(p)
                .await
                .context("Failed to delete blueprint version")?;
        });
        Ok(())
    }

    async fn list(
        &self,
        filter: &BlueprintFilter,
        order: BlueprintOrder,
        params: &ListParams,
    ) -> Result<PagedResult<BlueprintCard>> {
        let (clause, args) = listing_clause(filter, Utc::now());
        let order_by = match order {
            BlueprintOrder::Latest => "b.published_at DESC, b.id DESC",
            BlueprintOrder::MostDiscussed => "b.comments_count DESC, b.published_at DESC, b.id DESC",
        };

        let count_sql = format!("SELECT COUNT(*) FROM blueprints b WHERE {}", clause);
        let list_sql = format!(
            "SELECT {}, u.username AS author_username, u.slug AS author_slug, \
             u.avatar AS author_avatar \
             FROM blueprints b JOIN users u ON u.id = b.id_author \
             WHERE {} ORDER BY {} LIMIT ? OFFSET ?",
            BLUEPRINT_COLUMNS, clause, order_by
        );

        let (total, items) = with_pool!(self.pool, |p| {
            let total = bind_args!(sqlx::query_scalar::<_, i64>(&count_sql), &args)
                .fetch_one(p)
                .await
                .context("Failed to count blueprints")?;

            let items = bind_args!(sqlx::query_as::<_, BlueprintCard>(&list_sql), &args)
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(p)
                .await
                .context("Failed to list blueprints")?;

            (total, items)
        });

        Ok(PagedResult::new(items, total, params))
    }
}
