//! Database repositories
//!
//! One repository per aggregate. Services hold them as `Arc<dyn ...>` so
//! tests can swap in an in-memory SQLite pool.

pub mod blueprint;
pub mod comment;
pub mod session;
pub mod tag;
pub mod user;

pub use blueprint::{
    BlueprintFilter, BlueprintOrder, BlueprintRepository, NewBlueprint, SqlxBlueprintRepository,
};
pub use comment::{CommentRepository, SqlxCommentRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use tag::{SqlxTagRepository, TagRepository};
pub use user::{
    AccountRemoval, CommentFate, NewUser, SqlxUserRepository, UserLookup, UserRepository,
};

use std::sync::Arc;

use crate::db::DynDatabasePool;

/// Every repository over one pool
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub blueprints: Arc<dyn BlueprintRepository>,
    pub comments: Arc<dyn CommentRepository>,
    pub tags: Arc<dyn TagRepository>,
}

impl Repositories {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self {
            users: SqlxUserRepository::boxed(pool.clone()),
            sessions: SqlxSessionRepository::boxed(pool.clone()),
            blueprints: SqlxBlueprintRepository::boxed(pool.clone()),
            comments: SqlxCommentRepository::boxed(pool.clone()),
            tags: SqlxTagRepository::boxed(pool),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;

    use crate::db::{create_test_pool, migrations::run_migrations, DynDatabasePool, InsertId};

    /// Fresh in-memory database with every migration applied
    pub async fn setup_pool() -> DynDatabasePool {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        pool
    }

    pub async fn insert_user(pool: &DynDatabasePool, username: &str) -> i64 {
        let sqlite = pool.as_sqlite().expect("sqlite pool");
        let id = sqlx::query(
            "INSERT INTO users (username, slug, email, password_hash, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(username)
        .bind(username.to_lowercase())
        .bind(format!("{}@example.com", username.to_lowercase()))
        .bind("hash")
        .bind(Utc::now())
        .execute(sqlite)
        .await
        .expect("Failed to insert user")
        .insert_id();

        sqlx::query("INSERT INTO users_infos (id_user) VALUES (?)")
            .bind(id)
            .execute(sqlite)
            .await
            .expect("Failed to insert user infos");
        id
    }

    pub async fn insert_blueprint(
        pool: &DynDatabasePool,
        id_author: i64,
        slug: &str,
        exposure: &str,
    ) -> i64 {
        let sqlite = pool.as_sqlite().expect("sqlite pool");
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO blueprints (id_author, slug, file_id, title, ue_version, exposure, created_at, published_at) \
             VALUES (?, ?, ?, ?, '5.4', ?, ?, ?)",
        )
        .bind(id_author)
        .bind(slug)
        .bind(format!("file-{}", slug))
        .bind(format!("Blueprint {}", slug))
        .bind(exposure)
        .bind(now)
        .bind(now)
        .execute(sqlite)
        .await
        .expect("Failed to insert blueprint")
        .insert_id()
    }

    pub async fn insert_comment(pool: &DynDatabasePool, id_author: i64, id_blueprint: i64) -> i64 {
        let sqlite = pool.as_sqlite().expect("sqlite pool");
        sqlx::query(
            "INSERT INTO comments (id_author, id_blueprint, content, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id_author)
        .bind(id_blueprint)
        .bind("Nice graph")
        .bind(Utc::now())
        .execute(sqlite)
        .await
        .expect("Failed to insert comment")
        .insert_id()
    }
}
