//! Database migrations
//!
//! Migrations are embedded as SQL strings, one variant per driver, and
//! recorded in the `_migrations` table once applied.

use anyhow::{Context, Result};

use super::DynDatabasePool;
use crate::config::DatabaseDriver;

/// A database migration with SQL for both SQLite and MySQL
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (must be unique and sequential)
    pub version: i64,
    pub name: &'static str,
    pub up_sqlite: &'static str,
    pub up_mysql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_users",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username VARCHAR(100) NOT NULL UNIQUE,
                slug VARCHAR(100) NOT NULL UNIQUE,
                email VARCHAR(100) NOT NULL UNIQUE,
                password_hash VARCHAR(255) NOT NULL,
                grade VARCHAR(20) NOT NULL DEFAULT 'member',
                avatar VARCHAR(255),
                api_key VARCHAR(100) UNIQUE,
                confirmed_token VARCHAR(255),
                confirmed_at TIMESTAMP,
                password_reset VARCHAR(255),
                password_reset_at TIMESTAMP,
                last_login_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL
            );
            CREATE TABLE IF NOT EXISTS users_infos (
                id_user INTEGER PRIMARY KEY,
                bio TEXT,
                link_website VARCHAR(255),
                link_twitter VARCHAR(255),
                link_github VARCHAR(255),
                link_twitch VARCHAR(255),
                link_unreal VARCHAR(255),
                link_youtube VARCHAR(255),
                count_public_blueprint INTEGER NOT NULL DEFAULT 0,
                count_private_blueprint INTEGER NOT NULL DEFAULT 0,
                count_public_comment INTEGER NOT NULL DEFAULT 0,
                count_private_comment INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (id_user) REFERENCES users(id) ON DELETE CASCADE
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                username VARCHAR(100) NOT NULL UNIQUE,
                slug VARCHAR(100) NOT NULL UNIQUE,
                email VARCHAR(100) NOT NULL UNIQUE,
                password_hash VARCHAR(255) NOT NULL,
                grade VARCHAR(20) NOT NULL DEFAULT 'member',
                avatar VARCHAR(255),
                api_key VARCHAR(100) UNIQUE,
                confirmed_token VARCHAR(255),
                confirmed_at DATETIME,
                password_reset VARCHAR(255),
                password_reset_at DATETIME,
                last_login_at DATETIME,
                created_at DATETIME NOT NULL
            );
            CREATE TABLE IF NOT EXISTS users_infos (
                id_user BIGINT PRIMARY KEY,
                bio TEXT,
                link_website VARCHAR(255),
                link_twitter VARCHAR(255),
                link_github VARCHAR(255),
                link_twitch VARCHAR(255),
                link_unreal VARCHAR(255),
                link_youtube VARCHAR(255),
                count_public_blueprint BIGINT NOT NULL DEFAULT 0,
                count_private_blueprint BIGINT NOT NULL DEFAULT 0,
                count_public_comment BIGINT NOT NULL DEFAULT 0,
                count_private_comment BIGINT NOT NULL DEFAULT 0,
                FOREIGN KEY (id_user) REFERENCES users(id) ON DELETE CASCADE
            );
        "#,
    },
    Migration {
        version: 2,
        name: "create_sessions",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(64) PRIMARY KEY,
                user_id INTEGER NOT NULL,
                expires_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(64) PRIMARY KEY,
                user_id BIGINT NOT NULL,
                expires_at DATETIME NOT NULL,
                created_at DATETIME NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_sessions_user_id ON sessions(user_id);
            CREATE INDEX idx_sessions_expires_at ON sessions(expires_at);
        "#,
    },
    Migration {
        version: 3,
        name: "create_blueprints",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS blueprints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                id_author INTEGER NOT NULL,
                slug VARCHAR(100) NOT NULL UNIQUE,
                file_id VARCHAR(100) NOT NULL UNIQUE,
                title VARCHAR(255) NOT NULL,
                type VARCHAR(50) NOT NULL DEFAULT 'blueprint',
                ue_version VARCHAR(10) NOT NULL,
                current_version INTEGER NOT NULL DEFAULT 1,
                thumbnail VARCHAR(255),
                description TEXT,
                exposure VARCHAR(20) NOT NULL DEFAULT 'public',
                expiration TIMESTAMP,
                video VARCHAR(255),
                video_provider VARCHAR(50),
                comments_hidden BOOLEAN NOT NULL DEFAULT 0,
                comments_closed BOOLEAN NOT NULL DEFAULT 0,
                comments_count INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL,
                published_at TIMESTAMP,
                updated_at TIMESTAMP,
                deleted_at TIMESTAMP,
                FOREIGN KEY (id_author) REFERENCES users(id)
            );
            CREATE INDEX IF NOT EXISTS idx_blueprints_author ON blueprints(id_author);
            CREATE INDEX IF NOT EXISTS idx_blueprints_listing ON blueprints(exposure, deleted_at, published_at);
            CREATE TABLE IF NOT EXISTS blueprints_version (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                id_blueprint INTEGER NOT NULL,
                version INTEGER NOT NULL,
                reason TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL,
                published_at TIMESTAMP NOT NULL,
                UNIQUE (id_blueprint, version),
                FOREIGN KEY (id_blueprint) REFERENCES blueprints(id) ON DELETE CASCADE
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS blueprints (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                id_author BIGINT NOT NULL,
                slug VARCHAR(100) NOT NULL UNIQUE,
                file_id VARCHAR(100) NOT NULL UNIQUE,
                title VARCHAR(255) NOT NULL,
                type VARCHAR(50) NOT NULL DEFAULT 'blueprint',
                ue_version VARCHAR(10) NOT NULL,
                current_version BIGINT NOT NULL DEFAULT 1,
                thumbnail VARCHAR(255),
                description TEXT,
                exposure VARCHAR(20) NOT NULL DEFAULT 'public',
                expiration DATETIME,
                video VARCHAR(255),
                video_provider VARCHAR(50),
                comments_hidden BOOLEAN NOT NULL DEFAULT FALSE,
                comments_closed BOOLEAN NOT NULL DEFAULT FALSE,
                comments_count BIGINT NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL,
                published_at DATETIME,
                updated_at DATETIME,
                deleted_at DATETIME,
                FOREIGN KEY (id_author) REFERENCES users(id)
            );
            CREATE INDEX idx_blueprints_author ON blueprints(id_author);
            CREATE INDEX idx_blueprints_listing ON blueprints(exposure, deleted_at, published_at);
            CREATE TABLE IF NOT EXISTS blueprints_version (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                id_blueprint BIGINT NOT NULL,
                version BIGINT NOT NULL,
                reason TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                published_at DATETIME NOT NULL,
                UNIQUE KEY uniq_blueprint_version (id_blueprint, version),
                FOREIGN KEY (id_blueprint) REFERENCES blueprints(id) ON DELETE CASCADE
            );
        "#,
    },
    Migration {
        version: 4,
        name: "create_comments",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS comments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                id_author INTEGER,
                id_blueprint INTEGER NOT NULL,
                name_fallback VARCHAR(255),
                content TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (id_author) REFERENCES users(id) ON DELETE SET NULL,
                FOREIGN KEY (id_blueprint) REFERENCES blueprints(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_comments_blueprint ON comments(id_blueprint);
            CREATE INDEX IF NOT EXISTS idx_comments_author ON comments(id_author);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS comments (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                id_author BIGINT,
                id_blueprint BIGINT NOT NULL,
                name_fallback VARCHAR(255),
                content TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                FOREIGN KEY (id_author) REFERENCES users(id) ON DELETE SET NULL,
                FOREIGN KEY (id_blueprint) REFERENCES blueprints(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_comments_blueprint ON comments(id_blueprint);
            CREATE INDEX idx_comments_author ON comments(id_author);
        "#,
    },
    Migration {
        version: 5,
        name: "create_tags",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(100) NOT NULL,
                slug VARCHAR(100) NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS blueprints_tags (
                id_blueprint INTEGER NOT NULL,
                id_tag INTEGER NOT NULL,
                PRIMARY KEY (id_blueprint, id_tag),
                FOREIGN KEY (id_blueprint) REFERENCES blueprints(id) ON DELETE CASCADE,
                FOREIGN KEY (id_tag) REFERENCES tags(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_blueprints_tags_tag ON blueprints_tags(id_tag);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS tags (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                name VARCHAR(100) NOT NULL,
                slug VARCHAR(100) NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS blueprints_tags (
                id_blueprint BIGINT NOT NULL,
                id_tag BIGINT NOT NULL,
                PRIMARY KEY (id_blueprint, id_tag),
                FOREIGN KEY (id_blueprint) REFERENCES blueprints(id) ON DELETE CASCADE,
                FOREIGN KEY (id_tag) REFERENCES tags(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_blueprints_tags_tag ON blueprints_tags(id_tag);
        "#,
    },
];

/// Apply all pending migrations, returning how many ran.
pub async fn run_migrations(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = applied_versions(pool).await?;
    let mut count = 0;

    for migration in MIGRATIONS {
        if applied.contains(&migration.version) {
            continue;
        }
        tracing::info!("Applying migration {}: {}", migration.version, migration.name);
        apply_migration(pool, migration)
            .await
            .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
        count += 1;
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

async fn create_migrations_table(pool: &DynDatabasePool) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
        DatabaseDriver::Mysql => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version BIGINT PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
    };

    pool.execute(sql).await?;
    Ok(())
}

async fn applied_versions(pool: &DynDatabasePool) -> Result<Vec<i64>> {
    let versions = crate::with_pool!(pool, |p| {
        sqlx::query_scalar::<_, i64>("SELECT version FROM _migrations ORDER BY version")
            .fetch_all(p)
            .await
            .context("Failed to read applied migrations")?
    });
    Ok(versions)
}

async fn apply_migration(pool: &DynDatabasePool, migration: &Migration) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => migration.up_sqlite,
        DatabaseDriver::Mysql => migration.up_mysql,
    };

    for statement in split_sql_statements(sql) {
        pool.execute(statement)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }

    crate::with_pool!(pool, |p| {
        sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(p)
            .await
            .context("Failed to record migration")?;
    });

    Ok(())
}

fn truncate_sql(sql: &str) -> String {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &sql[..idx]),
        None => sql.to_string(),
    }
}

/// Split SQL into individual statements, dropping comment-only fragments
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty() && !is_comment_only(stmt))
        .collect()
}

fn is_comment_only(s: &str) -> bool {
    s.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

/// Number of migrations not yet applied
pub async fn pending_count(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;
    let applied = applied_versions(pool).await?;
    Ok(MIGRATIONS
        .iter()
        .filter(|m| !applied.contains(&m.version))
        .count())
}
