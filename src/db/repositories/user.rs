//! User repository
//!
//! Accounts live in `users`; profile details and cached counters in
//! `users_infos`, created alongside every account.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::db::{DynDatabasePool, InsertId};
use crate::models::{Grade, User, UserInfos};
use crate::with_pool;

const USER_COLUMNS: &str = "id, username, slug, email, password_hash, grade, avatar, api_key, \
     confirmed_token, confirmed_at, password_reset, password_reset_at, last_login_at, created_at";

const INFOS_COLUMNS: &str = "id_user, bio, link_website, link_twitter, link_github, link_twitch, \
     link_unreal, link_youtube, count_public_blueprint, count_private_blueprint, \
     count_public_comment, count_private_comment";

/// What happens to a removed account's comments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentFate {
    /// Unlink them, keeping the old username as display name
    Detach,
    /// Hand them to the heir
    Reassign,
    Delete,
}

/// One account removal, applied by [`UserRepository::remove_account`]
#[derive(Debug, Clone)]
pub struct AccountRemoval {
    pub id: i64,
    pub username: String,
    /// Receives the blueprints, and the comments with [`CommentFate::Reassign`]
    pub heir: i64,
    pub comments: CommentFate,
    pub delete_blueprints: bool,
    pub at: DateTime<Utc>,
}

/// Data needed to insert an account
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub slug: String,
    pub email: String,
    pub password_hash: String,
    pub grade: Grade,
    pub confirmed_token: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// Column a user can be looked up by
#[derive(Debug, Clone, Copy)]
pub enum UserLookup<'a> {
    Id(i64),
    Username(&'a str),
    Slug(&'a str),
    Email(&'a str),
    ApiKey(&'a str),
    ConfirmedToken(&'a str),
    PasswordReset(&'a str),
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert the account and its empty `users_infos` row
    async fn create(&self, user: &NewUser) -> Result<User>;

    async fn find(&self, lookup: UserLookup<'_>) -> Result<Option<User>>;

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        self.find(UserLookup::Id(id)).await
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        self.find(UserLookup::Username(username)).await
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<User>> {
        self.find(UserLookup::Slug(slug)).await
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find(UserLookup::Email(email)).await
    }

    /// Change username and slug together
    async fn update_identity(&self, id: i64, username: &str, slug: &str) -> Result<()>;

    async fn update_email(&self, id: i64, email: &str) -> Result<()>;

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()>;

    /// Mark the account confirmed and drop the confirmation token
    async fn set_confirmed(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    async fn set_reset_token(
        &self,
        id: i64,
        token: Option<&str>,
        at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn set_avatar(&self, id: i64, avatar: Option<&str>) -> Result<()>;

    async fn set_api_key(&self, id: i64, api_key: &str) -> Result<()>;

    async fn touch_login(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Delete the account and settle its content in one transaction.
    /// Returns the other users whose counters changed, heir included, sorted.
    async fn remove_account(&self, removal: &AccountRemoval) -> Result<Vec<i64>>;

    async fn get_infos(&self, id: i64) -> Result<Option<UserInfos>>;

    /// Save bio and links; counters are left alone
    async fn update_infos(&self, infos: &UserInfos) -> Result<()>;

    /// Recompute the cached blueprint and comment counters
    async fn refresh_counters(&self, id: i64) -> Result<()>;

    async fn count(&self) -> Result<i64>;
}

/// SQLx-based user repository, SQLite or MySQL
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

/// Single-column `UPDATE users ... WHERE id = ?`
macro_rules! update_user_column {
    ($repo:expr, $sql:literal, $value:expr, $id:expr, $what:literal) => {{
        with_pool!($repo.pool, |p| {
            sqlx::query($sql)
                .bind($value)
                .bind($id)
                .execute(p)
                .await
                .context(concat!("Failed to update ", $what))?;
        });
        Ok(())
    }};
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &NewUser) -> Result<User> {
        let now = Utc::now();

        let id = with_pool!(self.pool, |p| {
            let id = sqlx::query(
                "INSERT INTO users (username, slug, email, password_hash, grade, \
                 confirmed_token, confirmed_at, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&user.username)
            .bind(&user.slug)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.grade.as_str())
            .bind(&user.confirmed_token)
            .bind(user.confirmed_at)
            .bind(now)
            .execute(p)
            .await
            .context("Failed to create user")?
            .insert_id();

            sqlx::query("INSERT INTO users_infos (id_user) VALUES (?)")
                .bind(id)
                .execute(p)
                .await
                .context("Failed to create user infos")?;

            id
        });

        self.get_by_id(id)
            .await?
            .context("Created user could not be read back")
    }

    async fn find(&self, lookup: UserLookup<'_>) -> Result<Option<User>> {
        let (column, text, number) = match lookup {
            UserLookup::Id(id) => ("id", None, Some(id)),
            UserLookup::Username(v) => ("username", Some(v), None),
            UserLookup::Slug(v) => ("slug", Some(v), None),
            UserLookup::Email(v) => ("email", Some(v), None),
            UserLookup::ApiKey(v) => ("api_key", Some(v), None),
            UserLookup::ConfirmedToken(v) => ("confirmed_token", Some(v), None),
            UserLookup::PasswordReset(v) => ("password_reset", Some(v), None),
        };
        let sql = format!("SELECT {} FROM users WHERE {} = ?", USER_COLUMNS, column);

        let user = with_pool!(self.pool, |p| {
            let query = sqlx::query_as::<_, User>(&sql);
            let query = match (text, number) {
                (Some(text), _) => query.bind(text),
                (None, Some(number)) => query.bind(number),
                (None, None) => query.bind(0_i64),
            };
            query
                .fetch_optional(p)
                .await
                .with_context(|| format!("Failed to get user by {}", column))?
        });
        Ok(user)
    }

    async fn update_identity(&self, id: i64, username: &str, slug: &str) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query("UPDATE users SET username = ?, slug = ? WHERE id = ?")
                .bind(username)
                .bind(slug)
                .bind(id)
                .execute(p)
                .await
                .context("Failed to update username")?;
        });
        Ok(())
    }

    async fn update_email(&self, id: i64, email: &str) -> Result<()> {
        update_user_column!(self, "UPDATE users SET email = ? WHERE id = ?", email, id, "email")
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()> {
        update_user_column!(
            self,
            "UPDATE users SET password_hash = ? WHERE id = ?",
            password_hash,
            id,
            "password"
        )
    }

    async fn set_confirmed(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        update_user_column!(
            self,
            "UPDATE users SET confirmed_at = ?, confirmed_token = NULL WHERE id = ?",
            at,
            id,
            "confirmation"
        )
    }

    async fn set_reset_token(
        &self,
        id: i64,
        token: Option<&str>,
        at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query("UPDATE users SET password_reset = ?, password_reset_at = ? WHERE id = ?")
                .bind(token)
                .bind(at)
                .bind(id)
                .execute(p)
                .await
                .context("Failed to update password reset token")?;
        });
        Ok(())
    }

    async fn set_avatar(&self, id: i64, avatar: Option<&str>) -> Result<()> {
        update_user_column!(self, "UPDATE users SET avatar = ? WHERE id = ?", avatar, id, "avatar")
    }

    async fn set_api_key(&self, id: i64, api_key: &str) -> Result<()> {
        update_user_column!(self, "UPDATE users SET api_key = ? WHERE id = ?", api_key, id, "api key")
    }

    async fn touch_login(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        update_user_column!(
            self,
            "UPDATE users SET last_login_at = ? WHERE id = ?",
            at,
            id,
            "last login"
        )
    }

    async fn remove_account(&self, removal: &AccountRemoval) -> Result<Vec<i64>> {
        let mut touched = with_pool!(self.pool, |p| {
            let mut tx = p.begin().await.context("Failed to begin transaction")?;

            // Commenters on the account's blueprints, read before anything moves
            let mut touched = sqlx::query_scalar::<_, i64>(
                "SELECT DISTINCT c.id_author FROM comments c JOIN blueprints b ON b.id = c.id_blueprint \
                 WHERE b.id_author = ? AND c.id_author IS NOT NULL AND c.id_author <> ?",
            )
            .bind(removal.id)
            .bind(removal.id)
            .fetch_all(&mut *tx)
            .await
            .context("Failed to find commenters")?;

            match removal.comments {
                CommentFate::Detach => {
                    sqlx::query(
                        "UPDATE comments SET name_fallback = ?, id_author = NULL WHERE id_author = ?",
                    )
                    .bind(&removal.username)
                    .bind(removal.id)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to detach comments")?;
                }
                CommentFate::Reassign => {
                    sqlx::query("UPDATE comments SET id_author = ? WHERE id_author = ?")
                        .bind(removal.heir)
                        .bind(removal.id)
                        .execute(&mut *tx)
                        .await
                        .context("Failed to reassign comments")?;
                }
                CommentFate::Delete => {
                    let blueprints = sqlx::query_scalar::<_, i64>(
                        "SELECT DISTINCT id_blueprint FROM comments WHERE id_author = ?",
                    )
                    .bind(removal.id)
                    .fetch_all(&mut *tx)
                    .await
                    .context("Failed to find account comments")?;

                    sqlx::query("DELETE FROM comments WHERE id_author = ?")
                        .bind(removal.id)
                        .execute(&mut *tx)
                        .await
                        .context("Failed to delete account comments")?;

                    for id_blueprint in blueprints {
                        sqlx::query(
                            "UPDATE blueprints SET comments_count = \
                             (SELECT COUNT(*) FROM comments WHERE id_blueprint = ?) WHERE id = ?",
                        )
                        .bind(id_blueprint)
                        .bind(id_blueprint)
                        .execute(&mut *tx)
                        .await
                        .context("Failed to recount comments")?;
                    }
                }
            }

            if removal.delete_blueprints {
                sqlx::query(
                    "UPDATE blueprints SET deleted_at = ? WHERE id_author = ? AND deleted_at IS NULL",
                )
                .bind(removal.at)
                .bind(removal.id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete account blueprints")?;
            }

            // id_author is mandatory, deleted blueprints move too
            sqlx::query("UPDATE blueprints SET id_author = ? WHERE id_author = ?")
                .bind(removal.heir)
                .bind(removal.id)
                .execute(&mut *tx)
                .await
                .context("Failed to transfer blueprints")?;

            sqlx::query("DELETE FROM sessions WHERE user_id = ?")
                .bind(removal.id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete account sessions")?;
            sqlx::query("DELETE FROM users_infos WHERE id_user = ?")
                .bind(removal.id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete user infos")?;
            sqlx::query("DELETE FROM users WHERE id = ?")
                .bind(removal.id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete user")?;

            tx.commit().await.context("Failed to commit account removal")?;
            touched
        });

        touched.push(removal.heir);
        touched.sort_unstable();
        touched.dedup();
        Ok(touched)
    }

    async fn get_infos(&self, id: i64) -> Result<Option<UserInfos>> {
        let sql = format!("SELECT {} FROM users_infos WHERE id_user = ?", INFOS_COLUMNS);
        let infos = with_pool!(self.pool, |p| {
            sqlx::query_as::<_, UserInfos>(&sql)
                .bind(id)
                .fetch_optional(p)
                .await
                .context("Failed to get user infos")?
        });
        Ok(infos)
    }

    async fn update_infos(&self, infos: &UserInfos) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query(
                "UPDATE users_infos SET bio = ?, link_website = ?, link_twitter = ?, \
                 link_github = ?, link_twitch = ?, link_unreal = ?, link_youtube = ? \
                 WHERE id_user = ?",
            )
            .bind(&infos.bio)
            .bind(&infos.link_website)
            .bind(&infos.link_twitter)
            .bind(&infos.link_github)
            .bind(&infos.link_twitch)
            .bind(&infos.link_unreal)
            .bind(&infos.link_youtube)
            .bind(infos.id_user)
            .execute(p)
            .await
            .context("Failed to update user infos")?;
        });
        Ok(())
    }

    async fn refresh_counters(&self, id: i64) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query(
                r#"
                UPDATE users_infos SET
                    count_public_blueprint = (
                        SELECT COUNT(*) FROM blueprints
                        WHERE id_author = ? AND deleted_at IS NULL AND exposure = 'public'),
                    count_private_blueprint = (
                        SELECT COUNT(*) FROM blueprints
                        WHERE id_author = ? AND deleted_at IS NULL AND exposure <> 'public'),
                    count_public_comment = (
                        SELECT COUNT(*) FROM comments c JOIN blueprints b ON b.id = c.id_blueprint
                        WHERE c.id_author = ? AND b.deleted_at IS NULL AND b.exposure = 'public'),
                    count_private_comment = (
                        SELECT COUNT(*) FROM comments c JOIN blueprints b ON b.id = c.id_blueprint
                        WHERE c.id_author = ? AND b.deleted_at IS NULL AND b.exposure <> 'public')
                WHERE id_user = ?
                "#,
            )
            .bind(id)
            .bind(id)
            .bind(id)
            .bind(id)
            .bind(id)
            .execute(p)
            .await
            .context("Failed to refresh user counters")?;
        });
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        let count = with_pool!(self.pool, |p| {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
                .fetch_one(p)
                .await
                .context("Failed to count users")?
        });
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{
        insert_blueprint, insert_comment, insert_user, setup_pool,
    };

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            slug: username.to_lowercase(),
            email: format!("{}@example.com", username.to_lowercase()),
            password_hash: "hash".to_string(),
            grade: Grade::Member,
            confirmed_token: Some(format!("token-{}", username)),
            confirmed_at: None,
        }
    }

    #[tokio::test]
    async fn test_create_user_with_infos() {
        let pool = setup_pool().await;
        let repo = SqlxUserRepository::new(pool);

        let user = repo.create(&new_user("Alice")).await.expect("Failed to create user");
        assert!(user.id > 0);
        assert_eq!(user.slug, "alice");
        assert_eq!(user.grade, Grade::Member);
        assert!(!user.is_confirmed());

        let infos = repo
            .get_infos(user.id)
            .await
            .expect("Failed to get infos")
            .expect("Infos missing");
        assert_eq!(infos.count_public_blueprint, 0);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lookups() {
        let pool = setup_pool().await;
        let repo = SqlxUserRepository::new(pool);
        let user = repo.create(&new_user("Alice")).await.unwrap();
        repo.set_api_key(user.id, "key123").await.unwrap();

        for lookup in [
            UserLookup::Id(user.id),
            UserLookup::Username("Alice"),
            UserLookup::Slug("alice"),
            UserLookup::Email("alice@example.com"),
            UserLookup::ApiKey("key123"),
            UserLookup::ConfirmedToken("token-Alice"),
        ] {
            let found = repo.find(lookup).await.unwrap();
            assert_eq!(found.map(|u| u.id), Some(user.id), "lookup {:?}", lookup);
        }

        assert!(repo.get_by_username("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_updates() {
        let pool = setup_pool().await;
        let repo = SqlxUserRepository::new(pool);
        let user = repo.create(&new_user("Alice")).await.unwrap();
        let now = Utc::now();

        repo.update_identity(user.id, "Alicia", "alicia").await.unwrap();
        repo.update_email(user.id, "alicia@example.com").await.unwrap();
        repo.update_password(user.id, "new-hash").await.unwrap();
        repo.set_confirmed(user.id, now).await.unwrap();
        repo.set_avatar(user.id, Some("avatar.png")).await.unwrap();
        repo.set_reset_token(user.id, Some("reset"), Some(now)).await.unwrap();
        repo.touch_login(user.id, now).await.unwrap();

        let updated = repo.get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(updated.username, "Alicia");
        assert_eq!(updated.slug, "alicia");
        assert_eq!(updated.email, "alicia@example.com");
        assert_eq!(updated.password_hash, "new-hash");
        assert!(updated.is_confirmed());
        assert!(updated.confirmed_token.is_none());
        assert_eq!(updated.avatar.as_deref(), Some("avatar.png"));
        assert_eq!(updated.password_reset.as_deref(), Some("reset"));
        assert!(updated.last_login_at.is_some());

        repo.set_avatar(user.id, None).await.unwrap();
        repo.set_reset_token(user.id, None, None).await.unwrap();
        let cleared = repo.get_by_id(user.id).await.unwrap().unwrap();
        assert!(cleared.avatar.is_none());
        assert!(cleared.password_reset.is_none());
    }

    #[tokio::test]
    async fn test_infos_and_counters() {
        let pool = setup_pool().await;
        let repo = SqlxUserRepository::new(pool.clone());
        let user = repo.create(&new_user("Alice")).await.unwrap();

        let mut infos = repo.get_infos(user.id).await.unwrap().unwrap();
        infos.bio = Some("Tech artist".to_string());
        infos.link_github = Some("alice".to_string());
        repo.update_infos(&infos).await.unwrap();

        insert_blueprint(&pool, user.id, "pub1", "public").await;
        insert_blueprint(&pool, user.id, "pub2", "public").await;
        insert_blueprint(&pool, user.id, "priv", "private").await;
        repo.refresh_counters(user.id).await.unwrap();

        let infos = repo.get_infos(user.id).await.unwrap().unwrap();
        assert_eq!(infos.bio.as_deref(), Some("Tech artist"));
        assert_eq!(infos.link_github.as_deref(), Some("alice"));
        assert_eq!(infos.count_public_blueprint, 2);
        assert_eq!(infos.count_private_blueprint, 1);
        assert_eq!(infos.count_public_comment, 0);
    }

    async fn removal_fixture(pool: &DynDatabasePool) -> (i64, i64, i64, i64, i64) {
        let repo = SqlxUserRepository::new(pool.clone());
        let alice = repo.create(&new_user("Alice")).await.unwrap().id;
        let bob = insert_user(pool, "bob").await;
        let heir = insert_user(pool, "anonymous").await;
        let own = insert_blueprint(pool, alice, "own", "public").await;
        let other = insert_blueprint(pool, bob, "other", "public").await;
        insert_comment(pool, alice, other).await;
        insert_comment(pool, bob, own).await;
        (alice, bob, heir, own, other)
    }

    fn removal(id: i64, heir: i64, comments: CommentFate, delete_blueprints: bool) -> AccountRemoval {
        AccountRemoval {
            id,
            username: "Alice".to_string(),
            heir,
            comments,
            delete_blueprints,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_remove_account_detaches_comments_and_transfers_blueprints() {
        let pool = setup_pool().await;
        let repo = SqlxUserRepository::new(pool.clone());
        let (alice, bob, heir, own, other) = removal_fixture(&pool).await;

        let touched = repo
            .remove_account(&removal(alice, heir, CommentFate::Detach, false))
            .await
            .unwrap();
        assert_eq!(touched, vec![bob, heir]);
        assert!(repo.get_by_id(alice).await.unwrap().is_none());
        assert!(repo.get_infos(alice).await.unwrap().is_none());

        let sqlite = pool.as_sqlite().unwrap();
        let (author, fallback): (Option<i64>, Option<String>) =
            sqlx::query_as("SELECT id_author, name_fallback FROM comments WHERE id_blueprint = ?")
                .bind(other)
                .fetch_one(sqlite)
                .await
                .unwrap();
        assert_eq!(author, None);
        assert_eq!(fallback.as_deref(), Some("Alice"));

        let (owner, deleted): (i64, Option<DateTime<Utc>>) =
            sqlx::query_as("SELECT id_author, deleted_at FROM blueprints WHERE id = ?")
                .bind(own)
                .fetch_one(sqlite)
                .await
                .unwrap();
        assert_eq!(owner, heir);
        assert!(deleted.is_none());
    }

    #[tokio::test]
    async fn test_remove_account_deletes_content() {
        let pool = setup_pool().await;
        let repo = SqlxUserRepository::new(pool.clone());
        let (alice, _, heir, own, other) = removal_fixture(&pool).await;

        repo.remove_account(&removal(alice, heir, CommentFate::Delete, true))
            .await
            .unwrap();

        let sqlite = pool.as_sqlite().unwrap();
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE id_blueprint = ?")
            .bind(other)
            .fetch_one(sqlite)
            .await
            .unwrap();
        assert_eq!(remaining, 0);

        let (owner, deleted): (i64, Option<DateTime<Utc>>) =
            sqlx::query_as("SELECT id_author, deleted_at FROM blueprints WHERE id = ?")
                .bind(own)
                .fetch_one(sqlite)
                .await
                .unwrap();
        assert_eq!(owner, heir);
        assert!(deleted.is_some());
    }

    #[tokio::test]
    async fn test_remove_account_rolls_back_on_failure() {
        let pool = setup_pool().await;
        let repo = SqlxUserRepository::new(pool.clone());
        let (alice, _, heir, own, other) = removal_fixture(&pool).await;

        // The transfer fails on the heir foreign key, after comments were touched
        let result = repo
            .remove_account(&removal(alice, heir + 100, CommentFate::Detach, false))
            .await;
        assert!(result.is_err());

        assert!(repo.get_by_id(alice).await.unwrap().is_some());
        let sqlite = pool.as_sqlite().unwrap();
        let author: Option<i64> = sqlx::query_scalar("SELECT id_author FROM comments WHERE id_blueprint = ?")
            .bind(other)
            .fetch_one(sqlite)
            .await
            .unwrap();
        assert_eq!(author, Some(alice));
        let owner: i64 = sqlx::query_scalar("SELECT id_author FROM blueprints WHERE id = ?")
            .bind(own)
            .fetch_one(sqlite)
            .await
            .unwrap();
        assert_eq!(owner, alice);
    }
}
