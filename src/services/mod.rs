//! Services layer
//!
//! Business rules live here. Handlers only parse input and pick a response;
//! services validate, talk to the repositories and keep caches and counters
//! in sync.

pub mod blueprint;
pub mod comment;
pub mod diff;
pub mod mail;
pub mod password;
pub mod rate_limiter;
pub mod slug;
pub mod storage;
pub mod tag;
pub mod user;
pub mod video;

pub use blueprint::{BlueprintService, BlueprintServiceError};
pub use comment::{CommentService, CommentServiceError};
pub use rate_limiter::LoginRateLimiter;
pub use tag::{TagService, TagServiceError};
pub use user::{UserService, UserServiceError};

use std::sync::Arc;

use crate::cache::Cache;
use crate::config::Config;
use crate::db::repositories::Repositories;
use mail::DynMailer;
use storage::{BlueprintStorage, MediaStorage};

/// The four services handlers talk to, wired over one set of repositories
#[derive(Clone)]
pub struct Services {
    pub users: Arc<UserService>,
    pub blueprints: Arc<BlueprintService>,
    pub comments: Arc<CommentService>,
    pub tags: Arc<TagService>,
    pub rate_limiter: Arc<LoginRateLimiter>,
}

impl Services {
    pub fn new(repos: &Repositories, config: &Config, cache: Cache, mailer: DynMailer) -> Self {
        let site = Arc::new(config.site.clone());
        let medias = MediaStorage::new(&config.storage.medias_dir);
        let rate_limiter = Arc::new(LoginRateLimiter::new());

        let tags = Arc::new(TagService::new(repos.tags.clone(), cache.clone()));
        let users = Arc::new(UserService::new(
            repos.users.clone(),
            repos.sessions.clone(),
            medias.clone(),
            mailer,
            rate_limiter.clone(),
            site.clone(),
        ));
        let blueprints = Arc::new(BlueprintService::new(
            repos.blueprints.clone(),
            repos.users.clone(),
            tags.clone(),
            BlueprintStorage::new(&config.storage.blueprints_dir),
            medias,
            cache,
            site,
        ));
        let comments = Arc::new(CommentService::new(
            repos.comments.clone(),
            repos.blueprints.clone(),
            repos.users.clone(),
        ));

        Self {
            users,
            blueprints,
            comments,
            tags,
            rate_limiter,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    use super::*;
    use crate::db::repositories::test_support::setup_pool;
    use crate::db::DynDatabasePool;
    use crate::models::User;
    use crate::services::mail::MemoryMailer;
    use crate::services::user::RegisterInput;

    /// A minimal exported graph built around one node class
    pub fn sample_blueprint(node_class: &str) -> String {
        format!(
            "Begin Object Class=/Script/BlueprintGraph.{0} Name=\"{0}_0\"\n   NodePosX=0\n   NodePosY=0\nEnd Object\n",
            node_class
        )
    }

    /// Services over an in-memory database and a throwaway storage directory
    pub struct TestServices {
        pub users: Arc<UserService>,
        pub blueprints: Arc<BlueprintService>,
        pub comments: Arc<CommentService>,
        pub tags: Arc<TagService>,
        pub repos: Repositories,
        pub mailer: Arc<MemoryMailer>,
        pub pool: DynDatabasePool,
        dir: TempDir,
    }

    impl TestServices {
        pub async fn new() -> Self {
            let pool = setup_pool().await;
            let dir = tempfile::tempdir().expect("Failed to create temp dir");

            let mut config = Config::default();
            config.storage.blueprints_dir = dir.path().join("blueprints");
            config.storage.medias_dir = dir.path().join("medias");

            let repos = Repositories::new(pool.clone());
            let mailer = Arc::new(MemoryMailer::default());
            let services = Services::new(&repos, &config, Cache::default(), mailer.clone());
            services
                .users
                .ensure_anonymous()
                .await
                .expect("Failed to create anonymous account");

            Self {
                users: services.users,
                blueprints: services.blueprints,
                comments: services.comments,
                tags: services.tags,
                repos,
                mailer,
                pool,
                dir,
            }
        }

        pub fn medias_path(&self) -> PathBuf {
            self.dir.path().join("medias")
        }

        /// Registered and confirmed; password "long password"
        pub async fn confirmed_user(&self, username: &str) -> User {
            self.users
                .register(RegisterInput {
                    username: username.to_string(),
                    email: format!("{}@example.com", username.to_lowercase()),
                    password: "long password".to_string(),
                    password_confirm: "long password".to_string(),
                })
                .await
                .expect("Failed to register");
            let token = self
                .mailer
                .last_token_after("confirmed_token=")
                .expect("No confirmation mail");
            self.users
                .confirm_account(&token)
                .await
                .expect("Failed to confirm")
        }

        pub async fn admin_user(&self, username: &str) -> User {
            let user = self.confirmed_user(username).await;
            let sqlite = self.pool.as_sqlite().expect("sqlite pool");
            sqlx::query("UPDATE users SET grade = 'admin' WHERE id = ?")
                .bind(user.id)
                .execute(sqlite)
                .await
                .expect("Failed to promote user");
            self.users
                .get_by_id(user.id)
                .await
                .expect("Failed to reload user")
                .expect("User vanished")
        }
    }
}
