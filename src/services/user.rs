//! User service
//!
//! Accounts, sessions, confirmation and password reset, profile editing and
//! account deletion.

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::SiteConfig;
use crate::db::repositories::{
    AccountRemoval, CommentFate, NewUser, SessionRepository, UserLookup, UserRepository,
};
use crate::models::{Grade, Session, User, UserInfos};
use crate::services::mail::{self, DynMailer};
use crate::services::password::{check_new_password, hash_password, verify_password};
use crate::services::rate_limiter::LoginRateLimiter;
use crate::services::slug::{random_token, slugify};
use crate::services::storage::{image_extension, MediaKind, MediaStorage};

pub const MAX_USERNAME_LENGTH: usize = 100;
pub const MAX_EMAIL_LENGTH: usize = 100;
pub const MAX_LINK_LENGTH: usize = 255;
pub const API_KEY_LENGTH: usize = 32;
const TOKEN_LENGTH: usize = 48;

/// How long a password reset link stays valid
pub fn reset_token_lifetime() -> Duration {
    Duration::hours(1)
}

#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    /// Deliberately vague so login does not reveal which part was wrong
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Too many attempts, try again later")]
    RateLimited,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("User not found")]
    NotFound,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Session expired")]
    SessionExpired,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<crate::services::password::PasswordRuleError> for UserServiceError {
    fn from(e: crate::services::password::PasswordRuleError) -> Self {
        UserServiceError::ValidationError(e.to_string())
    }
}

/// What happens to a deleted account's blueprints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlueprintsChoice {
    /// Hand them to the anonymous account
    Give,
    Delete,
}

/// What happens to a deleted account's comments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentsChoice {
    /// Keep them, signed with the old username
    Keep,
    /// Hand them to the anonymous account
    Anonymize,
    Delete,
}

impl std::str::FromStr for BlueprintsChoice {
    type Err = UserServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "give" => Ok(Self::Give),
            "delete" => Ok(Self::Delete),
            _ => Err(UserServiceError::ValidationError(
                "Choose what happens to your blueprints".to_string(),
            )),
        }
    }
}

impl std::str::FromStr for CommentsChoice {
    type Err = UserServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep" => Ok(Self::Keep),
            "anonymize" => Ok(Self::Anonymize),
            "delete" => Ok(Self::Delete),
            _ => Err(UserServiceError::ValidationError(
                "Choose what happens to your comments".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password_confirm: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoginInput {
    pub username: String,
    pub password: String,
    pub remember: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileInfosInput {
    pub bio: String,
    pub link_website: String,
    pub link_twitter: String,
    pub link_github: String,
    pub link_twitch: String,
    pub link_unreal: String,
    pub link_youtube: String,
}

/// Public profile page data
#[derive(Debug, Clone)]
pub struct Profile {
    pub user: User,
    pub infos: UserInfos,
}

pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    session_repo: Arc<dyn SessionRepository>,
    medias: MediaStorage,
    mailer: DynMailer,
    limiter: Arc<LoginRateLimiter>,
    site: Arc<SiteConfig>,
}

fn validate_username(username: &str) -> Result<(), UserServiceError> {
    if username.is_empty() {
        return Err(UserServiceError::ValidationError("Username is required".to_string()));
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(UserServiceError::ValidationError(format!(
            "Username must be at most {} characters",
            MAX_USERNAME_LENGTH
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(UserServiceError::ValidationError(
            "Username may only contain letters, digits, '_' and '-'".to_string(),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), UserServiceError> {
    if email.is_empty() {
        return Err(UserServiceError::ValidationError("Email is required".to_string()));
    }
    if email.len() > MAX_EMAIL_LENGTH || email.parse::<lettre::Address>().is_err() {
        return Err(UserServiceError::ValidationError("Email is invalid".to_string()));
    }
    Ok(())
}

/// Empty becomes `None`; anything longer than a column is refused
fn optional_link(label: &str, value: &str) -> Result<Option<String>, UserServiceError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if value.chars().count() > MAX_LINK_LENGTH {
        return Err(UserServiceError::ValidationError(format!(
            "{} must be at most {} characters",
            label, MAX_LINK_LENGTH
        )));
    }
    Ok(Some(value.to_string()))
}

impl UserService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
        medias: MediaStorage,
        mailer: DynMailer,
        limiter: Arc<LoginRateLimiter>,
        site: Arc<SiteConfig>,
    ) -> Self {
        Self {
            user_repo,
            session_repo,
            medias,
            mailer,
            limiter,
            site,
        }
    }

    pub fn is_anonymous(&self, user: &User) -> bool {
        user.username == self.site.anonymous_username
    }

    pub fn rate_limiter(&self) -> &LoginRateLimiter {
        &self.limiter
    }

    /// Create the placeholder account that owns anonymous pastes.
    ///
    /// It has no confirmation and an unguessable password, so it can never
    /// log in.
    pub async fn ensure_anonymous(&self) -> Result<User, UserServiceError> {
        let username = self.site.anonymous_username.as_str();
        if let Some(user) = self.user_repo.get_by_username(username).await? {
            return Ok(user);
        }

        let slug = slugify(username);
        let user = self
            .user_repo
            .create(&NewUser {
                username: username.to_string(),
                slug: slug.clone(),
                email: format!("{}@anonymous.invalid", slug),
                password_hash: hash_password(&random_token(64))?,
                grade: Grade::Member,
                confirmed_token: None,
                confirmed_at: None,
            })
            .await
            .context("Failed to create anonymous account")?;

        tracing::info!("Created anonymous account '{}'", user.username);
        Ok(user)
    }

    pub async fn register(&self, input: RegisterInput) -> Result<User, UserServiceError> {
        let username = input.username.trim();
        let email = input.email.trim();

        validate_username(username)?;
        validate_email(email)?;
        check_new_password(&input.password, &input.password_confirm)?;

        let slug = slugify(username);
        if self.user_repo.get_by_username(username).await?.is_some()
            || self.user_repo.get_by_slug(&slug).await?.is_some()
        {
            return Err(UserServiceError::UserExists("Username is already taken".to_string()));
        }
        if self.user_repo.get_by_email(email).await?.is_some() {
            return Err(UserServiceError::UserExists("Email is already taken".to_string()));
        }

        let token = random_token(TOKEN_LENGTH);
        let user = self
            .user_repo
            .create(&NewUser {
                username: username.to_string(),
                slug,
                email: email.to_string(),
                password_hash: hash_password(&input.password)?,
                grade: Grade::Member,
                confirmed_token: Some(token.clone()),
                confirmed_at: None,
            })
            .await
            .context("Failed to create user")?;

        tracing::info!("Registered user {} ({})", user.username, user.id);

        let mail = mail::confirmation_mail(&self.site, &user.email, &user.username, &token);
        if let Err(e) = self.mailer.send(mail).await {
            tracing::error!("Failed to send confirmation mail to {}: {:#}", user.email, e);
        }

        Ok(user)
    }

    pub async fn confirm_account(&self, token: &str) -> Result<User, UserServiceError> {
        if token.is_empty() {
            return Err(UserServiceError::InvalidToken);
        }
        let user = self
            .user_repo
            .find(UserLookup::ConfirmedToken(token))
            .await?
            .ok_or(UserServiceError::InvalidToken)?;

        self.user_repo.set_confirmed(user.id, Utc::now()).await?;
        tracing::info!("Confirmed account {}", user.username);

        self.user_repo
            .get_by_id(user.id)
            .await?
            .ok_or(UserServiceError::NotFound)
    }

    /// Check credentials and open a session.
    pub async fn login(
        &self,
        input: LoginInput,
        ip: Option<IpAddr>,
    ) -> Result<(User, Session), UserServiceError> {
        if let Some(ip) = ip {
            if self.limiter.is_ip_limited(ip).await {
                tracing::warn!("Login rate limit reached for {}", ip);
                return Err(UserServiceError::RateLimited);
            }
            self.limiter.record_ip_request(ip).await;
        }

        let username = input.username.trim();
        if self.limiter.is_username_limited(username).await {
            tracing::warn!("Login rate limit reached for user {}", username);
            return Err(UserServiceError::RateLimited);
        }

        let user = match self.check_credentials(username, &input.password).await? {
            Some(user) => user,
            None => {
                self.limiter.record_failed_attempt(username).await;
                return Err(UserServiceError::AuthenticationError(
                    "Invalid username or password".to_string(),
                ));
            }
        };

        self.limiter.clear_username_attempts(username).await;

        let now = Utc::now();
        self.user_repo.touch_login(user.id, now).await?;

        let days = if input.remember {
            self.site.remember_lifetime_days
        } else {
            self.site.session_lifetime_days
        };
        let session = self
            .session_repo
            .create(&Session {
                id: Uuid::new_v4().to_string(),
                user_id: user.id,
                expires_at: now + Duration::days(days),
                created_at: now,
            })
            .await
            .context("Failed to create session")?;

        tracing::info!("User {} logged in", user.username);
        Ok((user, session))
    }

    /// The user when the pair is valid and the account may log in
    async fn check_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, UserServiceError> {
        let user = match self.user_repo.get_by_username(username).await? {
            Some(user) => user,
            None => match self.user_repo.get_by_email(username).await? {
                Some(user) => user,
                None => return Ok(None),
            },
        };

        if self.is_anonymous(&user) || !user.is_confirmed() {
            return Ok(None);
        }
        if !verify_password(password, &user.password_hash)? {
            return Ok(None);
        }
        Ok(Some(user))
    }

    pub async fn logout(&self, token: &str) -> Result<(), UserServiceError> {
        self.session_repo
            .delete(token)
            .await
            .context("Failed to delete session")?;
        Ok(())
    }

    /// The user behind a session token.
    ///
    /// Unknown tokens give `Ok(None)`; an expired session is removed and
    /// reported as `SessionExpired`.
    pub async fn validate_session(&self, token: &str) -> Result<Option<User>, UserServiceError> {
        let Some(session) = self.session_repo.get_by_id(token).await? else {
            return Ok(None);
        };

        if session.is_expired() {
            self.session_repo.delete(token).await?;
            return Err(UserServiceError::SessionExpired);
        }

        Ok(self.user_repo.get_by_id(session.user_id).await?)
    }

    pub async fn cleanup_expired_sessions(&self) -> Result<u64, UserServiceError> {
        Ok(self.session_repo.delete_expired().await?)
    }

    /// Start a password reset. Unknown addresses are accepted silently.
    pub async fn forgot_password(&self, email: &str) -> Result<(), UserServiceError> {
        let email = email.trim();
        validate_email(email)?;

        if self.limiter.is_reset_limited(email).await {
            tracing::warn!("Password reset rate limit reached for {}", email);
            return Ok(());
        }
        self.limiter.record_reset_request(email).await;

        let user = match self.user_repo.get_by_email(email).await? {
            Some(user) if !self.is_anonymous(&user) => user,
            _ => {
                tracing::debug!("Password reset requested for unknown email");
                return Ok(());
            }
        };

        let token = random_token(TOKEN_LENGTH);
        self.user_repo
            .set_reset_token(user.id, Some(&token), Some(Utc::now()))
            .await?;

        let mail = mail::reset_password_mail(&self.site, &user.email, &user.username, &token);
        if let Err(e) = self.mailer.send(mail).await {
            tracing::error!("Failed to send reset mail to {}: {:#}", user.email, e);
        }
        Ok(())
    }

    /// Whether a reset token is usable, for showing the reset form
    pub async fn check_reset_token(&self, token: &str) -> Result<User, UserServiceError> {
        self.reset_user(token, Utc::now()).await
    }

    async fn reset_user(&self, token: &str, now: DateTime<Utc>) -> Result<User, UserServiceError> {
        if token.is_empty() {
            return Err(UserServiceError::InvalidToken);
        }
        let user = self
            .user_repo
            .find(UserLookup::PasswordReset(token))
            .await?
            .ok_or(UserServiceError::InvalidToken)?;

        let issued = user.password_reset_at.ok_or(UserServiceError::InvalidToken)?;
        if issued + reset_token_lifetime() < now {
            self.user_repo.set_reset_token(user.id, None, None).await?;
            return Err(UserServiceError::InvalidToken);
        }
        Ok(user)
    }

    pub async fn reset_password(
        &self,
        token: &str,
        password: &str,
        password_confirm: &str,
    ) -> Result<User, UserServiceError> {
        let user = self.reset_user(token, Utc::now()).await?;
        check_new_password(password, password_confirm)?;

        self.user_repo
            .update_password(user.id, &hash_password(password)?)
            .await?;
        self.user_repo.set_reset_token(user.id, None, None).await?;
        self.session_repo.delete_by_user(user.id).await?;

        tracing::info!("Password reset for {}", user.username);
        Ok(user)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, UserServiceError> {
        Ok(self.user_repo.get_by_id(id).await?)
    }

    /// Account owning an API key; the anonymous account never matches
    pub async fn get_by_api_key(&self, key: &str) -> Result<Option<User>, UserServiceError> {
        if key.is_empty() {
            return Ok(None);
        }
        let user = self.user_repo.find(UserLookup::ApiKey(key)).await?;
        Ok(user.filter(|u| !self.is_anonymous(u)))
    }

    pub async fn get_profile(&self, slug: &str) -> Result<Profile, UserServiceError> {
        let user = self
            .user_repo
            .get_by_slug(slug)
            .await?
            .ok_or(UserServiceError::NotFound)?;
        let infos = self.user_repo.get_infos(user.id).await?.unwrap_or(UserInfos {
            id_user: user.id,
            ..Default::default()
        });
        Ok(Profile { user, infos })
    }

    pub async fn edit_profile_infos(
        &self,
        user: &User,
        input: ProfileInfosInput,
    ) -> Result<UserInfos, UserServiceError> {
        let website = optional_link("Website", &input.link_website)?;
        if let Some(website) = &website {
            let lower = website.to_lowercase();
            if !lower.starts_with("http://") && !lower.starts_with("https://") {
                return Err(UserServiceError::ValidationError(
                    "Website must start with http:// or https://".to_string(),
                ));
            }
        }

        let mut infos = self.user_repo.get_infos(user.id).await?.unwrap_or(UserInfos {
            id_user: user.id,
            ..Default::default()
        });
        let bio = input.bio.trim();
        infos.bio = (!bio.is_empty()).then(|| bio.to_string());
        infos.link_website = website;
        infos.link_twitter = optional_link("Twitter", &input.link_twitter)?;
        infos.link_github = optional_link("GitHub", &input.link_github)?;
        infos.link_twitch = optional_link("Twitch", &input.link_twitch)?;
        infos.link_unreal = optional_link("Unreal", &input.link_unreal)?;
        infos.link_youtube = optional_link("YouTube", &input.link_youtube)?;

        self.user_repo.update_infos(&infos).await?;
        Ok(infos)
    }

    pub async fn change_username(&self, user: &User, new: &str) -> Result<User, UserServiceError> {
        let new = new.trim();
        validate_username(new)?;
        if self.is_anonymous(user) {
            return Err(UserServiceError::Forbidden("This account cannot be renamed".to_string()));
        }

        let slug = slugify(new);
        let taken_by_other = |found: Option<User>| found.is_some_and(|u| u.id != user.id);
        if taken_by_other(self.user_repo.get_by_username(new).await?)
            || taken_by_other(self.user_repo.get_by_slug(&slug).await?)
        {
            return Err(UserServiceError::UserExists("Username is already taken".to_string()));
        }

        self.user_repo.update_identity(user.id, new, &slug).await?;
        tracing::info!("User {} renamed to {}", user.username, new);
        self.user_repo
            .get_by_id(user.id)
            .await?
            .ok_or(UserServiceError::NotFound)
    }

    pub async fn change_email(&self, user: &User, new: &str) -> Result<(), UserServiceError> {
        let new = new.trim();
        validate_email(new)?;
        if let Some(other) = self.user_repo.get_by_email(new).await? {
            if other.id != user.id {
                return Err(UserServiceError::UserExists("Email is already taken".to_string()));
            }
            return Ok(());
        }
        self.user_repo.update_email(user.id, new).await?;
        Ok(())
    }

    pub async fn change_password(
        &self,
        user: &User,
        current: &str,
        new: &str,
        confirm: &str,
    ) -> Result<(), UserServiceError> {
        if !verify_password(current, &user.password_hash)? {
            return Err(UserServiceError::AuthenticationError(
                "Current password is incorrect".to_string(),
            ));
        }
        check_new_password(new, confirm)?;
        self.user_repo
            .update_password(user.id, &hash_password(new)?)
            .await?;
        Ok(())
    }

    pub async fn generate_api_key(&self, user: &User) -> Result<String, UserServiceError> {
        let key = random_token(API_KEY_LENGTH);
        self.user_repo.set_api_key(user.id, &key).await?;
        Ok(key)
    }

    /// Replace the avatar; returns the stored media name
    pub async fn set_avatar(
        &self,
        user: &User,
        data: &[u8],
        content_type: &str,
    ) -> Result<String, UserServiceError> {
        if image_extension(content_type).is_none() {
            return Err(UserServiceError::ValidationError(format!(
                "Unsupported image type: {}",
                content_type
            )));
        }
        if data.is_empty() {
            return Err(UserServiceError::ValidationError("Image is empty".to_string()));
        }

        let name = self.medias.save(MediaKind::Avatar, data, content_type).await?;
        self.user_repo.set_avatar(user.id, Some(&name)).await?;
        if let Some(old) = &user.avatar {
            self.medias.delete(old).await?;
        }
        Ok(name)
    }

    pub async fn delete_avatar(&self, user: &User) -> Result<(), UserServiceError> {
        self.user_repo.set_avatar(user.id, None).await?;
        if let Some(old) = &user.avatar {
            self.medias.delete(old).await?;
        }
        Ok(())
    }

    pub async fn refresh_counters(&self, user_id: i64) -> Result<(), UserServiceError> {
        Ok(self.user_repo.refresh_counters(user_id).await?)
    }

    /// Remove an account, deciding the fate of its blueprints and comments.
    pub async fn delete_account(
        &self,
        user: &User,
        blueprints: BlueprintsChoice,
        comments: CommentsChoice,
    ) -> Result<(), UserServiceError> {
        if self.is_anonymous(user) {
            return Err(UserServiceError::Forbidden(
                "The anonymous account cannot be deleted".to_string(),
            ));
        }
        let anonymous = self.ensure_anonymous().await?;

        let removal = AccountRemoval {
            id: user.id,
            username: user.username.clone(),
            heir: anonymous.id,
            comments: match comments {
                CommentsChoice::Keep => CommentFate::Detach,
                CommentsChoice::Anonymize => CommentFate::Reassign,
                CommentsChoice::Delete => CommentFate::Delete,
            },
            delete_blueprints: blueprints == BlueprintsChoice::Delete,
            at: Utc::now(),
        };
        for id in self.user_repo.remove_account(&removal).await? {
            self.user_repo.refresh_counters(id).await?;
        }

        // Files go last, once the database no longer points at them
        if let Some(avatar) = &user.avatar {
            if let Err(e) = self.medias.delete(avatar).await {
                tracing::warn!("Failed to remove avatar of deleted account {}: {}", user.username, e);
            }
        }

        tracing::info!(
            "Deleted account {} (blueprints: {:?}, comments: {:?})",
            user.username,
            blueprints,
            comments
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::TestServices;

    fn register_input(username: &str) -> RegisterInput {
        RegisterInput {
            username: username.to_string(),
            email: format!("{}@example.com", username.to_lowercase()),
            password: "long password".to_string(),
            password_confirm: "long password".to_string(),
        }
    }

    fn login_input(username: &str, password: &str) -> LoginInput {
        LoginInput {
            username: username.to_string(),
            password: password.to_string(),
            remember: false,
        }
    }

    #[tokio::test]
    async fn test_register_validation() {
        let t = TestServices::new().await;
        let users = &t.users;

        let mut bad = register_input("bad name");
        assert!(matches!(users.register(bad.clone()).await, Err(UserServiceError::ValidationError(_))));
        bad = register_input(&"a".repeat(101));
        assert!(matches!(users.register(bad).await, Err(UserServiceError::ValidationError(_))));

        let mut input = register_input("alice");
        input.email = "not-an-email".to_string();
        assert!(matches!(users.register(input).await, Err(UserServiceError::ValidationError(_))));

        let mut input = register_input("alice");
        input.password = "short".to_string();
        input.password_confirm = "short".to_string();
        assert!(matches!(users.register(input).await, Err(UserServiceError::ValidationError(_))));

        let mut input = register_input("alice");
        input.password_confirm = "long passwort".to_string();
        assert!(matches!(users.register(input).await, Err(UserServiceError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_register_uniqueness_and_mail() {
        let t = TestServices::new().await;

        let user = t.users.register(register_input("Alice")).await.unwrap();
        assert_eq!(user.slug, "alice");
        assert!(!user.is_confirmed());
        assert_eq!(t.mailer.sent().len(), 1);

        let dup = t.users.register(register_input("alice")).await;
        assert!(matches!(dup, Err(UserServiceError::UserExists(_))));

        let mut same_email = register_input("bob");
        same_email.email = "alice@example.com".to_string();
        assert!(matches!(t.users.register(same_email).await, Err(UserServiceError::UserExists(_))));

        let anonymous = t.users.register(register_input("anonymous")).await;
        assert!(matches!(anonymous, Err(UserServiceError::UserExists(_))));
    }

    #[tokio::test]
    async fn test_login_requires_confirmation() {
        let t = TestServices::new().await;
        t.users.register(register_input("alice")).await.unwrap();

        let err = t.users.login(login_input("alice", "long password"), None).await;
        assert!(matches!(err, Err(UserServiceError::AuthenticationError(_))));

        let token = t.mailer.last_token_after("confirmed_token=").unwrap();
        let confirmed = t.users.confirm_account(&token).await.unwrap();
        assert!(confirmed.is_confirmed());
        assert!(matches!(
            t.users.confirm_account(&token).await,
            Err(UserServiceError::InvalidToken)
        ));

        let (user, session) = t.users.login(login_input("alice", "long password"), None).await.unwrap();
        assert_eq!(session.user_id, user.id);
        assert!(session.remaining_seconds() <= 7 * 86400);
        assert!(session.remaining_seconds() > 6 * 86400);

        let validated = t.users.validate_session(&session.id).await.unwrap().unwrap();
        assert_eq!(validated.id, user.id);
        assert!(validated.last_login_at.is_some());

        t.users.logout(&session.id).await.unwrap();
        assert!(t.users.validate_session(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remember_me_extends_session() {
        let t = TestServices::new().await;
        t.confirmed_user("alice").await;

        let mut input = login_input("alice", "long password");
        input.remember = true;
        let (_, session) = t.users.login(input, None).await.unwrap();
        assert!(session.remaining_seconds() > 29 * 86400);
    }

    #[tokio::test]
    async fn test_login_rate_limit() {
        let t = TestServices::new().await;
        t.confirmed_user("alice").await;

        for _ in 0..5 {
            let err = t.users.login(login_input("alice", "wrong password"), None).await;
            assert!(matches!(err, Err(UserServiceError::AuthenticationError(_))));
        }
        let err = t.users.login(login_input("alice", "long password"), None).await;
        assert!(matches!(err, Err(UserServiceError::RateLimited)));
    }

    #[tokio::test]
    async fn test_anonymous_cannot_login_or_be_deleted() {
        let t = TestServices::new().await;
        let anonymous = t.users.ensure_anonymous().await.unwrap();
        let again = t.users.ensure_anonymous().await.unwrap();
        assert_eq!(anonymous.id, again.id);
        assert!(!anonymous.is_confirmed());

        let err = t.users.login(login_input("anonymous", "anything at all"), None).await;
        assert!(matches!(err, Err(UserServiceError::AuthenticationError(_))));

        let err = t
            .users
            .delete_account(&anonymous, BlueprintsChoice::Give, CommentsChoice::Keep)
            .await;
        assert!(matches!(err, Err(UserServiceError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_password_reset_flow() {
        let t = TestServices::new().await;
        let user = t.confirmed_user("alice").await;
        let (_, session) = t.users.login(login_input("alice", "long password"), None).await.unwrap();

        t.users.forgot_password("nobody@example.com").await.unwrap();
        let before = t.mailer.sent().len();

        t.users.forgot_password(&user.email).await.unwrap();
        assert_eq!(t.mailer.sent().len(), before + 1);
        let token = t.mailer.last_token_after("reset_token=").unwrap();

        assert!(t.users.check_reset_token(&token).await.is_ok());
        let err = t.users.reset_password(&token, "new password!", "mismatch!!!").await;
        assert!(matches!(err, Err(UserServiceError::ValidationError(_))));

        t.users.reset_password(&token, "new password!", "new password!").await.unwrap();
        assert!(matches!(
            t.users.reset_password(&token, "new password!", "new password!").await,
            Err(UserServiceError::InvalidToken)
        ));
        assert!(t.users.validate_session(&session.id).await.unwrap().is_none());
        assert!(t.users.login(login_input("alice", "new password!"), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_reset_token_expires() {
        let t = TestServices::new().await;
        let user = t.confirmed_user("alice").await;
        t.users.forgot_password(&user.email).await.unwrap();
        let token = t.mailer.last_token_after("reset_token=").unwrap();

        let later = Utc::now() + Duration::hours(2);
        assert!(matches!(
            t.users.reset_user(&token, later).await,
            Err(UserServiceError::InvalidToken)
        ));
        assert!(matches!(
            t.users.check_reset_token(&token).await,
            Err(UserServiceError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_profile_editing() {
        let t = TestServices::new().await;
        let user = t.confirmed_user("alice").await;

        let input = ProfileInfosInput {
            bio: "  Tech artist ".to_string(),
            link_website: "ftp://example.com".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            t.users.edit_profile_infos(&user, input).await,
            Err(UserServiceError::ValidationError(_))
        ));

        let input = ProfileInfosInput {
            bio: "  Tech artist ".to_string(),
            link_website: "https://alice.dev".to_string(),
            link_github: "x".repeat(256),
            ..Default::default()
        };
        assert!(t.users.edit_profile_infos(&user, input).await.is_err());

        let input = ProfileInfosInput {
            bio: "  Tech artist ".to_string(),
            link_website: "https://alice.dev".to_string(),
            link_github: "alice".to_string(),
            ..Default::default()
        };
        let infos = t.users.edit_profile_infos(&user, input).await.unwrap();
        assert_eq!(infos.bio.as_deref(), Some("Tech artist"));
        assert_eq!(infos.link_twitter, None);

        let profile = t.users.get_profile("alice").await.unwrap();
        assert_eq!(profile.infos.link_website.as_deref(), Some("https://alice.dev"));
    }

    #[tokio::test]
    async fn test_account_settings() {
        let t = TestServices::new().await;
        let user = t.confirmed_user("alice").await;
        t.confirmed_user("bob").await;

        assert!(matches!(
            t.users.change_username(&user, "Bob").await,
            Err(UserServiceError::UserExists(_))
        ));
        let renamed = t.users.change_username(&user, "Alice_2").await.unwrap();
        assert_eq!(renamed.slug, "alice-2");

        assert!(matches!(
            t.users.change_email(&renamed, "bob@example.com").await,
            Err(UserServiceError::UserExists(_))
        ));
        t.users.change_email(&renamed, "alice2@example.com").await.unwrap();

        assert!(matches!(
            t.users.change_password(&renamed, "wrong", "another password", "another password").await,
            Err(UserServiceError::AuthenticationError(_))
        ));
        t.users
            .change_password(&renamed, "long password", "another password", "another password")
            .await
            .unwrap();

        let key = t.users.generate_api_key(&renamed).await.unwrap();
        assert_eq!(key.len(), API_KEY_LENGTH);
        let owner = t.users.get_by_api_key(&key).await.unwrap().unwrap();
        assert_eq!(owner.id, renamed.id);
        assert!(t.users.get_by_api_key("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_avatar() {
        let t = TestServices::new().await;
        let user = t.confirmed_user("alice").await;

        assert!(t.users.set_avatar(&user, b"x", "text/plain").await.is_err());
        let name = t.users.set_avatar(&user, b"\x89PNG", "image/png").await.unwrap();
        assert!(t.medias_path().join(&name).exists());

        let user = t.users.get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(user.avatar.as_deref(), Some(name.as_str()));
        t.users.delete_avatar(&user).await.unwrap();
        assert!(!t.medias_path().join(&name).exists());
    }

    async fn paste(t: &TestServices, author: &User, title: &str) -> crate::models::Blueprint {
        t.blueprints
            .create(
                Some(author),
                crate::services::blueprint::CreateBlueprintInput {
                    title: title.to_string(),
                    exposure: "public".to_string(),
                    content: crate::services::test_support::sample_blueprint("K2Node_Event"),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_delete_account_gives_blueprints_and_keeps_comments() {
        let t = TestServices::new().await;
        let alice = t.confirmed_user("alice").await;
        let bob = t.confirmed_user("bob").await;
        let (_, session) = t.users.login(login_input("alice", "long password"), None).await.unwrap();

        let own = paste(&t, &alice, "Alice graph").await;
        let other = paste(&t, &bob, "Bob graph").await;
        t.comments.add(&alice, &other.slug, "Nice").await.unwrap();

        t.users
            .delete_account(&alice, BlueprintsChoice::Give, CommentsChoice::Keep)
            .await
            .unwrap();

        assert!(t.users.get_by_id(alice.id).await.unwrap().is_none());
        assert!(t.users.validate_session(&session.id).await.unwrap().is_none());

        let own = t.blueprints.get_visible(&own.slug, None).await.unwrap();
        assert!(t.blueprints.is_anonymous_owned(&own).await.unwrap());

        let comments = t.comments.list_for_blueprint(&other).await.unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].comment.id_author, None);
        assert_eq!(comments[0].display_name(), "alice");
    }

    #[tokio::test]
    async fn test_delete_account_deletes_everything() {
        let t = TestServices::new().await;
        let alice = t.confirmed_user("alice").await;
        let bob = t.confirmed_user("bob").await;

        let own = paste(&t, &alice, "Alice graph").await;
        let other = paste(&t, &bob, "Bob graph").await;
        t.comments.add(&alice, &other.slug, "Nice").await.unwrap();
        t.comments.add(&bob, &own.slug, "Thanks").await.unwrap();

        t.users
            .delete_account(&alice, BlueprintsChoice::Delete, CommentsChoice::Delete)
            .await
            .unwrap();

        assert!(t.blueprints.get_visible(&own.slug, None).await.is_err());
        let other = t.blueprints.get_visible(&other.slug, None).await.unwrap();
        assert_eq!(other.comments_count, 0);
        assert!(t.comments.list_for_blueprint(&other).await.unwrap().is_empty());

        // bob's comment sat on a blueprint that is gone now
        let infos = t.repos.users.get_infos(bob.id).await.unwrap().unwrap();
        assert_eq!(infos.count_public_comment, 0);
        assert_eq!(infos.count_public_blueprint, 1);
    }

    #[tokio::test]
    async fn test_delete_account_anonymizes_comments() {
        let t = TestServices::new().await;
        let alice = t.confirmed_user("alice").await;
        let bob = t.confirmed_user("bob").await;
        let anonymous = t.users.ensure_anonymous().await.unwrap();

        let own = paste(&t, &alice, "Alice graph").await;
        let other = paste(&t, &bob, "Bob graph").await;
        t.comments.add(&alice, &other.slug, "Nice").await.unwrap();

        t.users
            .delete_account(&alice, BlueprintsChoice::Give, CommentsChoice::Anonymize)
            .await
            .unwrap();

        let comments = t.comments.list_for_blueprint(&other).await.unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].comment.id_author, Some(anonymous.id));
        assert_eq!(comments[0].comment.content, "Nice");

        let own = t.blueprints.get_visible(&own.slug, None).await.unwrap();
        assert_eq!(own.id_author, anonymous.id);

        let infos = t.repos.users.get_infos(anonymous.id).await.unwrap().unwrap();
        assert_eq!(infos.count_public_blueprint, 1);
        assert_eq!(infos.count_public_comment, 1);
    }
}
