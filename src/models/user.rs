//! User model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Registered account.
///
/// The anonymous placeholder account is an ordinary row that is never
/// confirmed, so it can own content but can never log in.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    /// URL segment used by `/profile/{slug}/`
    pub slug: String,
    pub email: String,
    /// Password hash (argon2)
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[sqlx(try_from = "String")]
    pub grade: Grade,
    /// Avatar file name under `medias/avatars`
    pub avatar: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    #[serde(skip_serializing)]
    pub confirmed_token: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub password_reset: Option<String>,
    pub password_reset_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.grade == Grade::Admin
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }

    /// Owners and admins may moderate content authored by `author_id`
    pub fn can_moderate(&self, author_id: i64) -> bool {
        self.is_admin() || self.id == author_id
    }
}

/// Account grade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    #[default]
    Member,
    Admin,
}

impl Grade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::Member => "member",
            Grade::Admin => "admin",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Grade {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "member" => Ok(Grade::Member),
            "admin" => Ok(Grade::Admin),
            _ => Err(anyhow::anyhow!("Invalid grade: {}", s)),
        }
    }
}

impl TryFrom<String> for Grade {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Profile details and cached counters, one row per user
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserInfos {
    pub id_user: i64,
    pub bio: Option<String>,
    pub link_website: Option<String>,
    pub link_twitter: Option<String>,
    pub link_github: Option<String>,
    pub link_twitch: Option<String>,
    pub link_unreal: Option<String>,
    pub link_youtube: Option<String>,
    pub count_public_blueprint: i64,
    pub count_private_blueprint: i64,
    pub count_public_comment: i64,
    pub count_private_comment: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64, grade: Grade) -> User {
        User {
            id,
            username: "alice".to_string(),
            slug: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: "hash".to_string(),
            grade,
            avatar: None,
            api_key: Some("secret".to_string()),
            confirmed_token: None,
            confirmed_at: Some(Utc::now()),
            password_reset: None,
            password_reset_at: None,
            last_login_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_grade_parsing() {
        assert_eq!("member".parse::<Grade>().unwrap(), Grade::Member);
        assert_eq!("ADMIN".parse::<Grade>().unwrap(), Grade::Admin);
        assert!("editor".parse::<Grade>().is_err());
        assert_eq!(Grade::Admin.to_string(), "admin");
    }

    #[test]
    fn test_can_moderate() {
        let member = user(1, Grade::Member);
        assert!(member.can_moderate(1));
        assert!(!member.can_moderate(2));

        let admin = user(3, Grade::Admin);
        assert!(admin.can_moderate(2));
    }

    #[test]
    fn test_secrets_not_serialized() {
        let json = serde_json::to_string(&user(1, Grade::Member)).unwrap();
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("secret"));
        assert!(json.contains("\"grade\":\"member\""));
    }
}
