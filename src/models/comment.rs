//! Comment model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Comment on a blueprint.
///
/// `id_author` is cleared when the author deletes their account but keeps
/// their comments; `name_fallback` then carries the former username.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub id: i64,
    pub id_author: Option<i64>,
    pub id_blueprint: i64,
    pub name_fallback: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Comment joined with its author for display
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CommentWithAuthor {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub comment: Comment,
    pub author_username: Option<String>,
    pub author_slug: Option<String>,
    pub author_avatar: Option<String>,
}

impl CommentWithAuthor {
    pub fn display_name(&self) -> &str {
        self.author_username
            .as_deref()
            .or(self.comment.name_fallback.as_deref())
            .unwrap_or("Guest")
    }
}
