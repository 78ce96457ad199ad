//! Tag model

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    /// URL-friendly slug, unique
    pub slug: String,
}

/// Tags sharing a first letter, for the `/tags/` index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagGroup {
    /// Upper-case letter, or `#` for anything not alphabetic
    pub letter: String,
    pub tags: Vec<Tag>,
}
