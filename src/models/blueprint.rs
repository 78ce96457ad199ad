//! Blueprint model
//!
//! A blueprint is the metadata row; its content lives on disk, one file per
//! version, named after `file_id`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::User;

/// Blueprint entity
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Blueprint {
    pub id: i64,
    pub id_author: i64,
    pub slug: String,
    /// Stem of the version files, `{file_id}-{version}.txt`
    pub file_id: String,
    pub title: String,
    #[sqlx(rename = "type", try_from = "String")]
    #[serde(rename = "type")]
    pub kind: BlueprintType,
    pub ue_version: String,
    pub current_version: i64,
    pub thumbnail: Option<String>,
    pub description: Option<String>,
    #[sqlx(try_from = "String")]
    pub exposure: Exposure,
    /// Moment after which the blueprint is soft-deleted
    pub expiration: Option<DateTime<Utc>>,
    /// Embed URL of the attached video
    pub video: Option<String>,
    pub video_provider: Option<String>,
    pub comments_hidden: bool,
    pub comments_closed: bool,
    pub comments_count: i64,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Blueprint {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_some_and(|at| at <= now)
    }

    /// Whether `viewer` may open the blueprint page.
    ///
    /// Deleted or expired blueprints are hidden from everyone; private ones
    /// only show to their author and to admins.
    pub fn is_visible_to(&self, viewer: Option<&User>, now: DateTime<Utc>) -> bool {
        if self.is_deleted() || self.is_expired_at(now) {
            return false;
        }
        match self.exposure {
            Exposure::Public | Exposure::Unlisted => true,
            Exposure::Private => viewer.is_some_and(|u| u.can_moderate(self.id_author)),
        }
    }

    pub fn is_owned_by(&self, user: &User) -> bool {
        self.id_author == user.id
    }
}

/// Kind of graph the pasted text comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlueprintType {
    #[default]
    Blueprint,
    Material,
    Animation,
    BehaviorTree,
    Metasound,
    Niagara,
    Pcg,
}

impl BlueprintType {
    pub const ALL: [BlueprintType; 7] = [
        BlueprintType::Animation,
        BlueprintType::BehaviorTree,
        BlueprintType::Blueprint,
        BlueprintType::Material,
        BlueprintType::Metasound,
        BlueprintType::Niagara,
        BlueprintType::Pcg,
    ];

    /// Guess the graph type from the exported node classes.
    pub fn detect(content: &str) -> Self {
        const MARKERS: [(&str, BlueprintType); 6] = [
            ("MaterialGraphNode", BlueprintType::Material),
            ("AnimGraphNode", BlueprintType::Animation),
            ("BehaviorTreeGraphNode", BlueprintType::BehaviorTree),
            ("MetasoundEditorGraph", BlueprintType::Metasound),
            ("NiagaraNode", BlueprintType::Niagara),
            ("PCGEditorGraphNode", BlueprintType::Pcg),
        ];

        MARKERS
            .iter()
            .find(|(marker, _)| content.contains(marker))
            .map(|(_, kind)| *kind)
            .unwrap_or(BlueprintType::Blueprint)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlueprintType::Blueprint => "blueprint",
            BlueprintType::Material => "material",
            BlueprintType::Animation => "animation",
            BlueprintType::BehaviorTree => "behavior_tree",
            BlueprintType::Metasound => "metasound",
            BlueprintType::Niagara => "niagara",
            BlueprintType::Pcg => "pcg",
        }
    }

    /// Segment used in `/type/{segment}/`
    pub fn url_segment(&self) -> &'static str {
        match self {
            BlueprintType::BehaviorTree => "behavior-tree",
            other => other.as_str(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BlueprintType::Blueprint => "Blueprint",
            BlueprintType::Material => "Material",
            BlueprintType::Animation => "Animation",
            BlueprintType::BehaviorTree => "Behavior tree",
            BlueprintType::Metasound => "Metasound",
            BlueprintType::Niagara => "Niagara",
            BlueprintType::Pcg => "PCG",
        }
    }
}

impl fmt::Display for BlueprintType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlueprintType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "blueprint" => Ok(BlueprintType::Blueprint),
            "material" => Ok(BlueprintType::Material),
            "animation" => Ok(BlueprintType::Animation),
            "behavior_tree" => Ok(BlueprintType::BehaviorTree),
            "metasound" => Ok(BlueprintType::Metasound),
            "niagara" => Ok(BlueprintType::Niagara),
            "pcg" => Ok(BlueprintType::Pcg),
            _ => Err(anyhow::anyhow!("Invalid blueprint type: {}", s)),
        }
    }
}

impl TryFrom<String> for BlueprintType {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Who can see a blueprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Exposure {
    /// Listed everywhere
    #[default]
    Public,
    /// Reachable by link, never listed
    Unlisted,
    /// Author and admins only
    Private,
}

impl Exposure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exposure::Public => "public",
            Exposure::Unlisted => "unlisted",
            Exposure::Private => "private",
        }
    }
}

impl fmt::Display for Exposure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exposure {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(Exposure::Public),
            "unlisted" => Ok(Exposure::Unlisted),
            "private" => Ok(Exposure::Private),
            _ => Err(anyhow::anyhow!("Invalid exposure: {}", s)),
        }
    }
}

impl TryFrom<String> for Exposure {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Expiration choice offered on the paste and edit forms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiration {
    #[default]
    Never,
    OneHour,
    OneDay,
    OneWeek,
}

impl Expiration {
    /// Absolute expiry for a choice made at `now`
    pub fn deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Expiration::Never => None,
            Expiration::OneHour => Some(now + Duration::hours(1)),
            Expiration::OneDay => Some(now + Duration::days(1)),
            Expiration::OneWeek => Some(now + Duration::weeks(1)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Expiration::Never => "never",
            Expiration::OneHour => "1h",
            Expiration::OneDay => "1d",
            Expiration::OneWeek => "1w",
        }
    }
}

impl FromStr for Expiration {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "never" => Ok(Expiration::Never),
            "1h" => Ok(Expiration::OneHour),
            "1d" => Ok(Expiration::OneDay),
            "1w" => Ok(Expiration::OneWeek),
            _ => Err(anyhow::anyhow!("Invalid expiration: {}", s)),
        }
    }
}

/// One committed revision of a blueprint
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BlueprintVersion {
    pub id: i64,
    pub id_blueprint: i64,
    pub version: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub published_at: DateTime<Utc>,
}

/// Listing row: a blueprint with the author's public identity
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BlueprintCard {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub blueprint: Blueprint,
    pub author_username: String,
    pub author_slug: String,
    pub author_avatar: Option<String>,
}
