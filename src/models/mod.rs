//! Data models
//!
//! Database entities, listing read models and the small value types
//! (exposure, expiration, grade) shared by services and handlers.

mod blueprint;
mod comment;
mod pagination;
mod session;
mod tag;
mod user;

pub use blueprint::{
    Blueprint, BlueprintCard, BlueprintType, BlueprintVersion, Expiration, Exposure,
};
pub use comment::{Comment, CommentWithAuthor};
pub use pagination::{ListParams, PagedResult};
pub use session::Session;
pub use tag::{Tag, TagGroup};
pub use user::{Grade, User, UserInfos};
