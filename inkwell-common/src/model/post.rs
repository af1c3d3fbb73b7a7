use crate::model::{Id, user::User};
use time::UtcDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Post {
    pub id: Id<PostMarker>,
    pub author: User,
    pub content: PostContent,
    /// Server-relative path of the attached image.
    pub image: Option<String>,
    pub like_count: u64,
    pub created_at: UtcDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct PostContent {
    pub title: String,
    pub description: String,
    pub body: String,
}

/// Payload for creating or editing a post.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct PostDraft {
    pub content: PostContent,
    pub image: Option<ImageUpload>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime: Option<String>,
    pub bytes: Vec<u8>,
}
