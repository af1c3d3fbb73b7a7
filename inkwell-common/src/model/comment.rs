use crate::model::{Id, post::PostMarker, user::User};
use time::UtcDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct CommentMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Comment {
    pub id: Id<CommentMarker>,
    pub post_id: Id<PostMarker>,
    pub author: User,
    /// The comment this one replies to, if any. Always belongs to the same post.
    pub parent: Option<Id<CommentMarker>>,
    pub content: String,
    pub created_at: UtcDateTime,
}

impl Comment {
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct NewComment {
    pub post_id: Id<PostMarker>,
    pub parent: Option<Id<CommentMarker>>,
    pub content: String,
}
