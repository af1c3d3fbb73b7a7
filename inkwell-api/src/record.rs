use inkwell_common::model::{
    Id, ModelValidationError,
    comment::{Comment, CommentMarker, NewComment},
    post::{Post, PostContent, PostMarker},
    user::{Login, PasswordReset, User, UserMarker, Username},
};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcDateTime, format_description::well_known::Rfc3339};

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
pub(crate) struct PostRecord {
    pub id: Id<PostMarker>,
    pub user_id: Id<UserMarker>,
    pub username: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub like_count: Option<u64>,
    pub created_at: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
pub(crate) struct CommentRecord {
    pub id: Id<CommentMarker>,
    pub post_id: Id<PostMarker>,
    pub user_id: Id<UserMarker>,
    pub username: String,
    #[serde(default)]
    pub parent_comment_id: Option<Id<CommentMarker>>,
    pub content: String,
    pub created_at: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateCommentRecord<'a> {
    pub post_id: Id<PostMarker>,
    pub parent_comment_id: Option<Id<CommentMarker>>,
    pub content: &'a str,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreatedCommentRecord {
    pub comment_id: Id<CommentMarker>,
}

#[derive(Clone, Eq, PartialEq, Hash, Serialize)]
pub(crate) struct LoginRecord<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
pub(crate) struct TokenRecord {
    pub token: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub(crate) struct ResetRequestRecord<'a> {
    pub username: &'a str,
}

#[derive(Clone, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResetVerifyRecord<'a> {
    pub username: &'a str,
    pub code: &'a str,
    pub new_password: &'a str,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
pub(crate) struct ErrorRecord {
    #[serde(default)]
    pub message: Option<String>,
}

fn parse_timestamp(value: &str) -> Result<UtcDateTime, ModelValidationError> {
    Ok(OffsetDateTime::parse(value, &Rfc3339)?.to_utc())
}

impl TryFrom<PostRecord> for Post {
    type Error = ModelValidationError;

    fn try_from(value: PostRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.id,
            author: User {
                id: value.user_id,
                username: Username::new(value.username)?,
            },
            content: PostContent {
                title: value.title,
                description: value.description.unwrap_or_default(),
                body: value.content.unwrap_or_default(),
            },
            image: value.image.filter(|image| !image.is_empty()),
            like_count: value.like_count.unwrap_or_default(),
            created_at: parse_timestamp(&value.created_at)?,
        })
    }
}

impl TryFrom<CommentRecord> for Comment {
    type Error = ModelValidationError;

    fn try_from(value: CommentRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.id,
            post_id: value.post_id,
            author: User {
                id: value.user_id,
                username: Username::new(value.username)?,
            },
            parent: value.parent_comment_id,
            content: value.content,
            created_at: parse_timestamp(&value.created_at)?,
        })
    }
}

impl<'a> From<&'a NewComment> for CreateCommentRecord<'a> {
    fn from(value: &'a NewComment) -> Self {
        Self {
            post_id: value.post_id,
            parent_comment_id: value.parent,
            content: &value.content,
        }
    }
}

impl<'a> From<&'a Login> for LoginRecord<'a> {
    fn from(value: &'a Login) -> Self {
        Self {
            username: value.username.get(),
            password: &value.password,
        }
    }
}

impl<'a> From<&'a PasswordReset> for ResetVerifyRecord<'a> {
    fn from(value: &'a PasswordReset) -> Self {
        Self {
            username: value.username.get(),
            code: &value.code,
            new_password: &value.new_password,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::record::{CommentRecord, CreateCommentRecord, PostRecord};
    use inkwell_common::model::{
        Id, ModelValidationError,
        comment::{Comment, NewComment},
        post::Post,
    };
    use serde_json::json;
    use time::macros::utc_datetime;

    #[test]
    fn post_record_fills_defaults() {
        let record: PostRecord = serde_json::from_value(json!({
            "id": 3,
            "user_id": 8,
            "username": "ada",
            "title": "Hello",
            "description": null,
            "content": "Body",
            "image": null,
            "like_count": null,
            "created_at": "2025-03-04T05:06:07.000Z",
        }))
        .unwrap();

        let post = Post::try_from(record).unwrap();
        assert_eq!(post.id, Id::new_unchecked(3));
        assert_eq!(post.author.username.get(), "ada");
        assert_eq!(post.content.description, "");
        assert_eq!(post.content.body, "Body");
        assert_eq!(post.image, None);
        assert_eq!(post.like_count, 0);
        assert_eq!(post.created_at, utc_datetime!(2025-03-04 05:06:07));
    }

    #[test]
    fn comment_record_keeps_parent() {
        let record: CommentRecord = serde_json::from_value(json!({
            "id": 12,
            "post_id": 3,
            "user_id": 8,
            "username": "ada",
            "parent_comment_id": 11,
            "content": "Agreed",
            "created_at": "2025-03-04T07:06:07+02:00",
        }))
        .unwrap();

        let comment = Comment::try_from(record).unwrap();
        assert_eq!(comment.parent, Some(Id::new_unchecked(11)));
        assert_eq!(comment.created_at, utc_datetime!(2025-03-04 05:06:07));
    }

    #[test]
    fn invalid_records_are_rejected() {
        let record: CommentRecord = serde_json::from_value(json!({
            "id": 12,
            "post_id": 3,
            "user_id": 8,
            "username": "",
            "content": "Agreed",
            "created_at": "2025-03-04T05:06:07Z",
        }))
        .unwrap();
        assert!(matches!(
            Comment::try_from(record),
            Err(ModelValidationError::Username(_))
        ));

        let record: CommentRecord = serde_json::from_value(json!({
            "id": 12,
            "post_id": 3,
            "user_id": 8,
            "username": "ada",
            "content": "Agreed",
            "created_at": "yesterday",
        }))
        .unwrap();
        assert!(matches!(
            Comment::try_from(record),
            Err(ModelValidationError::Timestamp(_))
        ));
    }

    #[test]
    fn new_comment_uses_camel_case() {
        let comment = NewComment {
            post_id: Id::new_unchecked(3),
            parent: None,
            content: "First".to_owned(),
        };

        assert_eq!(
            serde_json::to_value(CreateCommentRecord::from(&comment)).unwrap(),
            json!({ "postId": 3, "parentCommentId": null, "content": "First" })
        );
    }
}
