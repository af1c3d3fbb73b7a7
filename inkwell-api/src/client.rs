use crate::record::{
    CommentRecord, CreateCommentRecord, CreatedCommentRecord, ErrorRecord, LoginRecord,
    PostRecord, ResetRequestRecord, ResetVerifyRecord, TokenRecord,
};
use async_trait::async_trait;
use inkwell_common::model::{
    Id, ModelValidationError,
    auth::Credential,
    comment::{Comment, CommentMarker, NewComment},
    post::{Post, PostDraft, PostMarker},
    user::{Login, PasswordReset, Username},
};
use reqwest::{
    Client, RequestBuilder, Response, StatusCode,
    multipart::{Form, Part},
};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request could not be completed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("The server did not accept the credential")]
    Unauthorized,
    #[error("The server rejected the request with {status}: {}", .message.as_deref().unwrap_or("no message"))]
    Rejected {
        status: StatusCode,
        message: Option<String>,
    },
    #[error("Response body could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("The server sent an invalid record: {0}")]
    Data(#[from] ModelValidationError),
}

/// The blogging service as seen from the client.
///
/// Every method taking a [`Credential`] is an authenticated call and sends it as a bearer
/// token. Callers are responsible for only passing credentials that are still live.
#[async_trait]
pub trait BlogApi: Send + Sync {
    async fn fetch_posts(&self) -> Result<Vec<Post>>;
    async fn create_post(&self, credential: &Credential, draft: &PostDraft) -> Result<()>;
    async fn update_post(
        &self,
        credential: &Credential,
        post_id: Id<PostMarker>,
        draft: &PostDraft,
    ) -> Result<()>;
    async fn delete_post(&self, credential: &Credential, post_id: Id<PostMarker>) -> Result<()>;
    async fn like_post(&self, credential: &Credential, post_id: Id<PostMarker>) -> Result<()>;

    async fn fetch_comments(&self, post_id: Id<PostMarker>) -> Result<Vec<Comment>>;
    async fn create_comment(
        &self,
        credential: &Credential,
        comment: &NewComment,
    ) -> Result<Id<CommentMarker>>;
    async fn delete_comment(
        &self,
        credential: &Credential,
        comment_id: Id<CommentMarker>,
    ) -> Result<()>;

    async fn signup(&self, login: &Login) -> Result<()>;
    async fn login(&self, login: &Login) -> Result<Credential>;
    async fn request_password_reset(&self, username: &Username) -> Result<()>;
    async fn verify_password_reset(&self, reset: &PasswordReset) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute address of a post image, given the server-relative path stored on the post.
    #[must_use]
    pub fn image_url(&self, image: &str) -> String {
        if image.starts_with('/') {
            format!("{}{image}", self.base_url)
        } else {
            format!("{}/{image}", self.base_url)
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{path}", self.base_url)
    }

    async fn send(request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            debug!(url = %response.url(), "Credential refused");
            return Err(ApiError::Unauthorized);
        }

        let url = response.url().clone();
        let body = response.bytes().await?;
        let message = serde_json::from_slice::<ErrorRecord>(&body)
            .ok()
            .and_then(|error| error.message);

        warn!(%url, %status, ?message, "Request rejected");
        Err(ApiError::Rejected { status, message })
    }

    async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
        let body = Self::send(request).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn post_form(draft: &PostDraft) -> Result<Form> {
        let mut form = Form::new()
            .text("title", draft.content.title.clone())
            .text("content", draft.content.body.clone())
            .text("description", draft.content.description.clone());

        if let Some(image) = &draft.image {
            let mut part = Part::bytes(image.bytes.clone()).file_name(image.file_name.clone());
            if let Some(mime) = &image.mime {
                part = part.mime_str(mime)?;
            }
            form = form.part("image", part);
        }

        Ok(form)
    }
}

#[async_trait]
impl BlogApi for ApiClient {
    async fn fetch_posts(&self) -> Result<Vec<Post>> {
        let records: Vec<PostRecord> =
            Self::send_json(self.client.get(self.url("/posts"))).await?;

        let posts = records
            .into_iter()
            .map(Post::try_from)
            .collect::<Result<_, _>>()?;
        Ok(posts)
    }

    async fn create_post(&self, credential: &Credential, draft: &PostDraft) -> Result<()> {
        let request = self
            .client
            .post(self.url("/posts"))
            .bearer_auth(credential.as_str())
            .multipart(Self::post_form(draft)?);

        Self::send(request).await?;
        Ok(())
    }

    async fn update_post(
        &self,
        credential: &Credential,
        post_id: Id<PostMarker>,
        draft: &PostDraft,
    ) -> Result<()> {
        let request = self
            .client
            .put(self.url(&format!("/posts/{post_id}")))
            .bearer_auth(credential.as_str())
            .multipart(Self::post_form(draft)?);

        Self::send(request).await?;
        Ok(())
    }

    async fn delete_post(&self, credential: &Credential, post_id: Id<PostMarker>) -> Result<()> {
        let request = self
            .client
            .delete(self.url(&format!("/posts/{post_id}")))
            .bearer_auth(credential.as_str());

        Self::send(request).await?;
        Ok(())
    }

    async fn like_post(&self, credential: &Credential, post_id: Id<PostMarker>) -> Result<()> {
        let request = self
            .client
            .post(self.url(&format!("/posts/{post_id}/like")))
            .bearer_auth(credential.as_str())
            .json(&serde_json::json!({}));

        Self::send(request).await?;
        Ok(())
    }

    async fn fetch_comments(&self, post_id: Id<PostMarker>) -> Result<Vec<Comment>> {
        let records: Vec<CommentRecord> =
            Self::send_json(self.client.get(self.url(&format!("/comments/post/{post_id}"))))
                .await?;

        let comments = records
            .into_iter()
            .map(Comment::try_from)
            .collect::<Result<_, _>>()?;
        Ok(comments)
    }

    async fn create_comment(
        &self,
        credential: &Credential,
        comment: &NewComment,
    ) -> Result<Id<CommentMarker>> {
        let request = self
            .client
            .post(self.url("/comments"))
            .bearer_auth(credential.as_str())
            .json(&CreateCommentRecord::from(comment));

        let created: CreatedCommentRecord = Self::send_json(request).await?;
        Ok(created.comment_id)
    }

    async fn delete_comment(
        &self,
        credential: &Credential,
        comment_id: Id<CommentMarker>,
    ) -> Result<()> {
        let request = self
            .client
            .delete(self.url(&format!("/comments/{comment_id}")))
            .bearer_auth(credential.as_str());

        Self::send(request).await?;
        Ok(())
    }

    async fn signup(&self, login: &Login) -> Result<()> {
        let request = self
            .client
            .post(self.url("/users/signup"))
            .json(&LoginRecord::from(login));

        Self::send(request).await?;
        Ok(())
    }

    async fn login(&self, login: &Login) -> Result<Credential> {
        let request = self
            .client
            .post(self.url("/users/login"))
            .json(&LoginRecord::from(login));

        let TokenRecord { token } = Self::send_json(request).await?;
        Ok(Credential::new(token))
    }

    async fn request_password_reset(&self, username: &Username) -> Result<()> {
        let request = self
            .client
            .post(self.url("/reset/request"))
            .json(&ResetRequestRecord {
                username: username.get(),
            });

        Self::send(request).await?;
        Ok(())
    }

    async fn verify_password_reset(&self, reset: &PasswordReset) -> Result<()> {
        let request = self
            .client
            .post(self.url("/reset/verify"))
            .json(&ResetVerifyRecord::from(reset));

        Self::send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::client::{ApiClient, ApiError, BlogApi};
    use axum::{
        Json, Router,
        extract::{Multipart, Path},
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::{delete, get, post},
    };
    use axum_extra::{TypedHeader, typed_header::TypedHeaderRejection};
    use headers::{Authorization, authorization::Bearer};
    use inkwell_common::model::{
        Id,
        auth::Credential,
        comment::NewComment,
        post::{ImageUpload, PostContent, PostDraft},
        user::{Login, Username},
    };
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::net::TcpListener;

    const TOKEN: &str = "live-token";

    type BearerHeader = Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>;

    fn authorized(header: &BearerHeader) -> bool {
        matches!(header, Ok(TypedHeader(Authorization(bearer))) if bearer.token() == TOKEN)
    }

    fn credential() -> Credential {
        Credential::new(TOKEN.to_owned())
    }

    async fn list_posts() -> Json<Value> {
        Json(json!([
            {
                "id": 1,
                "user_id": 4,
                "username": "ada",
                "title": "First",
                "description": "Short",
                "content": "Long",
                "image": "/uploads/first.png",
                "like_count": 3,
                "created_at": "2025-05-01T10:00:00.000Z",
            },
            {
                "id": 2,
                "user_id": 5,
                "username": "bo",
                "title": "Second",
                "description": null,
                "content": "Text",
                "image": null,
                "like_count": null,
                "created_at": "2025-05-02T10:00:00.000Z",
            },
        ]))
    }

    async fn list_comments(Path(post_id): Path<i64>) -> Json<Value> {
        Json(json!([
            {
                "id": 10,
                "post_id": post_id,
                "user_id": 4,
                "username": "ada",
                "parent_comment_id": null,
                "content": "Root",
                "created_at": "2025-05-01T11:00:00.000Z",
            },
            {
                "id": 11,
                "post_id": post_id,
                "user_id": 5,
                "username": "bo",
                "parent_comment_id": 10,
                "content": "Reply",
                "created_at": "2025-05-01T12:00:00.000Z",
            },
        ]))
    }

    async fn like(header: BearerHeader, Path(_post_id): Path<i64>) -> StatusCode {
        if authorized(&header) {
            StatusCode::OK
        } else {
            StatusCode::UNAUTHORIZED
        }
    }

    async fn create_comment(header: BearerHeader, Json(body): Json<Value>) -> Response {
        if !authorized(&header) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        if body != json!({ "postId": 1, "parentCommentId": 10, "content": "Me too" }) {
            return StatusCode::BAD_REQUEST.into_response();
        }
        (StatusCode::CREATED, Json(json!({ "commentId": 99 }))).into_response()
    }

    async fn delete_comment(header: BearerHeader, Path(_comment_id): Path<i64>) -> Response {
        if !authorized(&header) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        (
            StatusCode::FORBIDDEN,
            Json(json!({ "message": "Not your comment" })),
        )
            .into_response()
    }

    async fn create_post(header: BearerHeader, mut multipart: Multipart) -> StatusCode {
        if !authorized(&header) {
            return StatusCode::UNAUTHORIZED;
        }

        let mut fields = Vec::new();
        while let Ok(Some(field)) = multipart.next_field().await {
            let name = field.name().unwrap_or_default().to_owned();
            let file_name = field.file_name().map(str::to_owned);
            let Ok(bytes) = field.bytes().await else {
                return StatusCode::BAD_REQUEST;
            };
            fields.push((name, file_name, bytes.len()));
        }

        let expected = [
            ("title".to_owned(), None, 5),
            ("content".to_owned(), None, 4),
            ("description".to_owned(), None, 5),
            ("image".to_owned(), Some("cat.png".to_owned()), 3),
        ];
        if fields == expected {
            StatusCode::CREATED
        } else {
            StatusCode::BAD_REQUEST
        }
    }

    async fn login(Json(body): Json<Value>) -> Response {
        if body == json!({ "username": "ada", "password": "correct horse" }) {
            Json(json!({ "token": TOKEN })).into_response()
        } else {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "message": "Invalid credentials" })),
            )
                .into_response()
        }
    }

    async fn serve() -> ApiClient {
        let app = Router::new()
            .route("/api/posts", get(list_posts).post(create_post))
            .route("/api/posts/{id}/like", post(like))
            .route("/api/comments/post/{id}", get(list_comments))
            .route("/api/comments", post(create_comment))
            .route("/api/comments/{id}", delete(delete_comment))
            .route("/api/users/login", post(login));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        ApiClient::new(&format!("http://{address}/"), Duration::from_secs(5)).unwrap()
    }

    fn username(name: &str) -> Username {
        Username::new(name.to_owned()).unwrap()
    }

    #[tokio::test]
    async fn fetch_posts_converts_records() {
        let client = serve().await;

        let posts = client.fetch_posts().await.unwrap();

        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].like_count, 3);
        assert_eq!(posts[0].image.as_deref(), Some("/uploads/first.png"));
        assert_eq!(posts[1].like_count, 0);
        assert_eq!(posts[1].content.description, "");
        assert_eq!(posts[1].author.username, username("bo"));
    }

    #[tokio::test]
    async fn fetch_comments_keeps_parent_links() {
        let client = serve().await;

        let comments = client.fetch_comments(Id::new_unchecked(1)).await.unwrap();

        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].parent, None);
        assert_eq!(comments[1].parent, Some(comments[0].id));
        assert!(comments.iter().all(|comment| comment.post_id.get() == 1));
    }

    #[tokio::test]
    async fn like_requires_accepted_credential() {
        let client = serve().await;

        client
            .like_post(&credential(), Id::new_unchecked(1))
            .await
            .unwrap();

        let stale = Credential::new("stale".to_owned());
        assert!(matches!(
            client.like_post(&stale, Id::new_unchecked(1)).await,
            Err(ApiError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn create_comment_returns_server_id() {
        let client = serve().await;
        let comment = NewComment {
            post_id: Id::new_unchecked(1),
            parent: Some(Id::new_unchecked(10)),
            content: "Me too".to_owned(),
        };

        let id = client.create_comment(&credential(), &comment).await.unwrap();

        assert_eq!(id, Id::new_unchecked(99));
    }

    #[tokio::test]
    async fn rejection_carries_server_message() {
        let client = serve().await;

        let error = client
            .delete_comment(&credential(), Id::new_unchecked(10))
            .await
            .unwrap_err();

        match error {
            ApiError::Rejected { status, message } => {
                assert_eq!(status.as_u16(), 403);
                assert_eq!(message.as_deref(), Some("Not your comment"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn create_post_sends_multipart_form() {
        let client = serve().await;
        let draft = PostDraft {
            content: PostContent {
                title: "Title".to_owned(),
                description: "Brief".to_owned(),
                body: "Body".to_owned(),
            },
            image: Some(ImageUpload {
                file_name: "cat.png".to_owned(),
                mime: Some("image/png".to_owned()),
                bytes: vec![1, 2, 3],
            }),
        };

        client.create_post(&credential(), &draft).await.unwrap();
    }

    #[tokio::test]
    async fn login_returns_credential() {
        let client = serve().await;

        let credential = client
            .login(&Login {
                username: username("ada"),
                password: "correct horse".to_owned(),
            })
            .await
            .unwrap();
        assert_eq!(credential.as_str(), TOKEN);

        let error = client
            .login(&Login {
                username: username("ada"),
                password: "wrong".to_owned(),
            })
            .await
            .unwrap_err();
        assert!(matches!(error, ApiError::Rejected { message: Some(_), .. }));
    }

    #[tokio::test]
    async fn unknown_route_is_rejected_without_message() {
        let client = serve().await;

        let error = client
            .request_password_reset(&username("ada"))
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            ApiError::Rejected {
                message: None,
                ..
            }
        ));
    }

    #[test]
    fn image_url_joins_base() {
        let client = ApiClient::new("http://blog.example/", Duration::from_secs(1)).unwrap();

        assert_eq!(
            client.image_url("/uploads/a.png"),
            "http://blog.example/uploads/a.png"
        );
        assert_eq!(
            client.image_url("uploads/a.png"),
            "http://blog.example/uploads/a.png"
        );
    }
}
