//! Posts and comments loaded for the current view.
//!
//! Loads replace the local collection with what the server returned. Changes go through
//! [`ContentStore::mutate`]: the local collections are updated right away, the server is
//! asked to make the same change, and the local update is then either reconciled with the
//! server's answer or taken back out. Changes still waiting on the server are re-applied on
//! top of every load, so a reload never hides them.

use crate::session::{SessionError, SessionGuard};
use inkwell_api::{ApiError, BlogApi, StatusCode};
use inkwell_common::{
    model::{
        Id,
        auth::Credential,
        comment::{Comment, CommentMarker, NewComment},
        post::{Post, PostContent, PostDraft, PostMarker},
        user::{User, UserMarker},
    },
    thread::CommentTree,
};
use std::{
    collections::{BTreeMap, HashSet},
    fmt::{Display, Formatter},
    pin::pin,
    sync::{Mutex, MutexGuard, PoisonError},
};
use thiserror::Error;
use time::UtcDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Could not reach the server: {0}")]
    Network(#[source] ApiError),
    #[error("The server answered {0}")]
    ServerError(StatusCode),
    #[error("The server response could not be used: {0}")]
    InvalidResponse(#[source] ApiError),
    #[error("The view was closed before the server answered")]
    Discarded,
}

#[derive(Debug, Error)]
pub enum MutationError {
    #[error(transparent)]
    SessionExpired(#[from] SessionError),
    #[error("The server rejected the change with {status}: {}", .message.as_deref().unwrap_or("no message"))]
    Rejected {
        status: StatusCode,
        message: Option<String>,
    },
    #[error("Could not reach the server: {0}")]
    Network(#[source] ApiError),
    #[error("The server response could not be used: {0}")]
    InvalidResponse(#[source] ApiError),
    #[error("A change to {0} is still in flight")]
    InFlight(Entity),
    #[error("The view was closed before the server answered")]
    Discarded,
}

/// A record that at most one change may be in flight for.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum Entity {
    Post(Id<PostMarker>),
    Comment(Id<CommentMarker>),
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct ThreadEntry {
    pub comment: Comment,
    pub depth: usize,
}

/// What the view currently shows.
#[derive(Debug, Default)]
struct View {
    posts: Vec<Post>,
    thread_post: Option<Id<PostMarker>>,
    comments: Vec<Comment>,
}

#[derive(Debug, Default)]
struct State {
    view: View,
    in_flight: HashSet<Entity>,
    /// Unconfirmed changes by ticket, oldest first.
    pending: BTreeMap<u64, Change>,
    next_ticket: u64,
    placeholders: u32,
}

/// An optimistic change to the view.
///
/// `apply` records what it replaced, so `revert` only undoes the change itself and leaves
/// whatever a reload brought in since untouched.
#[derive(Debug)]
enum Change {
    Like {
        post_id: Id<PostMarker>,
        applied: bool,
    },
    EditPost {
        post_id: Id<PostMarker>,
        content: PostContent,
        previous: Option<PostContent>,
    },
    RemovePost {
        post_id: Id<PostMarker>,
        removed: Option<(usize, Post)>,
    },
    CreatePost(Post),
    RemoveComment {
        comment_id: Id<CommentMarker>,
        removed: Option<(usize, Comment)>,
    },
    CreateComment(Comment),
}

/// Registration of one [`Change`] while its server call is outstanding.
///
/// Dropping it unconfirmed reverts the change and frees the entity, which also covers the
/// caller dropping the operation's future halfway.
struct PendingChange<'s> {
    state: &'s Mutex<State>,
    ticket: u64,
    entity: Option<Entity>,
    confirmed: bool,
}

pub struct ContentStore<A> {
    api: A,
    session: SessionGuard,
    state: Mutex<State>,
    scope: CancellationToken,
}

impl Display for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::Post(id) => write!(f, "post {id}"),
            Entity::Comment(id) => write!(f, "comment {id}"),
        }
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn take<T>(items: &mut Vec<T>, matches: impl Fn(&T) -> bool) -> Option<(usize, T)> {
    let index = items.iter().position(matches)?;
    Some((index, items.remove(index)))
}

/// Puts `item` back at `index` unless a record with its key is already there.
fn reinsert<T, K: PartialEq>(items: &mut Vec<T>, index: usize, item: T, key: impl Fn(&T) -> K) {
    let item_key = key(&item);
    if !items.iter().any(|existing| key(existing) == item_key) {
        items.insert(index.min(items.len()), item);
    }
}

impl View {
    fn post_mut(&mut self, post_id: Id<PostMarker>) -> Option<&mut Post> {
        self.posts.iter_mut().find(|post| post.id == post_id)
    }
}

impl Change {
    fn touches_posts(&self) -> bool {
        matches!(
            self,
            Change::Like { .. }
                | Change::EditPost { .. }
                | Change::RemovePost { .. }
                | Change::CreatePost(_)
        )
    }

    fn apply(&mut self, view: &mut View) {
        match self {
            Change::Like { post_id, applied } => {
                *applied = match view.post_mut(*post_id) {
                    Some(post) => {
                        post.like_count = post.like_count.saturating_add(1);
                        true
                    }
                    None => false,
                };
            }
            Change::EditPost {
                post_id,
                content,
                previous,
            } => {
                *previous = view
                    .post_mut(*post_id)
                    .map(|post| std::mem::replace(&mut post.content, content.clone()));
            }
            Change::RemovePost { post_id, removed } => {
                *removed = take(&mut view.posts, |post| post.id == *post_id);
            }
            Change::CreatePost(post) => view.posts.push(post.clone()),
            Change::RemoveComment {
                comment_id,
                removed,
            } => {
                *removed = take(&mut view.comments, |comment| comment.id == *comment_id);
            }
            Change::CreateComment(comment) => {
                if view.thread_post == Some(comment.post_id) {
                    view.comments.push(comment.clone());
                }
            }
        }
    }

    fn revert(self, view: &mut View) {
        match self {
            Change::Like {
                post_id,
                applied: true,
            } => {
                if let Some(post) = view.post_mut(post_id) {
                    post.like_count = post.like_count.saturating_sub(1);
                }
            }
            Change::EditPost {
                post_id,
                previous: Some(previous),
                ..
            } => {
                if let Some(post) = view.post_mut(post_id) {
                    post.content = previous;
                }
            }
            Change::RemovePost {
                removed: Some((index, post)),
                ..
            } => reinsert(&mut view.posts, index, post, |post| post.id),
            Change::CreatePost(post) => view.posts.retain(|existing| existing.id != post.id),
            Change::RemoveComment {
                removed: Some((index, comment)),
                ..
            } => reinsert(&mut view.comments, index, comment, |comment| comment.id),
            Change::CreateComment(comment) => {
                view.comments.retain(|existing| existing.id != comment.id);
            }
            Change::Like { applied: false, .. }
            | Change::EditPost { previous: None, .. }
            | Change::RemovePost { removed: None, .. }
            | Change::RemoveComment { removed: None, .. } => {}
        }
    }
}

impl State {
    fn next_placeholder<Marker>(&mut self) -> Id<Marker> {
        let id = Id::placeholder(self.placeholders);
        self.placeholders = self.placeholders.wrapping_add(1);
        id
    }

    /// Re-applies pending changes after the post list (`posts == true`) or the comment list
    /// was replaced by a load.
    fn reapply_pending(&mut self, posts: bool) {
        let State { view, pending, .. } = self;
        for change in pending
            .values_mut()
            .filter(|change| change.touches_posts() == posts)
        {
            change.apply(view);
        }
    }
}

impl PendingChange<'_> {
    fn confirm(mut self) {
        self.confirmed = true;
    }
}

impl Drop for PendingChange<'_> {
    fn drop(&mut self) {
        let mut state = lock(self.state);
        if let Some(entity) = self.entity {
            state.in_flight.remove(&entity);
        }

        let Some(change) = state.pending.remove(&self.ticket) else {
            return;
        };
        if !self.confirmed {
            debug!(ticket = self.ticket, ?change, "Reverting unconfirmed change");
            change.revert(&mut state.view);
        }
    }
}

impl<A: BlogApi> ContentStore<A> {
    #[must_use]
    pub fn new(api: A, session: SessionGuard) -> Self {
        Self {
            api,
            session,
            state: Mutex::new(State::default()),
            scope: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn api(&self) -> &A {
        &self.api
    }

    #[must_use]
    pub fn session(&self) -> &SessionGuard {
        &self.session
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    /// Detaches the store from its view.
    ///
    /// Requests already sent still run to completion, but their responses are discarded
    /// and nothing new is sent.
    pub fn close(&self) {
        self.scope.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.scope.is_cancelled()
    }

    #[must_use]
    pub fn posts(&self) -> Vec<Post> {
        self.state().view.posts.clone()
    }

    #[must_use]
    pub fn post(&self, post_id: Id<PostMarker>) -> Option<Post> {
        self.state()
            .view
            .posts
            .iter()
            .find(|post| post.id == post_id)
            .cloned()
    }

    #[must_use]
    pub fn posts_by(&self, author: Id<UserMarker>) -> Vec<Post> {
        self.state()
            .view
            .posts
            .iter()
            .filter(|post| post.author.id == author)
            .cloned()
            .collect()
    }

    /// Posts written by the signed-in user.
    #[must_use]
    pub fn my_posts(&self) -> Vec<Post> {
        self.session
            .current_identity()
            .map(|user| self.posts_by(user.id))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn comments(&self) -> Vec<Comment> {
        self.state().view.comments.clone()
    }

    /// The post whose comments are currently loaded.
    #[must_use]
    pub fn thread_post(&self) -> Option<Id<PostMarker>> {
        self.state().view.thread_post
    }

    #[must_use]
    pub fn is_in_flight(&self, entity: Entity) -> bool {
        self.state().in_flight.contains(&entity)
    }

    /// Loaded comments in threaded render order.
    ///
    /// Subtrees with a malformed hierarchy are left out and logged.
    #[must_use]
    pub fn thread(&self) -> Vec<ThreadEntry> {
        let state = self.state();

        CommentTree::build(&state.view.comments)
            .walk()
            .filter_map(|node| match node {
                Ok(node) => Some(ThreadEntry {
                    comment: node.comment.clone(),
                    depth: node.depth,
                }),
                Err(err) => {
                    error!(error = %err, "Dropping malformed comment subtree");
                    None
                }
            })
            .collect()
    }

    /// Runs `request` unless the store is closed. A request that is already underway when
    /// the store closes is driven to completion and its output dropped.
    async fn until_closed<F: Future>(&self, request: F) -> Option<F::Output> {
        if self.scope.is_cancelled() {
            return None;
        }

        let mut request = pin!(request);
        tokio::select! {
            biased;
            () = self.scope.cancelled() => {}
            output = &mut request => return Some(output),
        }

        debug!("Store closed, discarding the response once it arrives");
        let _ = request.await;
        None
    }

    fn fetch_error(&self, err: ApiError) -> FetchError {
        match err {
            ApiError::Unauthorized => {
                self.session.force_expiry();
                FetchError::Session(SessionError::Expired)
            }
            ApiError::Rejected { status, .. } => FetchError::ServerError(status),
            err @ ApiError::Network(_) => FetchError::Network(err),
            err @ (ApiError::Decode(_) | ApiError::Data(_)) => FetchError::InvalidResponse(err),
        }
    }

    fn mutation_error(&self, err: ApiError) -> MutationError {
        match err {
            ApiError::Unauthorized => {
                self.session.force_expiry();
                MutationError::SessionExpired(SessionError::Expired)
            }
            ApiError::Rejected { status, message } => MutationError::Rejected { status, message },
            err @ ApiError::Network(_) => MutationError::Network(err),
            err @ (ApiError::Decode(_) | ApiError::Data(_)) => MutationError::InvalidResponse(err),
        }
    }

    pub async fn load_posts(&self) -> Result<Vec<Post>, FetchError> {
        self.session.require_live()?;

        let posts = self
            .until_closed(self.api.fetch_posts())
            .await
            .ok_or(FetchError::Discarded)?
            .map_err(|err| self.fetch_error(err))?;

        debug!(count = posts.len(), "Loaded posts");
        let mut state = self.state();
        state.view.posts.clone_from(&posts);
        state.reapply_pending(true);
        Ok(posts)
    }

    pub async fn load_comments(&self, post_id: Id<PostMarker>) -> Result<Vec<Comment>, FetchError> {
        self.session.require_live()?;

        let comments = self
            .until_closed(self.api.fetch_comments(post_id))
            .await
            .ok_or(FetchError::Discarded)?
            .map_err(|err| self.fetch_error(err))?;

        debug!(%post_id, count = comments.len(), "Loaded comments");
        let mut state = self.state();
        state.view.thread_post = Some(post_id);
        state.view.comments.clone_from(&comments);
        state.reapply_pending(false);
        Ok(comments)
    }

    fn begin(
        &self,
        entity: Option<Entity>,
        mut change: Change,
    ) -> Result<PendingChange<'_>, MutationError> {
        let mut state = self.state();
        if let Some(entity) = entity
            && !state.in_flight.insert(entity)
        {
            return Err(MutationError::InFlight(entity));
        }

        change.apply(&mut state.view);
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.pending.insert(ticket, change);

        Ok(PendingChange {
            state: &self.state,
            ticket,
            entity,
            confirmed: false,
        })
    }

    /// Applies the change built by `change` locally, then runs `call` against the server
    /// with a live credential.
    ///
    /// On failure, when the store is closed before the server answers, or when this future
    /// is dropped, the local change is reverted. Reconciling a successful change is up to
    /// the caller. With `entity` set, a second change to the same record fails while this
    /// one is outstanding.
    async fn mutate<T, F, Fut>(
        &self,
        entity: Option<Entity>,
        change: impl FnOnce(&User) -> Change,
        call: F,
    ) -> Result<T, MutationError>
    where
        F: FnOnce(Credential) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let session = self.session.require_live()?;
        let pending = self.begin(entity, change(&session.user))?;

        match self.until_closed(call(session.credential)).await {
            Some(Ok(value)) => {
                pending.confirm();
                Ok(value)
            }
            Some(Err(err)) => {
                drop(pending);
                Err(self.mutation_error(err))
            }
            None => {
                drop(pending);
                Err(MutationError::Discarded)
            }
        }
    }

    /// Refreshes posts after a confirmed change so server-computed fields win.
    async fn reconcile_posts(&self) {
        if let Err(err) = self.load_posts().await {
            warn!(error = %err, "Could not reload posts after a confirmed change");
        }
    }

    pub async fn like_post(&self, post_id: Id<PostMarker>) -> Result<(), MutationError> {
        let api = &self.api;
        self.mutate(
            Some(Entity::Post(post_id)),
            |_| Change::Like {
                post_id,
                applied: false,
            },
            |credential| async move { api.like_post(&credential, post_id).await },
        )
        .await?;

        self.reconcile_posts().await;
        Ok(())
    }

    pub async fn create_post(&self, draft: &PostDraft) -> Result<(), MutationError> {
        let api = &self.api;
        let placeholder = self.state().next_placeholder();

        self.mutate(
            None,
            |user| {
                Change::CreatePost(Post {
                    id: placeholder,
                    author: user.clone(),
                    content: draft.content.clone(),
                    image: None,
                    like_count: 0,
                    created_at: UtcDateTime::now(),
                })
            },
            |credential| async move { api.create_post(&credential, draft).await },
        )
        .await?;

        info!(title = %draft.content.title, "Post created");
        self.reconcile_posts().await;
        Ok(())
    }

    pub async fn edit_post(
        &self,
        post_id: Id<PostMarker>,
        draft: &PostDraft,
    ) -> Result<(), MutationError> {
        let api = &self.api;
        self.mutate(
            Some(Entity::Post(post_id)),
            |_| Change::EditPost {
                post_id,
                content: draft.content.clone(),
                previous: None,
            },
            |credential| async move { api.update_post(&credential, post_id, draft).await },
        )
        .await?;

        info!(%post_id, "Post updated");
        self.reconcile_posts().await;
        Ok(())
    }

    pub async fn delete_post(&self, post_id: Id<PostMarker>) -> Result<(), MutationError> {
        let api = &self.api;
        self.mutate(
            Some(Entity::Post(post_id)),
            |_| Change::RemovePost {
                post_id,
                removed: None,
            },
            |credential| async move { api.delete_post(&credential, post_id).await },
        )
        .await?;

        let mut state = self.state();
        if state.view.thread_post == Some(post_id) {
            state.view.thread_post = None;
            state.view.comments.clear();
        }
        info!(%post_id, "Post deleted");
        Ok(())
    }

    /// Adds a comment, or a reply when `comment.parent` is set, and returns its server id.
    ///
    /// The comment shows up in the loaded thread right away under a placeholder id, which
    /// is swapped for the server's once the comment is confirmed.
    pub async fn add_comment(
        &self,
        comment: &NewComment,
    ) -> Result<Id<CommentMarker>, MutationError> {
        let api = &self.api;
        let placeholder = self.state().next_placeholder();
        let mut optimistic = None;

        let comment_id = self
            .mutate(
                None,
                |user| {
                    let pending = Comment {
                        id: placeholder,
                        post_id: comment.post_id,
                        author: user.clone(),
                        parent: comment.parent,
                        content: comment.content.clone(),
                        created_at: UtcDateTime::now(),
                    };
                    optimistic = Some(pending.clone());
                    Change::CreateComment(pending)
                },
                |credential| async move { api.create_comment(&credential, comment).await },
            )
            .await?;

        let mut state = self.state();
        let view = &mut state.view;
        if let Some(pending) = view
            .comments
            .iter_mut()
            .find(|pending| pending.id == placeholder)
        {
            pending.id = comment_id;
        } else if let Some(mut confirmed) = optimistic
            && view.thread_post == Some(comment.post_id)
        {
            confirmed.id = comment_id;
            view.comments.push(confirmed);
        }
        drop(state);

        info!(post_id = %comment.post_id, %comment_id, "Comment added");
        Ok(comment_id)
    }

    /// Deletes a single comment. Its replies stay and are shown at the root level.
    pub async fn delete_comment(&self, comment_id: Id<CommentMarker>) -> Result<(), MutationError> {
        let api = &self.api;
        self.mutate(
            Some(Entity::Comment(comment_id)),
            |_| Change::RemoveComment {
                comment_id,
                removed: None,
            },
            |credential| async move { api.delete_comment(&credential, comment_id).await },
        )
        .await?;

        info!(%comment_id, "Comment deleted");
        Ok(())
    }
}
