mod cli;

use clap::Parser;
use cli::{Args, Command, Credentials, PostArgs, ResetArgs};
use inkwell_api::{ApiClient, ApiError, BlogApi};
use inkwell_app::{
    session::{FileCredentialStore, SessionGuard, SignInError, StorageError},
    store::{ContentStore, FetchError, MutationError},
};
use inkwell_common::model::{
    Id,
    comment::{CommentMarker, NewComment},
    post::{ImageUpload, Post, PostContent, PostDraft, PostMarker},
    user::{InvalidUsernameError, Login, PasswordReset, Username},
};
use serde::Deserialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
enum AppError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("No place to store the session, set INKWELL_CREDENTIAL_PATH")]
    NoCredentialPath,
    #[error(transparent)]
    Username(#[from] InvalidUsernameError),
    #[error("Could not read image {}: {source}", .path.display())]
    Image { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    SignIn(#[from] SignInError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Mutation(#[from] MutationError),
    #[error("Post {0} does not exist")]
    UnknownPost(Id<PostMarker>),
    #[error("Comment {0} does not exist")]
    UnknownComment(Id<CommentMarker>),
    #[error("You did not write {0}")]
    NotOwner(String),
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    api_base_url: String,
    credential_path: Option<PathBuf>,
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,
}

type Store = ContentStore<ApiClient>;

fn default_request_timeout_secs() -> u64 {
    30
}

impl AppError {
    fn is_session(&self) -> bool {
        matches!(
            self,
            AppError::Fetch(FetchError::Session(_))
                | AppError::Mutation(MutationError::SessionExpired(_))
        )
    }
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "inkwell_app=info,inkwell_api=info,inkwell_common=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn get_env() -> Result<Env, AppError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .dotenv file found");
        } else {
            return Err(e.into());
        }
    }

    envy::prefixed("INKWELL_")
        .from_env()
        .map_err(AppError::from)
}

fn login(credentials: Credentials) -> Result<Login, AppError> {
    Ok(Login {
        username: Username::new(credentials.username)?,
        password: credentials.password,
    })
}

fn guess_mime(path: &Path) -> Option<String> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => return None,
    };
    Some(mime.to_owned())
}

fn read_draft(args: PostArgs) -> Result<PostDraft, AppError> {
    let image = match args.image {
        Some(path) => {
            let bytes = fs::read(&path).map_err(|source| AppError::Image {
                path: path.clone(),
                source,
            })?;
            let file_name = path
                .file_name()
                .map_or_else(|| "image".to_owned(), |name| name.to_string_lossy().into_owned());

            Some(ImageUpload {
                mime: guess_mime(&path),
                file_name,
                bytes,
            })
        }
        None => None,
    };

    Ok(PostDraft {
        content: PostContent {
            title: args.title,
            description: args.description,
            body: args.body,
        },
        image,
    })
}

fn print_summary(post: &Post) {
    println!(
        "#{} {} by {} ({} likes)",
        post.id, post.content.title, post.author.username, post.like_count
    );
}

/// Loads posts and returns the one named, if it is the signed-in user's.
async fn own_post(store: &Store, post_id: Id<PostMarker>) -> Result<Post, AppError> {
    store.load_posts().await?;
    let post = store.post(post_id).ok_or(AppError::UnknownPost(post_id))?;

    if store.session().owns(post.author.id) {
        Ok(post)
    } else {
        Err(AppError::NotOwner(format!("post {post_id}")))
    }
}

async fn show(store: &Store, post_id: Id<PostMarker>) -> Result<(), AppError> {
    store.load_posts().await?;
    let post = store.post(post_id).ok_or(AppError::UnknownPost(post_id))?;
    store.load_comments(post_id).await?;

    print_summary(&post);
    println!("posted on {}", post.created_at.date());
    if !post.content.description.is_empty() {
        println!("{}", post.content.description);
    }
    if let Some(image) = &post.image {
        println!("image: {}", store.api().image_url(image));
    }
    println!();
    println!("{}", post.content.body);
    println!();

    let thread = store.thread();
    println!("{} comments", thread.len());
    for entry in thread {
        println!(
            "{}[{}] {}: {}",
            "  ".repeat(entry.depth),
            entry.comment.id,
            entry.comment.author.username,
            entry.comment.content
        );
    }

    Ok(())
}

async fn run(store: &Store, command: Command) -> Result<(), AppError> {
    let session = store.session();

    match command {
        Command::Signup(credentials) => {
            let login = login(credentials)?;
            store.api().signup(&login).await?;
            println!("Account {} created, log in to continue", login.username);
        }
        Command::Login(credentials) => {
            let credential = store.api().login(&login(credentials)?).await?;
            let user = session.sign_in(&credential)?;
            println!("Logged in as {}", user.username);
        }
        Command::Logout => {
            session.sign_out()?;
            println!("Logged out");
        }
        Command::Whoami => {
            let live = session.require_live().map_err(FetchError::from)?;
            println!(
                "{} (user {}), session valid until {} {} UTC",
                live.user.username,
                live.user.id,
                live.expires_at.date(),
                live.expires_at.time()
            );
        }
        Command::Posts { mine } => {
            store.load_posts().await?;
            let posts = if mine { store.my_posts() } else { store.posts() };
            for post in &posts {
                print_summary(post);
            }
        }
        Command::Show { post } => show(store, post).await?,
        Command::Like { post } => {
            store.load_posts().await?;
            if store.post(post).is_none() {
                return Err(AppError::UnknownPost(post));
            }
            store.like_post(post).await?;
            if let Some(post) = store.post(post) {
                print_summary(&post);
            }
        }
        Command::Comment { post, parent, text } => {
            store.load_comments(post).await?;
            let comment_id = store
                .add_comment(&NewComment {
                    post_id: post,
                    parent,
                    content: text,
                })
                .await?;
            println!("Comment {comment_id} added");
        }
        Command::DeleteComment { post, comment } => {
            store.load_comments(post).await?;
            let existing = store
                .comments()
                .into_iter()
                .find(|existing| existing.id == comment)
                .ok_or(AppError::UnknownComment(comment))?;
            if !session.owns(existing.author.id) {
                return Err(AppError::NotOwner(format!("comment {comment}")));
            }

            store.delete_comment(comment).await?;
            println!("Comment {comment} deleted");
        }
        Command::CreatePost(args) => {
            let draft = read_draft(args)?;
            store.load_posts().await?;
            store.create_post(&draft).await?;
            println!("Post published");
        }
        Command::EditPost { post, contents } => {
            let draft = read_draft(contents)?;
            own_post(store, post).await?;
            store.edit_post(post, &draft).await?;
            println!("Post {post} updated");
        }
        Command::DeletePost { post } => {
            own_post(store, post).await?;
            store.delete_post(post).await?;
            println!("Post {post} deleted");
        }
        Command::ResetRequest { username } => {
            store
                .api()
                .request_password_reset(&Username::new(username)?)
                .await?;
            println!("If the account exists, a reset code is on its way");
        }
        Command::ResetVerify(ResetArgs {
            username,
            code,
            new_password,
        }) => {
            let reset = PasswordReset {
                username: Username::new(username)?,
                code,
                new_password,
            };
            store.api().verify_password_reset(&reset).await?;
            println!("Password changed, log in with the new one");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode, AppError> {
    install_tracing();
    let args = Args::parse();
    let env = get_env()?;

    let credential_path = env
        .credential_path
        .or_else(FileCredentialStore::default_path)
        .ok_or(AppError::NoCredentialPath)?;
    debug!(path = %credential_path.display(), "Using credential file");

    let session = SessionGuard::new(Arc::new(FileCredentialStore::new(credential_path)));
    let api = ApiClient::new(
        &env.api_base_url,
        Duration::from_secs(env.request_timeout_secs),
    )?;
    let store = Arc::new(ContentStore::new(api, session));

    tokio::spawn({
        let store = store.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, discarding pending responses");
                store.close();
            }
        }
    });

    match run(&store, args.command).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) if err.is_session() => {
            eprintln!("{err}. Please log in with `inkwell login <username>`.");
            Ok(ExitCode::FAILURE)
        }
        Err(err) => Err(err),
    }
}
