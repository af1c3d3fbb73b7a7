use clap::{Parser, Subcommand};
use inkwell_common::model::{Id, comment::CommentMarker, post::PostMarker};
use std::{
    fmt::{Debug, Formatter},
    path::PathBuf,
};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Read and write on an inkwell blog", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create an account
    Signup(Credentials),
    /// Log in and remember the session
    Login(Credentials),
    /// Forget the stored session
    Logout,
    /// Show who is logged in
    Whoami,
    /// List posts
    Posts {
        /// Only posts written by you
        #[arg(long)]
        mine: bool,
    },
    /// Show a post with its comment thread
    Show { post: Id<PostMarker> },
    /// Like a post
    Like { post: Id<PostMarker> },
    /// Comment on a post, or reply to a comment
    Comment {
        post: Id<PostMarker>,
        /// Comment to reply to
        #[arg(long)]
        parent: Option<Id<CommentMarker>>,
        text: String,
    },
    /// Delete one of your comments
    DeleteComment {
        post: Id<PostMarker>,
        comment: Id<CommentMarker>,
    },
    /// Publish a new post
    CreatePost(PostArgs),
    /// Replace the contents of one of your posts
    EditPost {
        post: Id<PostMarker>,
        #[command(flatten)]
        contents: PostArgs,
    },
    /// Delete one of your posts
    DeletePost { post: Id<PostMarker> },
    /// Ask for a password reset code
    ResetRequest { username: String },
    /// Set a new password using a reset code
    ResetVerify(ResetArgs),
}

#[derive(clap::Args, Clone)]
pub struct Credentials {
    pub username: String,

    #[arg(long, env = "INKWELL_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(clap::Args, Clone)]
pub struct ResetArgs {
    pub username: String,

    /// Code from the reset message
    pub code: String,

    #[arg(long, env = "INKWELL_NEW_PASSWORD", hide_env_values = true)]
    pub new_password: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct PostArgs {
    #[arg(long)]
    pub title: String,

    #[arg(long, default_value = "")]
    pub description: String,

    /// Post body
    #[arg(long, default_value = "")]
    pub body: String,

    /// Image file to attach
    #[arg(long)]
    pub image: Option<PathBuf>,
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .finish()
    }
}

impl Debug for ResetArgs {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetArgs")
            .field("username", &self.username)
            .field("code", &"[redacted]")
            .field("new_password", &"[redacted]")
            .finish()
    }
}
