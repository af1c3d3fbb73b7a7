pub mod client;
mod record;

pub use client::{ApiClient, ApiError, BlogApi};
pub use reqwest::StatusCode;
