pub mod auth;
pub mod jobs;
