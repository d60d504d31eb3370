//! Job orchestration pipeline: intake, quota enforcement, a bounded worker pool
//! dispatching to a generative-model backend, and a signed-URL gallery read path.

pub mod common;
pub mod config;
pub mod domains;
pub mod server;

pub use config::Config;
