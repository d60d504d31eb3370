//! Typed ID definitions for domain entities.
//!
//! # Example
//!
//! ```rust
//! use server_core::common::JobId;
//!
//! let job_id = JobId::new();
//! let other = JobId::new();
//! assert_ne!(job_id, other);
//! ```

// Re-export the core Id type and version markers.
pub use super::id::{Id, V4, V7};

/// Marker type for Job entities.
pub struct Job;

/// Typed ID for Job entities. Assigned at intake with UUIDv4-grade uniqueness.
pub type JobId = Id<Job, V4>;
