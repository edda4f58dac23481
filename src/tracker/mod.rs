//! Version-control inspection backed by git2.

pub mod git;

pub use git::{CommitSummary, GitTracker, PathChange, RetryPolicy};
