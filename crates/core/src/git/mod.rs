//! Version-control access for branchwatch.

pub mod client;
#[cfg(test)]
pub(crate) mod fake;
pub mod gateway;
pub mod parser;

pub use client::GitClient;
pub use gateway::{BranchInfo, MergeOptions, MergeOutcome, RepositoryGateway};
