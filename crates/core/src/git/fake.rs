//! Scripted in-memory gateway for component tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::gateway::{BranchInfo, MergeOptions, MergeOutcome, RepositoryGateway};
use crate::errors::GitError;
use crate::patterns::PatternSet;

/// A gateway call, recorded in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Sync(String),
    List,
    Merge {
        target: String,
        source: String,
        tag: Option<String>,
        keep: bool,
    },
    Diff {
        branch: String,
        ancestor: String,
    },
    Push {
        target: String,
        dry_run: bool,
    },
    Reset(String),
    LatestTag,
    Discard,
}

#[derive(Debug, Default)]
pub struct FakeGateway {
    pub repository: String,
    pub listing_repository: Option<String>,
    pub branches: Vec<BranchInfo>,
    pub outcomes: HashMap<(String, String), MergeOutcome>,
    pub diffs: HashMap<(String, String), Vec<String>>,
    pub push_results: HashMap<String, bool>,
    /// Newest first.
    pub tags: Vec<String>,
    pub failing_merges: HashSet<(String, String)>,
    pub calls: Vec<Call>,
}

impl FakeGateway {
    pub fn new(repository: &str) -> Self {
        Self {
            repository: repository.to_string(),
            ..Default::default()
        }
    }

    pub fn with_branch(mut self, name: &str, email: &str, modified: DateTime<Utc>) -> Self {
        self.branches.push(BranchInfo {
            repository_name: String::new(),
            name: name.to_string(),
            last_modified: modified,
            author_name: email.split('@').next().unwrap_or(email).to_string(),
            author_email: email.to_string(),
        });
        self
    }

    pub fn with_outcome(mut self, target: &str, source: &str, outcome: MergeOutcome) -> Self {
        self.outcomes
            .insert((target.to_string(), source.to_string()), outcome);
        self
    }

    pub fn with_diff(mut self, branch: &str, ancestor: &str, files: &[&str]) -> Self {
        self.diffs.insert(
            (branch.to_string(), ancestor.to_string()),
            files.iter().map(|f| f.to_string()).collect(),
        );
        self
    }

    pub fn remove_branch(&mut self, name: &str) {
        self.branches.retain(|b| b.name != name);
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn merges(&self) -> Vec<(String, String)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Merge { target, source, .. } => Some((target.clone(), source.clone())),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl RepositoryGateway for FakeGateway {
    fn repository_name(&self) -> &str {
        &self.repository
    }

    async fn sync_local_mirror(&mut self, default_branch: &str) -> Result<(), GitError> {
        self.calls.push(Call::Sync(default_branch.to_string()));
        Ok(())
    }

    async fn list_remote_branches(&mut self) -> Result<Vec<BranchInfo>, GitError> {
        self.calls.push(Call::List);
        let reported = self
            .listing_repository
            .clone()
            .unwrap_or_else(|| self.repository.clone());
        Ok(self
            .branches
            .iter()
            .cloned()
            .map(|mut b| {
                b.repository_name = reported.clone();
                b
            })
            .collect())
    }

    async fn attempt_merge(
        &mut self,
        target: &str,
        source: &str,
        options: &MergeOptions,
    ) -> Result<MergeOutcome, GitError> {
        self.calls.push(Call::Merge {
            target: target.to_string(),
            source: source.to_string(),
            tag: options.source_tag.clone(),
            keep: options.keep_changes_on_success,
        });
        let key = (target.to_string(), source.to_string());
        if self.failing_merges.contains(&key) {
            return Err(GitError::CommandFailed {
                command: format!("git merge origin/{}", source),
                exit_code: 128,
                output: "fatal: simulated failure".into(),
            });
        }
        Ok(self.outcomes.get(&key).cloned().unwrap_or(MergeOutcome::NoOp))
    }

    async fn diff_files(&mut self, branch: &str, ancestor: &str) -> Result<Vec<String>, GitError> {
        self.calls.push(Call::Diff {
            branch: branch.to_string(),
            ancestor: ancestor.to_string(),
        });
        Ok(self
            .diffs
            .get(&(branch.to_string(), ancestor.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn push(&mut self, target: &str, dry_run: bool) -> Result<bool, GitError> {
        self.calls.push(Call::Push {
            target: target.to_string(),
            dry_run,
        });
        Ok(self.push_results.get(target).copied().unwrap_or(true))
    }

    async fn reset_hard(&mut self, branch: &str) -> Result<(), GitError> {
        self.calls.push(Call::Reset(branch.to_string()));
        Ok(())
    }

    async fn latest_tag(&mut self, pattern: &PatternSet) -> Result<Option<String>, GitError> {
        self.calls.push(Call::LatestTag);
        Ok(self.tags.iter().find(|t| pattern.matches(t)).cloned())
    }

    async fn discard_local_changes(&mut self) -> Result<(), GitError> {
        self.calls.push(Call::Discard);
        Ok(())
    }
}
