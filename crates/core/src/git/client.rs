//! [`RepositoryGateway`] implementation that drives the `git` executable.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::gateway::{BranchInfo, MergeOptions, MergeOutcome, RepositoryGateway};
use super::parser::{
    is_already_up_to_date, is_push_noop, parse_branch_listing, parse_conflict_files,
    parse_name_list, LISTING_FORMAT,
};
use crate::config::{EngineConfig, RepositorySettings};
use crate::errors::GitError;
use crate::patterns::PatternSet;

/// Exit status and combined stdout+stderr of one git invocation.
#[derive(Debug)]
struct CommandOutput {
    success: bool,
    exit_code: i32,
    output: String,
}

/// Asynchronous git CLI client owning one repository's working copy.
#[derive(Debug)]
pub struct GitClient {
    binary: String,
    repository: String,
    remote_url: String,
    work_dir: PathBuf,
    committer_name: String,
    committer_email: String,
    /// Branch the working copy was last checked out for a merge.
    current_target: Option<String>,
}

impl GitClient {
    pub fn new(
        binary: impl Into<String>,
        repository: impl Into<String>,
        remote_url: impl Into<String>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        let client = Self {
            binary: binary.into(),
            repository: repository.into(),
            remote_url: remote_url.into(),
            work_dir: work_dir.into(),
            committer_name: "branchwatch".into(),
            committer_email: "branchwatch@localhost".into(),
            current_target: None,
        };
        info!(
            repository = %client.repository,
            work_dir = %client.work_dir.display(),
            "created GitClient"
        );
        client
    }

    /// Build a client for `repo` using the engine-wide settings.
    pub fn for_repository(engine: &EngineConfig, repo: &RepositorySettings) -> Self {
        Self::new(
            engine.git_binary.clone(),
            repo.name.clone(),
            repo.remote_url.clone(),
            engine.working_copy_path(&repo.name),
        )
        .with_committer(engine.committer_name.clone(), engine.committer_email.clone())
    }

    /// Identity recorded on automatic merge commits.
    pub fn with_committer(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.committer_name = name.into();
        self.committer_email = email.into();
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn has_working_copy(&self) -> bool {
        self.work_dir.join(".git").exists()
    }

    /// Run git in `dir`, returning the outcome whatever the exit status.
    async fn run_unchecked_in(&self, dir: &Path, args: &[&str]) -> Result<CommandOutput, GitError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(cmd = %format!("git {}", args.join(" ")), "running git command");
        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GitError::BinaryNotFound(self.binary.clone())
            } else {
                GitError::IoError(e)
            }
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(CommandOutput {
            success: output.status.success(),
            exit_code: output.status.code().unwrap_or(-1),
            output: combined,
        })
    }

    async fn run_unchecked(&self, args: &[&str]) -> Result<CommandOutput, GitError> {
        self.run_unchecked_in(&self.work_dir, args).await
    }

    /// Run git in the working copy; a non-zero exit is an error.
    async fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let out = self.run_unchecked(args).await?;
        check(args, out)
    }

    async fn merge_into_checkout(
        &mut self,
        target: &str,
        source: &str,
        options: &MergeOptions,
    ) -> Result<MergeOutcome, GitError> {
        let remote_target = format!("origin/{}", target);
        self.run(&["checkout", "-f", "-B", target, &remote_target]).await?;
        self.current_target = Some(target.to_string());

        let source_ref = match &options.source_tag {
            Some(tag) => format!("refs/tags/{}", tag),
            None => format!("origin/{}", source),
        };
        let merge = self
            .run_unchecked(&["merge", "--no-commit", "--no-ff", &source_ref])
            .await?;

        if merge.success {
            if is_already_up_to_date(&merge.output) {
                debug!(target, source = %source_ref, "already up to date");
                return Ok(MergeOutcome::NoOp);
            }
            if options.keep_changes_on_success {
                let user_name = format!("user.name={}", self.committer_name);
                let user_email = format!("user.email={}", self.committer_email);
                let message = format!("Merge {} into {}", source_ref, target);
                self.run(&[
                    "-c", &user_name, "-c", &user_email, "commit", "--no-verify", "-m", &message,
                ])
                .await?;
            }
            return Ok(MergeOutcome::Success);
        }

        let files = parse_conflict_files(&merge.output);
        if files.is_empty() {
            warn!(
                target,
                source = %source_ref,
                exit_code = merge.exit_code,
                "merge failed without reporting conflicts; treating as no-op"
            );
            return Ok(MergeOutcome::NoOp);
        }
        Ok(MergeOutcome::Conflict(files))
    }
}

fn check(args: &[&str], out: CommandOutput) -> Result<String, GitError> {
    if !out.success {
        warn!(exit_code = out.exit_code, output = %out.output.trim(), "git command failed");
        return Err(GitError::CommandFailed {
            command: format!("git {}", args.join(" ")),
            exit_code: out.exit_code,
            output: out.output,
        });
    }
    Ok(out.output)
}

#[async_trait]
impl RepositoryGateway for GitClient {
    fn repository_name(&self) -> &str {
        &self.repository
    }

    #[instrument(skip(self), fields(repository = %self.repository))]
    async fn sync_local_mirror(&mut self, default_branch: &str) -> Result<(), GitError> {
        if !self.has_working_copy() {
            let parent = self
                .work_dir
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            tokio::fs::create_dir_all(&parent).await?;
            let dest = self.work_dir.to_string_lossy().into_owned();
            let args = ["clone", "--quiet", self.remote_url.as_str(), dest.as_str()];
            let out = self.run_unchecked_in(&parent, &args).await?;
            check(&args, out)?;
            info!(work_dir = %self.work_dir.display(), "cloned repository");
        }

        self.run(&["fetch", "--prune", "--tags", "--force", "origin"]).await?;
        let remote_default = format!("origin/{}", default_branch);
        self.run(&["checkout", "-f", "-B", default_branch, &remote_default])
            .await?;
        self.run(&["clean", "-fd"]).await?;
        self.current_target = None;
        debug!(default_branch, "local mirror up to date");
        Ok(())
    }

    #[instrument(skip(self), fields(repository = %self.repository))]
    async fn list_remote_branches(&mut self) -> Result<Vec<BranchInfo>, GitError> {
        let format = format!("--format={}", LISTING_FORMAT);
        let output = self
            .run(&["for-each-ref", &format, "refs/remotes/origin"])
            .await?;
        parse_branch_listing(&self.repository, &output)
    }

    #[instrument(skip(self, options), fields(repository = %self.repository, tag = ?options.source_tag))]
    async fn attempt_merge(
        &mut self,
        target: &str,
        source: &str,
        options: &MergeOptions,
    ) -> Result<MergeOutcome, GitError> {
        let result = self.merge_into_checkout(target, source, options).await;

        let keep = options.keep_changes_on_success && matches!(result, Ok(MergeOutcome::Success));
        if !keep {
            if let Err(reset_err) = self.reset_hard(target).await {
                match &result {
                    Ok(_) => return Err(reset_err),
                    Err(merge_err) => {
                        warn!(error = %reset_err, original = %merge_err, "reset after failed merge also failed")
                    }
                }
            }
        }

        if let Ok(outcome) = &result {
            debug!(target, source, %outcome, "merge attempted");
        }
        result
    }

    #[instrument(skip(self), fields(repository = %self.repository))]
    async fn diff_files(&mut self, branch: &str, ancestor: &str) -> Result<Vec<String>, GitError> {
        let remote_branch = format!("origin/{}", branch);
        let remote_ancestor = format!("origin/{}", ancestor);
        let base = self
            .run(&["merge-base", &remote_ancestor, &remote_branch])
            .await?;
        let base = base.trim();
        let output = self
            .run(&["diff", "--name-only", base, &remote_branch])
            .await?;
        Ok(parse_name_list(&output))
    }

    #[instrument(skip(self), fields(repository = %self.repository))]
    async fn push(&mut self, target: &str, dry_run: bool) -> Result<bool, GitError> {
        if dry_run {
            info!(target, "dry run: skipping push");
            return Ok(true);
        }
        let refspec = format!("{}:refs/heads/{}", target, target);
        let output = self.run(&["push", "origin", &refspec]).await?;
        if is_push_noop(&output) {
            warn!(target, "push reported nothing to update");
            return Ok(false);
        }
        info!(target, "pushed merge");
        Ok(true)
    }

    #[instrument(skip(self), fields(repository = %self.repository))]
    async fn reset_hard(&mut self, branch: &str) -> Result<(), GitError> {
        let remote_branch = format!("origin/{}", branch);
        self.run(&["reset", "--hard", &remote_branch]).await?;
        self.run(&["clean", "-fd"]).await?;
        Ok(())
    }

    #[instrument(skip(self, pattern), fields(repository = %self.repository))]
    async fn latest_tag(&mut self, pattern: &PatternSet) -> Result<Option<String>, GitError> {
        let output = self
            .run(&["tag", "--list", "--sort=-creatordate"])
            .await?;
        let tag = parse_name_list(&output)
            .into_iter()
            .find(|tag| pattern.matches(tag));
        debug!(tag = ?tag, "resolved latest tag");
        Ok(tag)
    }

    #[instrument(skip(self), fields(repository = %self.repository))]
    async fn discard_local_changes(&mut self) -> Result<(), GitError> {
        if !self.has_working_copy() {
            return Ok(());
        }
        // Fails harmlessly when no merge is in progress.
        let _ = self.run_unchecked(&["merge", "--abort"]).await?;
        match self.current_target.clone() {
            Some(target) => self.reset_hard(&target).await?,
            None => {
                self.run(&["reset", "--hard", "HEAD"]).await?;
                self.run(&["clean", "-fd"]).await?;
            }
        }
        info!("discarded local changes");
        Ok(())
    }
}
