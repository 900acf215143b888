//! End-to-end tests against real git repositories.
//!
//! Each test builds a bare "origin" repository in a temp directory, seeds
//! it from a scratch clone, and points a [`GitClient`] at it over a plain
//! filesystem path. No network I/O.
//!
//! Tests skip gracefully if `git` is not installed.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;

use branchwatch_core::config::{AppConfig, RepositorySettings};
use branchwatch_core::db::{ConflictFilter, Database, MergeFilter};
use branchwatch_core::engine::{BranchEngine, RunMode, RunOutcome};
use branchwatch_core::git::{GitClient, MergeOptions, MergeOutcome, RepositoryGateway};
use branchwatch_core::patterns::PatternSet;

const REPO: &str = "acme/widgets";

// ===========================================================================
// Helpers
// ===========================================================================

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn git_env(dir: &Path, args: &[&str], env: &[(&str, &str)]) -> String {
    let output = Command::new("git")
        .args(["-c", "commit.gpgsign=false", "-c", "tag.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Dev Eloper")
        .env("GIT_AUTHOR_EMAIL", "dev@example.com")
        .env("GIT_COMMITTER_NAME", "Dev Eloper")
        .env("GIT_COMMITTER_EMAIL", "dev@example.com")
        .envs(env.iter().copied())
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn git(dir: &Path, args: &[&str]) -> String {
    git_env(dir, args, &[])
}

fn commit_file(dir: &Path, file: &str, contents: &str, message: &str) {
    std::fs::write(dir.join(file), contents).unwrap();
    git(dir, &["add", file]);
    git(dir, &["commit", "-q", "-m", message]);
}

/// An origin with this history:
///
/// ```text
/// main:          base (v1) -- main-change (v2, nightly)
/// feature/one:   base -- shared.txt = one
/// feature/two:   base -- shared.txt = two
/// feature/three: base -- adds three.txt
/// ```
///
/// `main-change` rewrites `shared.txt` and adds `main.txt`, so main, one
/// and two conflict pairwise while three merges cleanly with everything.
struct Fixture {
    _dir: TempDir,
    origin: PathBuf,
    data_dir: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let origin = dir.path().join("origin.git");
        let seed = dir.path().join("seed");
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&origin).unwrap();
        std::fs::create_dir_all(&seed).unwrap();

        git(&origin, &["init", "-q", "--bare"]);
        git(&origin, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        git(&seed, &["init", "-q"]);
        git(&seed, &["checkout", "-q", "-b", "main"]);
        commit_file(&seed, "shared.txt", "base\n", "base");
        git_env(
            &seed,
            &["tag", "-a", "v1", "-m", "v1"],
            &[("GIT_COMMITTER_DATE", "2024-01-01T00:00:00Z")],
        );

        for (branch, file, contents) in [
            ("feature/one", "shared.txt", "one\n"),
            ("feature/two", "shared.txt", "two\n"),
            ("feature/three", "three.txt", "three\n"),
        ] {
            git(&seed, &["checkout", "-q", "-b", branch, "main"]);
            commit_file(&seed, file, contents, branch);
        }

        git(&seed, &["checkout", "-q", "main"]);
        std::fs::write(seed.join("main.txt"), "main\n").unwrap();
        commit_file(&seed, "shared.txt", "main\n", "main-change");
        git_env(
            &seed,
            &["tag", "-a", "v2", "-m", "v2"],
            &[("GIT_COMMITTER_DATE", "2024-02-01T00:00:00Z")],
        );
        git_env(
            &seed,
            &["tag", "-a", "nightly", "-m", "nightly"],
            &[("GIT_COMMITTER_DATE", "2024-03-01T00:00:00Z")],
        );

        let origin_url = origin.to_string_lossy().into_owned();
        git(&seed, &["remote", "add", "origin", &origin_url]);
        git(&seed, &["push", "-q", "origin", "--all"]);
        git(&seed, &["push", "-q", "origin", "--tags"]);

        Self {
            _dir: dir,
            origin,
            data_dir,
        }
    }

    fn client(&self) -> GitClient {
        GitClient::new(
            "git",
            REPO,
            self.origin.to_string_lossy(),
            self.data_dir.join("wc"),
        )
    }

    fn settings(&self, auto_merge: bool) -> RepositorySettings {
        let mut toml = format!(
            r#"
[engine]
data_dir = "{}"

[[repositories]]
name = "{}"
remote_url = "{}"
default_branch = "main"
"#,
            self.data_dir.display(),
            REPO,
            self.origin.display()
        );
        if auto_merge {
            toml.push_str("\n[repositories.auto_merge]\nsource_branch = \"main\"\n");
        }
        let config: AppConfig = toml::from_str(&toml).unwrap();
        config.validate().unwrap().remove(0)
    }

    fn origin_tip(&self, branch: &str) -> git2::Oid {
        let repo = git2::Repository::open_bare(&self.origin).unwrap();
        let reference = repo
            .find_branch(branch, git2::BranchType::Local)
            .unwrap()
            .into_reference();
        reference.target().unwrap()
    }
}

/// Skip the test body when git is not installed.
macro_rules! require_git {
    () => {
        if !git_available() {
            eprintln!("skipping: git not installed");
            return;
        }
    };
}

/// Assert the working copy is on `branch`, matches its remote head exactly
/// and has no merge in progress.
fn assert_clean_checkout(work_dir: &Path, branch: &str) {
    let repo = git2::Repository::open(work_dir).unwrap();
    assert_eq!(repo.state(), git2::RepositoryState::Clean);

    let head = repo.head().unwrap();
    assert_eq!(head.shorthand(), Some(branch));
    let remote = repo
        .find_reference(&format!("refs/remotes/origin/{}", branch))
        .unwrap();
    assert_eq!(head.target(), remote.target());

    let mut opts = git2::StatusOptions::new();
    opts.include_untracked(true);
    assert!(repo.statuses(Some(&mut opts)).unwrap().is_empty());
}

// ===========================================================================
// Gateway
// ===========================================================================

#[tokio::test]
async fn test_listing_reports_every_remote_branch() {
    require_git!();
    let fx = Fixture::new();
    let mut client = fx.client();

    client.sync_local_mirror("main").await.unwrap();
    let mut listing = client.list_remote_branches().await.unwrap();
    listing.sort_by(|a, b| a.name.cmp(&b.name));

    let names: Vec<&str> = listing.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["feature/one", "feature/three", "feature/two", "main"]
    );
    for branch in &listing {
        assert_eq!(branch.repository_name, REPO);
        assert_eq!(branch.author_name, "Dev Eloper");
        assert_eq!(branch.author_email, "dev@example.com");
    }

    // A second sync reuses the existing working copy.
    client.sync_local_mirror("main").await.unwrap();
    assert_clean_checkout(client.work_dir(), "main");
}

#[tokio::test]
async fn test_conflicting_merge_reports_files_and_resets() {
    require_git!();
    let fx = Fixture::new();
    let mut client = fx.client();
    client.sync_local_mirror("main").await.unwrap();

    let outcome = client
        .attempt_merge("feature/two", "feature/one", &MergeOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome, MergeOutcome::Conflict(vec!["shared.txt".into()]));
    assert_clean_checkout(client.work_dir(), "feature/two");

    // Keeping changes has no effect on a conflict.
    let keep = MergeOptions {
        keep_changes_on_success: true,
        ..MergeOptions::default()
    };
    let outcome = client
        .attempt_merge("feature/one", "main", &keep)
        .await
        .unwrap();
    assert!(outcome.conflicting_files().is_some());
    assert_clean_checkout(client.work_dir(), "feature/one");
}

#[tokio::test]
async fn test_clean_merge_is_simulated_without_keeping() {
    require_git!();
    let fx = Fixture::new();
    let mut client = fx.client();
    client.sync_local_mirror("main").await.unwrap();

    let outcome = client
        .attempt_merge("feature/three", "feature/one", &MergeOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome, MergeOutcome::Success);
    assert_clean_checkout(client.work_dir(), "feature/three");
}

#[tokio::test]
async fn test_merging_an_ancestor_tag_is_noop() {
    require_git!();
    let fx = Fixture::new();
    let mut client = fx.client();
    client.sync_local_mirror("main").await.unwrap();

    let options = MergeOptions {
        source_tag: Some("v1".into()),
        keep_changes_on_success: true,
    };
    let outcome = client
        .attempt_merge("feature/one", "main", &options)
        .await
        .unwrap();
    assert_eq!(outcome, MergeOutcome::NoOp);
    assert_clean_checkout(client.work_dir(), "feature/one");
}

#[tokio::test]
async fn test_kept_merge_is_pushed_once() {
    require_git!();
    let fx = Fixture::new();
    let mut client = fx.client().with_committer("Merge Bot", "bot@example.com");
    client.sync_local_mirror("main").await.unwrap();
    let before = fx.origin_tip("feature/three");

    let keep = MergeOptions {
        keep_changes_on_success: true,
        ..MergeOptions::default()
    };
    let outcome = client
        .attempt_merge("feature/three", "main", &keep)
        .await
        .unwrap();
    assert_eq!(outcome, MergeOutcome::Success);

    assert!(client.push("feature/three", true).await.unwrap());
    assert_eq!(fx.origin_tip("feature/three"), before);

    assert!(client.push("feature/three", false).await.unwrap());
    let origin = git2::Repository::open_bare(&fx.origin).unwrap();
    let tip = origin.find_commit(fx.origin_tip("feature/three")).unwrap();
    assert_eq!(tip.parent_count(), 2);
    assert_eq!(tip.committer().email(), Some("bot@example.com"));
    assert!(tip.tree().unwrap().get_name("main.txt").is_some());
    assert!(tip.tree().unwrap().get_name("three.txt").is_some());

    // Nothing left to push.
    assert!(!client.push("feature/three", false).await.unwrap());
}

#[tokio::test]
async fn test_diff_files_and_latest_tag() {
    require_git!();
    let fx = Fixture::new();
    let mut client = fx.client();
    client.sync_local_mirror("main").await.unwrap();

    let diff = client.diff_files("feature/one", "main").await.unwrap();
    assert_eq!(diff, vec!["shared.txt".to_string()]);
    let diff = client.diff_files("feature/three", "main").await.unwrap();
    assert_eq!(diff, vec!["three.txt".to_string()]);

    let pattern = PatternSet::compile("tags", &["^v[0-9]+$"]).unwrap();
    assert_eq!(
        client.latest_tag(&pattern).await.unwrap().as_deref(),
        Some("v2")
    );
    let none = PatternSet::compile("tags", &["^release-"]).unwrap();
    assert_eq!(client.latest_tag(&none).await.unwrap(), None);
}

#[tokio::test]
async fn test_discard_recovers_from_interrupted_merge() {
    require_git!();
    let fx = Fixture::new();
    let mut client = fx.client();
    client.sync_local_mirror("main").await.unwrap();

    // Leave a half-finished merge behind, as an interrupted run would.
    git(client.work_dir(), &["checkout", "-q", "-B", "feature/two", "origin/feature/two"]);
    let status = Command::new("git")
        .args(["merge", "--no-commit", "--no-ff", "origin/feature/one"])
        .current_dir(client.work_dir())
        .output()
        .unwrap();
    assert!(!status.status.success());
    std::fs::write(client.work_dir().join("stray.txt"), "x").unwrap();

    client.discard_local_changes().await.unwrap();
    let repo = git2::Repository::open(client.work_dir()).unwrap();
    assert_eq!(repo.state(), git2::RepositoryState::Clean);
    assert!(!client.work_dir().join("stray.txt").exists());
}

// ===========================================================================
// Engine
// ===========================================================================

#[tokio::test]
async fn test_detect_then_merge_against_real_repository() {
    require_git!();
    let fx = Fixture::new();
    let db = Arc::new(Database::in_memory().unwrap());
    db.initialize().unwrap();
    let settings = Arc::new(fx.settings(true));

    let engine = BranchEngine::new(db.clone(), settings.clone(), fx.client());
    let report = engine.run(RunMode::Detect, false).await.unwrap();
    assert_eq!(report.branches, 4);
    let detection = match report.outcome {
        RunOutcome::Detect(d) => d,
        other => panic!("expected detection report, got {:?}", other),
    };
    assert_eq!(detection.pairs_checked, 6);
    assert_eq!(detection.created, 3);

    let repo = db.get_repository(REPO).unwrap().unwrap();
    let conflicts = db
        .list_conflicts(&ConflictFilter::new(repo.id, false), chrono::Utc::now())
        .unwrap();
    assert_eq!(conflicts.len(), 3);
    assert!(conflicts
        .iter()
        .all(|c| c.conflicting_files == vec!["shared.txt".to_string()]));

    // Everything is tested now; a second detection probes nothing.
    let again = engine.run(RunMode::Detect, false).await.unwrap();
    match again.outcome {
        RunOutcome::Detect(d) => assert_eq!(d.pairs_checked, 0),
        other => panic!("expected detection report, got {:?}", other),
    }

    let report = engine.run(RunMode::Merge, false).await.unwrap();
    let merge = match report.outcome {
        RunOutcome::Merge(m) => m,
        other => panic!("expected merge report, got {:?}", other),
    };
    assert_eq!(merge.attempted, 3);
    assert_eq!(merge.merged, vec!["feature/three".to_string()]);
    let mut conflicted = merge.conflicted.clone();
    conflicted.sort();
    assert_eq!(conflicted, vec!["feature/one", "feature/two"]);

    let merges = db
        .list_merges(&MergeFilter {
            repository_id: repo.id,
            ..MergeFilter::default()
        })
        .unwrap();
    assert_eq!(merges.len(), 3);
    assert_eq!(merges.iter().filter(|m| m.successful).count(), 1);

    let origin = git2::Repository::open_bare(&fx.origin).unwrap();
    let tip = origin.find_commit(fx.origin_tip("feature/three")).unwrap();
    assert!(tip.tree().unwrap().get_name("main.txt").is_some());
}
