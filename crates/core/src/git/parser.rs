//! Parsers for the text output of the `git` commands driven by
//! [`GitClient`](super::client::GitClient).

use chrono::{DateTime, Utc};
use tracing::debug;

use super::gateway::BranchInfo;
use crate::errors::GitError;
use crate::models::normalize_files;

/// Field delimiter of the branch listing format.
pub const LISTING_DELIMITER: char = '~';

/// `for-each-ref` format producing `name~date~author~<email>` lines.
pub const LISTING_FORMAT: &str =
    "%(refname)~%(authordate:iso8601-strict)~%(authorname)~%(authoremail)";

/// Phrases git writes directly after the path in non-content conflicts.
const PATH_TERMINATORS: &[&str] = &[" deleted in ", " renamed to "];

const REMOTE_PREFIXES: &[&str] = &["refs/remotes/origin/", "origin/"];

/// Parse the output of `git for-each-ref --format=LISTING_FORMAT`.
///
/// Any record that does not have four fields or a valid date fails the
/// whole listing; the symbolic `HEAD` ref is skipped.
pub fn parse_branch_listing(repository: &str, output: &str) -> Result<Vec<BranchInfo>, GitError> {
    let mut branches = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(LISTING_DELIMITER).collect();
        if fields.len() < 4 {
            return Err(GitError::ParseError {
                line: line.to_string(),
                detail: format!("expected 4 fields, found {}", fields.len()),
            });
        }

        let refname = fields[0];
        let name = REMOTE_PREFIXES
            .iter()
            .find_map(|prefix| refname.strip_prefix(prefix))
            .unwrap_or(refname);
        if name == "HEAD" || name.is_empty() {
            continue;
        }

        let last_modified = DateTime::parse_from_rfc3339(fields[1].trim())
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| GitError::ParseError {
                line: line.to_string(),
                detail: format!("invalid date '{}': {}", fields[1], e),
            })?;

        // Author names may themselves contain the delimiter; email is last.
        let email_field = fields[fields.len() - 1];
        let author_name = fields[2..fields.len() - 1].join("~");
        let author_email = email_field
            .trim()
            .trim_start_matches('<')
            .trim_end_matches('>')
            .to_string();

        branches.push(BranchInfo {
            repository_name: repository.to_string(),
            name: name.to_string(),
            last_modified,
            author_name,
            author_email,
        });
    }

    debug!(count = branches.len(), "parsed branch listing");
    Ok(branches)
}

/// Extract the conflicting paths from the output of a failed merge.
///
/// Recognises lines such as
/// `CONFLICT (content): Merge conflict in src/lib.rs`,
/// `CONFLICT (modify/delete): src/old.rs deleted in HEAD and modified in ...` and
/// `CONFLICT (rename/delete): src/a.rs renamed to src/b.rs in HEAD, but deleted in ...`.
/// For renames the original path is reported.
pub fn parse_conflict_files(output: &str) -> Vec<String> {
    let files = output.lines().filter_map(|line| {
        let rest = line.trim().strip_prefix("CONFLICT")?;
        let rest = match rest.trim_start().strip_prefix('(') {
            Some(typed) => typed.split_once("):").map(|(_, path)| path)?,
            None => rest.trim_start_matches(':'),
        };
        let rest = rest.trim();
        let rest = rest.strip_prefix("Merge conflict in ").unwrap_or(rest);
        // The path ends at whichever description follows it first.
        let end = PATH_TERMINATORS
            .iter()
            .filter_map(|marker| rest.find(marker))
            .min()
            .unwrap_or(rest.len());
        let path = &rest[..end];
        let path = path.trim();
        (!path.is_empty()).then(|| path.to_string())
    });
    normalize_files(files)
}

/// `true` when merge output says there was nothing to merge.
pub fn is_already_up_to_date(output: &str) -> bool {
    output.contains("Already up to date") || output.contains("Already up-to-date")
}

/// `true` when push output says the remote did not change.
pub fn is_push_noop(output: &str) -> bool {
    output.contains("Everything up-to-date")
}

/// Non-empty trimmed lines, e.g. from `--name-only` or `tag --list`.
pub fn parse_name_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}
