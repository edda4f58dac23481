use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use git2::{ErrorCode, Repository, Sort};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded exponential backoff for lock contention (`index.lock`, ref locks).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Policy whose total sleep stays within `budget`.
    pub fn within(budget: Duration) -> Self {
        let mut policy = Self::default();
        while policy.max_attempts > 1 && policy.total_delay() > budget {
            policy.max_attempts -= 1;
        }
        policy
    }

    fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn total_delay(&self) -> Duration {
        (1..self.max_attempts).map(|a| self.delay(a)).sum()
    }
}

/// One entry of `git log`.
#[derive(Debug, Clone, Serialize)]
pub struct CommitSummary {
    pub sha: String,
    pub summary: String,
    pub time: DateTime<Utc>,
}

/// A tracked file touched by a commit after some point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathChange {
    pub path: PathBuf,
    pub commit: String,
}

pub struct GitTracker {
    repo: Repository,
    retry: RetryPolicy,
}

impl GitTracker {
    pub fn new(project_dir: &Path) -> Result<Self> {
        let repo = Repository::open(project_dir).context("Failed to open git repository")?;
        Ok(Self {
            repo,
            retry: RetryPolicy::default(),
        })
    }

    /// Open the repository containing `project_dir`, or `None` when there is none.
    pub fn discover(project_dir: &Path) -> Option<Self> {
        Repository::discover(project_dir).ok().map(|repo| Self {
            repo,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run `op`, retrying while the repository reports lock contention.
    fn retrying<T>(&self, what: &str, mut op: impl FnMut() -> Result<T, git2::Error>) -> Result<T> {
        retry_locked(&self.retry, what, &mut op)
    }

    /// Get the HEAD commit if it exists (returns None for unborn branches)
    fn get_head_commit(&self) -> Option<git2::Commit<'_>> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
    }

    /// Get current HEAD SHA (returns None for unborn branches)
    pub fn head_sha(&self) -> Option<String> {
        self.get_head_commit().map(|c| c.id().to_string())
    }

    /// Whether `sha` (full or abbreviated) names a commit in this repository.
    pub fn commit_exists(&self, sha: &str) -> Result<bool> {
        let sha = sha.trim();
        if sha.is_empty() || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(false);
        }
        let found = self.retrying("revparse", || match self.repo.revparse_single(sha) {
            Ok(obj) => Ok(obj.peel_to_commit().is_ok()),
            Err(e) if matches!(e.code(), ErrorCode::NotFound | ErrorCode::Ambiguous) => Ok(false),
            Err(e) => Err(e),
        })?;
        Ok(found)
    }

    /// `path` relative to the repository's working directory, if it lies inside it.
    pub fn repo_relative(&self, path: &Path) -> Option<PathBuf> {
        let workdir = self.repo.workdir()?.canonicalize().ok()?;
        let full = path.canonicalize().ok()?;
        full.strip_prefix(&workdir).ok().map(Path::to_path_buf)
    }

    pub fn has_remote(&self, name: &str) -> bool {
        self.repo.find_remote(name).is_ok()
    }

    /// Whether any remote-tracking branch of `remote` contains `sha`.
    ///
    /// Uses the local remote-tracking refs only; nothing is fetched.
    pub fn remote_contains(&self, remote: &str, sha: &str) -> Result<bool> {
        let oid = self
            .repo
            .revparse_single(sha)
            .and_then(|o| o.peel_to_commit())
            .map(|c| c.id())
            .with_context(|| format!("Unknown commit {}", sha))?;

        let prefix = format!("refs/remotes/{}/", remote);
        let refs = self.retrying("list references", || self.repo.references())?;
        for reference in refs.flatten() {
            let Some(name) = reference.name() else {
                continue;
            };
            if !name.starts_with(&prefix) {
                continue;
            }
            let Some(tip) = reference.target() else {
                continue;
            };
            if tip == oid || self.repo.graph_descendant_of(tip, oid).unwrap_or(false) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Commits reachable from HEAD, newest first, at most `limit`.
    pub fn recent_log(&self, limit: usize) -> Result<Vec<CommitSummary>> {
        if self.get_head_commit().is_none() {
            return Ok(Vec::new());
        }
        let mut walk = self.retrying("revwalk", || {
            let mut walk = self.repo.revwalk()?;
            walk.set_sorting(Sort::TIME)?;
            walk.push_head()?;
            Ok(walk)
        })?;

        let mut commits = Vec::new();
        for oid in walk.by_ref().take(limit) {
            let commit = self.repo.find_commit(oid?)?;
            commits.push(summarize(&commit));
        }
        Ok(commits)
    }

    /// Paths (relative to the repository root) touched by the HEAD commit.
    pub fn head_changed_paths(&self) -> Result<Vec<PathBuf>> {
        let Some(head) = self.get_head_commit() else {
            return Ok(Vec::new());
        };
        let tree = head.tree()?;
        let parent_tree = match head.parent(0) {
            Ok(parent) => Some(parent.tree()?),
            Err(_) => None,
        };
        let diff = self.retrying("diff", || {
            self.repo
                .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)
        })?;
        Ok(diff
            .deltas()
            .filter_map(|d| d.new_file().path().or_else(|| d.old_file().path()))
            .map(Path::to_path_buf)
            .collect())
    }

    /// Tracked files among `paths` (relative to the repository root) changed
    /// by commits made after `since`.
    pub fn files_changed_since(
        &self,
        paths: &[PathBuf],
        since: DateTime<Utc>,
    ) -> Result<Vec<PathChange>> {
        if paths.is_empty() || self.get_head_commit().is_none() {
            return Ok(Vec::new());
        }
        let wanted: BTreeSet<&Path> = paths.iter().map(|p| p.as_path()).collect();

        let mut walk = self.repo.revwalk()?;
        walk.set_sorting(Sort::TIME)?;
        walk.push_head()?;

        let mut changes: Vec<PathChange> = Vec::new();
        for oid in walk {
            let commit = self.repo.find_commit(oid?)?;
            if commit_time(&commit) <= since {
                // Sorted by time: everything further back is older.
                break;
            }
            let tree = commit.tree()?;
            let parent_tree = match commit.parent(0) {
                Ok(parent) => Some(parent.tree()?),
                Err(_) => None,
            };
            let diff = self
                .repo
                .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;
            for delta in diff.deltas() {
                let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) else {
                    continue;
                };
                if wanted.contains(path) && !changes.iter().any(|c| c.path == path) {
                    changes.push(PathChange {
                        path: path.to_path_buf(),
                        commit: commit.id().to_string(),
                    });
                }
            }
        }
        debug!(count = changes.len(), %since, "Checked spec files for drift");
        Ok(changes)
    }
}

fn retry_locked<T>(
    policy: &RetryPolicy,
    what: &str,
    op: &mut dyn FnMut() -> Result<T, git2::Error>,
) -> Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.code() == ErrorCode::Locked && attempt < policy.max_attempts => {
                let delay = policy.delay(attempt);
                warn!(operation = what, attempt, ?delay, "Git repository locked, retrying");
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Git {} failed after {} attempt(s)", what, attempt));
            }
        }
    }
}

fn commit_time(commit: &git2::Commit<'_>) -> DateTime<Utc> {
    Utc.timestamp_opt(commit.time().seconds(), 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn summarize(commit: &git2::Commit<'_>) -> CommitSummary {
    CommitSummary {
        sha: commit.id().to_string(),
        summary: commit.summary().unwrap_or("").to_string(),
        time: commit_time(commit),
    }
}
