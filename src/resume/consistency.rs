use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::checkpoint::{Checkpoint, sha256_hex};
use crate::config::Config;
use crate::tracker::GitTracker;

/// Remote whose tracking refs are checked for component commits.
pub const DEFAULT_REMOTE: &str = "origin";

/// Drift between a checkpoint and the live project. Always a warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsistencyIssue {
    /// Recorded in the checkpoint but no directory on disk
    MissingComponent { component: String },
    /// A directory on disk the checkpoint does not know about
    UntrackedComponent { component: String },
    MissingCommit { component: String, sha: String },
    /// Commit exists locally but no tracking branch of the remote contains it
    UnpushedCommit {
        component: String,
        sha: String,
        remote: String,
    },
    /// A spec file was committed to after the checkpoint was created
    SpecModified { path: String, commit: String },
    /// A spec file's content no longer matches the recorded digest
    SpecDigestChanged { path: String },
    SpecMissing { path: String },
    /// Commit checks were skipped because the project is not a git repository
    NoRepository,
}

impl std::fmt::Display for ConsistencyIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsistencyIssue::MissingComponent { component } => {
                write!(f, "Component '{component}' is in the checkpoint but missing on disk")
            }
            ConsistencyIssue::UntrackedComponent { component } => {
                write!(f, "Component '{component}' exists on disk but not in the checkpoint")
            }
            ConsistencyIssue::MissingCommit { component, sha } => {
                write!(f, "Commit {sha} recorded for '{component}' no longer exists")
            }
            ConsistencyIssue::UnpushedCommit {
                component,
                sha,
                remote,
            } => write!(f, "Commit {sha} for '{component}' is not on {remote}"),
            ConsistencyIssue::SpecModified { path, commit } => {
                let short = &commit[..commit.len().min(8)];
                write!(f, "Spec file {path} changed since the checkpoint (commit {short})")
            }
            ConsistencyIssue::SpecDigestChanged { path } => {
                write!(f, "Spec file {path} content differs from the checkpoint")
            }
            ConsistencyIssue::SpecMissing { path } => {
                write!(f, "Spec file {path} recorded in the checkpoint is missing")
            }
            ConsistencyIssue::NoRepository => {
                write!(f, "Not a git repository; commit checks skipped")
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsistencyReport {
    pub issues: Vec<ConsistencyIssue>,
    /// Whether remote reachability was checked (false when there is no `origin`)
    pub remote_checked: bool,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.to_string()).collect()
    }
}

/// Immediate, non-hidden subdirectories of `dir`, sorted.
pub fn component_dirs(dir: &Path) -> Vec<String> {
    if !dir.is_dir() {
        return Vec::new();
    }
    let mut names: Vec<String> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();
    names
}

/// Compare `checkpoint` against the project on disk and in git.
///
/// Git failures degrade to a logged warning for the affected check.
pub fn check_consistency(
    config: &Config,
    checkpoint: &Checkpoint,
    git: Option<&GitTracker>,
) -> ConsistencyReport {
    let mut report = ConsistencyReport::default();

    check_components(config, checkpoint, &mut report);

    match git {
        Some(git) => {
            check_commits(checkpoint, git, &mut report);
            let drifted = check_spec_history(config, checkpoint, git);
            check_spec_digests(config, checkpoint, &drifted, &mut report);
            report.issues.extend(
                drifted
                    .into_iter()
                    .map(|(path, commit)| ConsistencyIssue::SpecModified { path, commit }),
            );
        }
        None => {
            if checkpoint
                .component_states
                .values()
                .any(|s| s.last_commit.is_some())
            {
                report.issues.push(ConsistencyIssue::NoRepository);
            }
            check_spec_digests(config, checkpoint, &[], &mut report);
        }
    }

    debug!(issues = report.issues.len(), "Consistency check finished");
    report
}

fn check_components(config: &Config, checkpoint: &Checkpoint, report: &mut ConsistencyReport) {
    let on_disk: BTreeSet<String> = component_dirs(&config.components_dir()).into_iter().collect();
    let recorded: BTreeSet<&String> = checkpoint.component_states.keys().collect();

    for component in &recorded {
        if !on_disk.contains(*component) {
            report.issues.push(ConsistencyIssue::MissingComponent {
                component: (*component).clone(),
            });
        }
    }
    for component in &on_disk {
        if !recorded.contains(component) {
            report.issues.push(ConsistencyIssue::UntrackedComponent {
                component: component.clone(),
            });
        }
    }
}

fn check_commits(checkpoint: &Checkpoint, git: &GitTracker, report: &mut ConsistencyReport) {
    report.remote_checked = git.has_remote(DEFAULT_REMOTE);

    for (component, state) in &checkpoint.component_states {
        let Some(sha) = &state.last_commit else {
            continue;
        };
        match git.commit_exists(sha) {
            Ok(true) => {}
            Ok(false) => {
                report.issues.push(ConsistencyIssue::MissingCommit {
                    component: component.clone(),
                    sha: sha.clone(),
                });
                continue;
            }
            Err(e) => {
                warn!(component, sha, error = %e, "Could not check commit");
                continue;
            }
        }

        if !report.remote_checked {
            continue;
        }
        match git.remote_contains(DEFAULT_REMOTE, sha) {
            Ok(true) => {}
            Ok(false) => report.issues.push(ConsistencyIssue::UnpushedCommit {
                component: component.clone(),
                sha: sha.clone(),
                remote: DEFAULT_REMOTE.to_string(),
            }),
            Err(e) => warn!(component, sha, error = %e, "Could not check remote"),
        }
    }
}

/// Spec files (as recorded) with a commit after the checkpoint's creation.
fn check_spec_history(
    config: &Config,
    checkpoint: &Checkpoint,
    git: &GitTracker,
) -> Vec<(String, String)> {
    let mut recorded_by_repo_path: Vec<(PathBuf, String)> = Vec::new();
    for spec in &checkpoint.original_request.spec_files {
        if let Some(repo_path) = git.repo_relative(&config.project_dir.join(&spec.path)) {
            recorded_by_repo_path.push((repo_path, spec.path.clone()));
        }
    }
    let paths: Vec<PathBuf> = recorded_by_repo_path.iter().map(|(p, _)| p.clone()).collect();

    match git.files_changed_since(&paths, checkpoint.created_at) {
        Ok(changes) => changes
            .into_iter()
            .filter_map(|change| {
                recorded_by_repo_path
                    .iter()
                    .find(|(p, _)| *p == change.path)
                    .map(|(_, recorded)| (recorded.clone(), change.commit))
            })
            .collect(),
        Err(e) => {
            warn!(error = %e, "Could not inspect spec file history");
            Vec::new()
        }
    }
}

fn check_spec_digests(
    config: &Config,
    checkpoint: &Checkpoint,
    already_reported: &[(String, String)],
    report: &mut ConsistencyReport,
) {
    for spec in &checkpoint.original_request.spec_files {
        let Some(expected) = &spec.sha256 else {
            continue;
        };
        if already_reported.iter().any(|(p, _)| *p == spec.path) {
            continue;
        }
        match std::fs::read(config.project_dir.join(&spec.path)) {
            Ok(bytes) if sha256_hex(&bytes) != *expected => {
                report.issues.push(ConsistencyIssue::SpecDigestChanged {
                    path: spec.path.clone(),
                });
            }
            Ok(_) => {}
            Err(_) => report.issues.push(ConsistencyIssue::SpecMissing {
                path: spec.path.clone(),
            }),
        }
    }
}
