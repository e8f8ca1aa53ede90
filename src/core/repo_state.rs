//! Live repository state.
//!
//! Captured at validation time and compared against what evidence recorded.
//! Never persisted as the source of truth.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitState {
    pub available: bool,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub upstream: Option<String>,
    #[serde(default)]
    pub ahead: u32,
    #[serde(default)]
    pub behind: u32,
    #[serde(default)]
    pub dirty: bool,
    #[serde(default)]
    pub staged: u32,
    #[serde(default)]
    pub unstaged: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookState {
    Managed,
    Unmanaged,
    #[default]
    Missing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookStates {
    #[serde(default)]
    pub pre_commit: HookState,
    #[serde(default)]
    pub pre_push: HookState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleState {
    pub installed: bool,
    #[serde(default)]
    pub package_version: Option<String>,
    #[serde(default)]
    pub lifecycle_version: Option<String>,
    #[serde(default)]
    pub hooks: HookStates,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoState {
    pub repo_root: String,
    pub git: GitState,
    #[serde(default)]
    pub lifecycle: LifecycleState,
}

impl RepoState {
    pub fn branch(&self) -> Option<&str> {
        self.git.branch.as_deref()
    }
}

/// Root comparison shared by every check that pins an artifact to a repo.
/// Surrounding whitespace and trailing separators are ignored.
pub fn same_repo_root(a: &str, b: &str) -> bool {
    normalize_root(a) == normalize_root(b)
}

fn normalize_root(root: &str) -> String {
    root.trim().replace('\\', "/").trim_end_matches('/').to_string()
}

/// Captures `RepoState` for a root directory.
pub trait RepoStateProbe {
    fn capture(&self, repo_root: &str) -> RepoState;
}

impl<F> RepoStateProbe for F
where
    F: Fn(&str) -> RepoState,
{
    fn capture(&self, repo_root: &str) -> RepoState {
        self(repo_root)
    }
}

pub const LIFECYCLE_DIR: &str = ".tollgate";
pub const LIFECYCLE_VERSION_FILE: &str = ".tollgate/VERSION";
const HOOK_MARKER: &str = "tollgate";

/// Probe backed by `git` subprocesses and the lifecycle directory.
///
/// Never fails: when git cannot be run, or the root is not a work tree, the
/// state reports `available: false`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitRepoProbe;

impl RepoStateProbe for GitRepoProbe {
    fn capture(&self, repo_root: &str) -> RepoState {
        let root = Path::new(repo_root);
        let toplevel = git_stdout(root, &["rev-parse", "--show-toplevel"]);
        let git = match toplevel {
            Some(_) => capture_git(root),
            None => GitState::default(),
        };
        let lifecycle = capture_lifecycle(root);
        debug!(
            repo_root,
            available = git.available,
            branch = git.branch.as_deref().unwrap_or("-"),
            "repo state captured"
        );
        RepoState {
            repo_root: repo_root.to_string(),
            git,
            lifecycle,
        }
    }
}

fn git_stdout(root: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(root)
        .args(args)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn capture_git(root: &Path) -> GitState {
    let branch = git_stdout(root, &["branch", "--show-current"]).filter(|b| !b.is_empty());
    let upstream = git_stdout(
        root,
        &["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"],
    )
    .filter(|u| !u.is_empty());
    let (ahead, behind) = match upstream {
        Some(_) => git_stdout(root, &["rev-list", "--left-right", "--count", "HEAD...@{u}"])
            .map(|raw| parse_ahead_behind(&raw))
            .unwrap_or((0, 0)),
        None => (0, 0),
    };
    let (staged, unstaged) = git_stdout(root, &["status", "--porcelain"])
        .map(|raw| count_porcelain(&raw))
        .unwrap_or((0, 0));

    GitState {
        available: true,
        branch,
        upstream,
        ahead,
        behind,
        dirty: staged + unstaged > 0,
        staged,
        unstaged,
    }
}

fn parse_ahead_behind(raw: &str) -> (u32, u32) {
    let mut parts = raw.split_whitespace().map(|p| p.parse::<u32>().unwrap_or(0));
    (parts.next().unwrap_or(0), parts.next().unwrap_or(0))
}

/// Count staged and unstaged entries in `git status --porcelain` output.
/// Untracked files count as unstaged.
fn count_porcelain(raw: &str) -> (u32, u32) {
    let mut staged = 0;
    let mut unstaged = 0;
    for line in raw.lines() {
        let mut chars = line.chars();
        let index = chars.next().unwrap_or(' ');
        let worktree = chars.next().unwrap_or(' ');
        if index == '?' {
            unstaged += 1;
            continue;
        }
        if index != ' ' {
            staged += 1;
        }
        if worktree != ' ' {
            unstaged += 1;
        }
    }
    (staged, unstaged)
}

fn hook_state(root: &Path, hook: &str) -> HookState {
    let path: PathBuf = root.join(".git").join("hooks").join(hook);
    match std::fs::read_to_string(&path) {
        Ok(body) if body.contains(HOOK_MARKER) => HookState::Managed,
        Ok(_) => HookState::Unmanaged,
        Err(_) => HookState::Missing,
    }
}

fn capture_lifecycle(root: &Path) -> LifecycleState {
    let installed = root.join(LIFECYCLE_DIR).is_dir();
    let lifecycle_version = std::fs::read_to_string(root.join(LIFECYCLE_VERSION_FILE))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    LifecycleState {
        installed,
        package_version: installed.then(|| env!("CARGO_PKG_VERSION").to_string()),
        lifecycle_version,
        hooks: HookStates {
            pre_commit: hook_state(root, "pre-commit"),
            pre_push: hook_state(root, "pre-push"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_porcelain() {
        let raw = "M  src/a.rs\n M src/b.rs\nMM src/c.rs\n?? new.txt";
        assert_eq!(count_porcelain(raw), (2, 3));
        assert_eq!(count_porcelain(""), (0, 0));
    }

    #[test]
    fn test_same_repo_root_ignores_trailing_separator() {
        assert!(same_repo_root("/repo/", "/repo"));
        assert!(same_repo_root(" /repo", "/repo//"));
        assert!(!same_repo_root("/repo", "/repo-other"));
        assert!(!same_repo_root("/repo/a", "/repo"));
    }

    #[test]
    fn test_parse_ahead_behind() {
        assert_eq!(parse_ahead_behind("3\t1"), (3, 1));
        assert_eq!(parse_ahead_behind(""), (0, 0));
    }

    #[test]
    fn test_probe_outside_git_reports_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        let state = GitRepoProbe.capture(&root);
        assert!(!state.git.available);
        assert_eq!(state.repo_root, root);
        assert!(!state.lifecycle.installed);
        assert_eq!(state.lifecycle.hooks.pre_commit, HookState::Missing);
    }

    #[test]
    fn test_repo_state_wire_shape() {
        let raw = r#"{
            "repo_root": "/repo",
            "git": {"available": true, "branch": "feature/evidence", "upstream": "origin/feature/evidence",
                    "ahead": 1, "behind": 0, "dirty": true, "staged": 2, "unstaged": 1},
            "lifecycle": {"installed": true, "package_version": "6.3.16", "lifecycle_version": "6.3.16",
                          "hooks": {"pre_commit": "managed", "pre_push": "managed"}}
        }"#;
        let state: RepoState = serde_json::from_str(raw).unwrap();
        assert_eq!(state.branch(), Some("feature/evidence"));
        assert_eq!(state.lifecycle.hooks.pre_commit, HookState::Managed);
    }
}
