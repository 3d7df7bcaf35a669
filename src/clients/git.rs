#![allow(async_fn_in_trait)]

use std::path;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;
use tracing::instrument;

use crate::version::parse_git_version;

// -----------------------------------------------------------------------------
// GitOps trait

/// Operations braid needs from git.
///
/// Every call runs one git process to completion before returning.
#[cfg_attr(test, automock)]
pub trait GitOps {
    /// Resolve a reference to a full object id.
    ///
    /// Fails with [`GitError::UnknownRevision`] when git does not know the
    /// reference.
    async fn resolve(&self, reference: &str) -> Result<String>;

    /// Best common ancestor of two commits, or `None` for unrelated histories.
    async fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>>;

    /// Commits of `HEAD` touching `path`, newest first.
    async fn commits_touching(&self, path: &str) -> Result<Vec<String>>;

    /// History of `reference`, newest first, with the root tree of each commit.
    async fn commit_history(&self, reference: &str) -> Result<Vec<HistoryEntry>>;

    /// Object id of `path` at `commit`, or `None` if the path does not exist there.
    async fn tree_hash(&self, path: &str, commit: &str) -> Result<Option<String>>;

    /// The tree entry for `path` at `revision`.
    async fn tree_item(&self, revision: &str, path: &str) -> Result<TreeItem>;

    /// The root tree of `revision`.
    async fn root_tree(&self, revision: &str) -> Result<String>;

    /// Write a tree holding only `item` at `path`, using a scratch index.
    async fn make_tree_with_item(&self, path: &str, item: &TreeItem) -> Result<String>;

    /// Stage `item` at `path` and write it into the working tree.
    async fn checkout_item(&self, path: &str, item: &TreeItem) -> Result<()>;

    async fn fetch(&self, remote: &str, refspec: &str) -> Result<()>;
    async fn diff(&self, args: &[String]) -> Result<String>;

    async fn remote_exists(&self, name: &str) -> Result<bool>;
    async fn remote_add(&self, name: &str, url: &str, fetch_refspec: &str) -> Result<()>;
    async fn remote_remove(&self, name: &str) -> Result<()>;

    /// The installed git version number, e.g. `2.39.2`.
    async fn tool_version(&self) -> Result<String>;

    /// Whether the index and working tree have no changes.
    async fn is_clean(&self) -> Result<bool>;
    async fn add_path(&self, path: &str) -> Result<()>;
    async fn remove_path(&self, path: &str) -> Result<()>;
    async fn commit(&self, message: &str) -> Result<()>;
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error("unknown revision: {0}")]
    UnknownRevision(String),
    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
}

impl GitError {
    /// Whether `err` is, or wraps, [`GitError::UnknownRevision`].
    pub fn is_unknown_revision(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<GitError>(),
            Some(GitError::UnknownRevision(_))
        )
    }
}

/// An entry of a git tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeItem {
    Tree { hash: String },
    Blob { mode: String, hash: String },
}

impl TreeItem {
    pub fn hash(&self) -> &str {
        match self {
            Self::Tree { hash } | Self::Blob { hash, .. } => hash,
        }
    }

    pub fn is_blob(&self) -> bool {
        matches!(self, Self::Blob { .. })
    }
}

/// One commit of an upstream history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryEntry {
    pub commit: String,
    pub tree: String,
}

// -----------------------------------------------------------------------------
// GitClient

/// Git client rooted at the host repository.
pub struct GitClient {
    path: path::PathBuf,
}

impl GitClient {
    pub fn new(path: path::PathBuf) -> Self {
        Self { path }
    }

    /// Locate the top level of the repository containing `dir`.
    pub async fn toplevel(dir: &path::Path) -> Result<path::PathBuf> {
        let output = Command::new("git")
            .current_dir(dir)
            .args(["rev-parse", "--show-toplevel"])
            .output()
            .await
            .context("Failed to execute git command")?;

        if !output.status.success() {
            bail!("Not inside a git repository: {}", dir.display());
        }

        Ok(String::from_utf8(output.stdout)?.trim().into())
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        self.run_with_index(args, None).await
    }

    async fn run_with_index(&self, args: &[&str], index: Option<&path::Path>) -> Result<String> {
        debug!("git {}", args.join(" "));
        let mut command = Command::new("git");
        command.current_dir(&self.path).args(args);
        if let Some(index) = index {
            command.env("GIT_INDEX_FILE", index);
        }
        let output = command
            .output()
            .await
            .context("Failed to execute git command")?;

        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        Ok(String::from_utf8(output.stdout)?)
    }
}

impl GitOps for GitClient {
    #[instrument(skip(self))]
    async fn resolve(&self, reference: &str) -> Result<String> {
        let out = self
            .run(&["rev-parse", reference])
            .await
            .map_err(|err| classify_unknown_revision(err, reference))?;
        Ok(out.trim().to_string())
    }

    #[instrument(skip(self))]
    async fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>> {
        let output = Command::new("git")
            .current_dir(&self.path)
            .args(["merge-base", a, b])
            .output()
            .await
            .context("Failed to execute git command")?;

        // Exit code 1 with no output means there is no common ancestor
        if output.status.code() == Some(1) && output.stdout.is_empty() {
            return Ok(None);
        }
        if !output.status.success() {
            bail!(GitError::CommandFailed {
                command: "merge-base".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(Some(String::from_utf8(output.stdout)?.trim().to_string()))
    }

    #[instrument(skip(self))]
    async fn commits_touching(&self, path: &str) -> Result<Vec<String>> {
        let out = self.run(&["rev-list", "HEAD", "--", path]).await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    #[instrument(skip(self))]
    async fn commit_history(&self, reference: &str) -> Result<Vec<HistoryEntry>> {
        let out = self
            .run(&["log", "--format=%H %T", reference, "--"])
            .await
            .map_err(|err| classify_unknown_revision(err, reference))?;
        parse_history(&out)
    }

    #[instrument(skip(self))]
    async fn tree_hash(&self, path: &str, commit: &str) -> Result<Option<String>> {
        let out = self.run(&["ls-tree", commit, "--", path]).await?;
        match out.lines().next() {
            Some(line) => Ok(Some(parse_ls_tree_line(line)?.hash().to_string())),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn tree_item(&self, revision: &str, path: &str) -> Result<TreeItem> {
        let out = self.run(&["ls-tree", revision, "--", path]).await?;
        let Some(line) = out.lines().next() else {
            bail!("Path '{}' does not exist at {}", path, revision);
        };
        parse_ls_tree_line(line)
    }

    #[instrument(skip(self))]
    async fn root_tree(&self, revision: &str) -> Result<String> {
        self.resolve(&format!("{}^{{tree}}", revision)).await
    }

    #[instrument(skip(self))]
    async fn make_tree_with_item(&self, path: &str, item: &TreeItem) -> Result<String> {
        let scratch = tempfile::tempdir().context("Failed to create scratch index directory")?;
        let index = scratch.path().join("index");

        self.run_with_index(&["read-tree", "--empty"], Some(&index))
            .await?;
        match item {
            TreeItem::Tree { hash } => {
                let prefix = format!("{}/", path);
                self.run_with_index(
                    &["read-tree", &format!("--prefix={}", prefix), hash],
                    Some(&index),
                )
                .await?;
            }
            TreeItem::Blob { mode, hash } => {
                self.run_with_index(
                    &["update-index", "--add", "--cacheinfo", mode, hash, path],
                    Some(&index),
                )
                .await?;
            }
        }
        let tree = self.run_with_index(&["write-tree"], Some(&index)).await?;

        Ok(tree.trim().to_string())
    }

    #[instrument(skip(self))]
    async fn checkout_item(&self, path: &str, item: &TreeItem) -> Result<()> {
        match item {
            TreeItem::Tree { hash } => {
                let prefix = format!("--prefix={}/", path);
                self.run(&["read-tree", &prefix, "-u", hash]).await?;
            }
            TreeItem::Blob { mode, hash } => {
                self.run(&["update-index", "--add", "--cacheinfo", mode, hash, path])
                    .await?;
                self.run(&["checkout", "--", path]).await?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch(&self, remote: &str, refspec: &str) -> Result<()> {
        self.run(&["fetch", "-n", "-q", remote, refspec]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn diff(&self, args: &[String]) -> Result<String> {
        let mut full = vec!["diff"];
        full.extend(args.iter().map(String::as_str));
        // Don't trim - patches must keep their trailing newline
        self.run(&full).await
    }

    #[instrument(skip(self))]
    async fn remote_exists(&self, name: &str) -> Result<bool> {
        let output = Command::new("git")
            .current_dir(&self.path)
            .args(["config", "--get", &format!("remote.{}.url", name)])
            .output()
            .await
            .context("Failed to execute git command")?;

        // Exit code 1 means the key is not set
        Ok(output.status.success())
    }

    #[instrument(skip(self))]
    async fn remote_add(&self, name: &str, url: &str, fetch_refspec: &str) -> Result<()> {
        self.run(&["config", &format!("remote.{}.url", name), url])
            .await?;
        self.run(&["config", &format!("remote.{}.fetch", name), fetch_refspec])
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remote_remove(&self, name: &str) -> Result<()> {
        self.run(&["remote", "remove", name]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn tool_version(&self) -> Result<String> {
        let out = self.run(&["--version"]).await?;
        parse_git_version(&out).with_context(|| format!("Unrecognized git version: {}", out.trim()))
    }

    #[instrument(skip(self))]
    async fn is_clean(&self) -> Result<bool> {
        let out = self.run(&["status", "--porcelain"]).await?;
        Ok(out.trim().is_empty())
    }

    #[instrument(skip(self))]
    async fn add_path(&self, path: &str) -> Result<()> {
        self.run(&["add", "--", path]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_path(&self, path: &str) -> Result<()> {
        self.run(&["rm", "-r", "-q", "--", path]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn commit(&self, message: &str) -> Result<()> {
        self.run(&["commit", "-q", "-m", message]).await?;
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Output parsing

/// Turn a failure caused by git not knowing `reference` into
/// [`GitError::UnknownRevision`]; other errors pass through.
fn classify_unknown_revision(err: anyhow::Error, reference: &str) -> anyhow::Error {
    match err.downcast_ref::<GitError>() {
        Some(GitError::CommandFailed { stderr, .. })
            if stderr.contains("unknown revision")
                || stderr.contains("bad revision")
                || stderr.contains("Needed a single revision") =>
        {
            GitError::UnknownRevision(reference.to_string()).into()
        }
        _ => err,
    }
}

/// Parse one line of `git ls-tree`, e.g. `100644 blob <hash>\tpath`.
fn parse_ls_tree_line(line: &str) -> Result<TreeItem> {
    let (meta, _path) = line
        .split_once('\t')
        .with_context(|| format!("Malformed ls-tree output: {}", line))?;
    let fields: Vec<&str> = meta.split_whitespace().collect();
    match fields.as_slice() {
        [_, "tree", hash] => Ok(TreeItem::Tree {
            hash: hash.to_string(),
        }),
        [mode, "blob", hash] => Ok(TreeItem::Blob {
            mode: mode.to_string(),
            hash: hash.to_string(),
        }),
        _ => bail!("Unsupported tree entry: {}", line),
    }
}

/// Parse `git log --format='%H %T'` output.
fn parse_history(out: &str) -> Result<Vec<HistoryEntry>> {
    out.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let (commit, tree) = line
                .split_once(' ')
                .with_context(|| format!("Malformed log output: {}", line))?;
            Ok(HistoryEntry {
                commit: commit.to_string(),
                tree: tree.trim().to_string(),
            })
        })
        .collect()
}
