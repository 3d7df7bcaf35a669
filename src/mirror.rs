//! The mirror model.
//!
//! A [`Mirror`] is a directory (or single file) of the host repository whose
//! content comes from an upstream git repository. It tracks a branch or a tag,
//! or is locked to a fixed revision, and remembers the upstream revision that
//! was last merged. From that it derives remote names, ref-specs and the
//! arguments needed to diff the local copy against upstream.

use anyhow::Result;
use anyhow::bail;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use tracing::instrument;

use crate::clients::cache::CacheOps;
use crate::clients::git::GitError;
use crate::clients::git::GitOps;
use crate::clients::git::TreeItem;

pub const DEFAULT_BRANCH: &str = "master";

// -----------------------------------------------------------------------------
// Errors

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MirrorError {
    #[error("Path is required; it could not be derived from the url")]
    PathRequired,
    #[error("Cannot use a tag and a branch at the same time")]
    NoTagAndBranch,
    #[error("Mirror '{0}' was removed due to a breaking change")]
    RemoveMirrorDueToBreakingChange(String),
    #[error("Unknown mirror type '{0}'")]
    UnknownType(String),
    #[error("Breaking change found while no notifier was supplied: {0}")]
    NotifierRequired(String),
    #[error(
        "Mirror '{0}' is locked; locked mirrors have no fetch ref-spec, use the pinned revision"
    )]
    LockedMirrorHasNoRemoteRef(String),
    #[error("Mirror '{0}' has no url")]
    MissingUrl(String),
    #[error("Cannot determine the merged upstream revision of mirror '{0}'")]
    UnknownBaseRevision(String),
}

// -----------------------------------------------------------------------------
// Breaking change notification

/// Receives descriptions of legacy mirror definitions braid can no longer
/// represent faithfully.
pub trait BreakingChangeNotifier {
    fn breaking_change(&mut self, description: &str);
}

impl<F: FnMut(&str)> BreakingChangeNotifier for F {
    fn breaking_change(&mut self, description: &str) {
        self(description)
    }
}

fn notify(
    notifier: &mut Option<&mut dyn BreakingChangeNotifier>,
    description: String,
) -> Result<(), MirrorError> {
    match notifier {
        Some(notifier) => {
            notifier.breaking_change(&description);
            Ok(())
        }
        None => Err(MirrorError::NotifierRequired(description)),
    }
}

// -----------------------------------------------------------------------------
// Attributes

/// The canonical, persisted attributes of a mirror, in serialization order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Subpath within the upstream repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

/// Attributes as read from disk, which may still carry legacy keys.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoredAttributes {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<Value>,
    #[serde(default)]
    pub lock: Option<Value>,
    #[serde(default)]
    pub squashed: Option<Value>,
}

impl From<Attributes> for StoredAttributes {
    fn from(attributes: Attributes) -> Self {
        Self {
            url: attributes.url,
            branch: attributes.branch,
            path: attributes.path,
            tag: attributes.tag,
            revision: attributes.revision,
            ..Default::default()
        }
    }
}

fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

fn strip_trailing_slash(value: &str) -> &str {
    value.strip_suffix('/').unwrap_or(value)
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

// -----------------------------------------------------------------------------
// Mirror

/// Options for adding a new mirror.
#[derive(Clone, Debug, Default)]
pub struct AddOptions {
    pub branch: Option<String>,
    pub tag: Option<String>,
    pub revision: Option<String>,
    /// Local path of the mirror.
    pub path: Option<String>,
    /// Subpath within the upstream repository.
    pub remote_path: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mirror {
    path: String,
    attributes: Attributes,
}

impl Mirror {
    /// Build a mirror from stored attributes, migrating legacy keys.
    ///
    /// Legacy definitions that cannot be represented any more are reported to
    /// `notifier`. Without a notifier such a definition is an error.
    pub fn new(
        path: &str,
        stored: StoredAttributes,
        mut notifier: Option<&mut dyn BreakingChangeNotifier>,
    ) -> Result<Self, MirrorError> {
        let path = strip_trailing_slash(path).to_string();
        let StoredAttributes {
            url,
            mut branch,
            path: remote_path,
            mut tag,
            revision,
            kind,
            lock,
            squashed,
        } = stored;

        if let Some(kind) = kind
            && kind != Value::String("git".to_string())
        {
            let kind = match kind {
                Value::String(kind) => kind,
                other => other.to_string(),
            };
            notify(
                &mut notifier,
                format!(
                    "Mirror '{}': {}. Braid only supports git mirrors; the mirror will be removed.",
                    path,
                    MirrorError::UnknownType(kind)
                ),
            )?;
            return Err(MirrorError::RemoveMirrorDueToBreakingChange(path));
        }

        if lock.as_ref().is_some_and(truthy) {
            // Legacy lock marker: locked now means tracking neither branch nor tag
            branch = None;
            tag = None;
        }

        if let Some(squashed) = squashed
            && squashed != Value::Bool(true)
        {
            notify(
                &mut notifier,
                format!(
                    "Mirror '{}' was not squashed. Braid no longer supports importing full \
                     history; the mirror will be treated as squashed.",
                    path
                ),
            )?;
        }

        Ok(Self {
            path,
            attributes: Attributes {
                url,
                branch,
                path: remote_path,
                tag,
                revision,
            },
        })
    }

    /// Build a brand new mirror of `url`.
    pub fn new_from_options(url: &str, options: AddOptions) -> Result<Self, MirrorError> {
        let url = strip_trailing_slash(url).to_string();

        if options.tag.is_some() && options.branch.is_some() {
            return Err(MirrorError::NoTagAndBranch);
        }
        let branch = match (&options.branch, &options.tag) {
            (None, None) => Some(DEFAULT_BRANCH.to_string()),
            (branch, _) => branch.clone(),
        };

        let remote_path = options
            .remote_path
            .as_deref()
            .map(strip_trailing_slash)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        let path = match options.path.as_deref().map(strip_trailing_slash) {
            Some(path) if !path.is_empty() => path.to_string(),
            _ => {
                let source = remote_path.as_deref().unwrap_or(&url);
                let name = basename(source);
                name.strip_suffix(".git").unwrap_or(name).to_string()
            }
        };
        if path.is_empty() {
            return Err(MirrorError::PathRequired);
        }

        let attributes = Attributes {
            url: Some(url),
            branch,
            path: remote_path,
            tag: options.tag,
            revision: options.revision,
        };
        Self::new(&path, attributes.into(), None)
    }

    // -------------------------------------------------------------------------
    // Accessors

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn url(&self) -> Option<&str> {
        self.attributes.url.as_deref()
    }

    pub fn set_url(&mut self, url: Option<String>) {
        self.attributes.url = url;
    }

    pub fn branch(&self) -> Option<&str> {
        self.attributes.branch.as_deref()
    }

    pub fn set_branch(&mut self, branch: Option<String>) {
        self.attributes.branch = branch;
    }

    /// The subpath within the upstream repository (the `path` attribute).
    pub fn remote_path(&self) -> Option<&str> {
        self.attributes.path.as_deref()
    }

    pub fn set_remote_path(&mut self, remote_path: Option<String>) {
        self.attributes.path = remote_path;
    }

    pub fn tag(&self) -> Option<&str> {
        self.attributes.tag.as_deref()
    }

    pub fn set_tag(&mut self, tag: Option<String>) {
        self.attributes.tag = tag;
    }

    pub fn revision(&self) -> Option<&str> {
        self.attributes.revision.as_deref()
    }

    pub fn set_revision(&mut self, revision: Option<String>) {
        self.attributes.revision = revision;
    }

    /// Locked mirrors track neither a branch nor a tag.
    pub fn locked(&self) -> bool {
        self.branch().is_none() && self.tag().is_none()
    }

    // -------------------------------------------------------------------------
    // Naming

    pub fn remote_name(&self) -> String {
        let head = self.branch().or(self.tag()).unwrap_or("revision");
        format!("{}/braid/{}", head, self.path).replace("/.", "/_")
    }

    /// The local name of what the mirror tracks; the pinned revision when locked.
    pub fn local_ref(&self) -> Option<String> {
        if let Some(branch) = self.branch() {
            Some(format!("{}/{}", self.remote_name(), branch))
        } else if let Some(tag) = self.tag() {
            Some(format!("tags/{}", tag))
        } else {
            self.revision().map(str::to_string)
        }
    }

    pub fn remote_ref(&self) -> Result<String, MirrorError> {
        if let Some(tag) = self.tag() {
            Ok(format!("+refs/tags/{}", tag))
        } else if let Some(branch) = self.branch() {
            Ok(format!("+refs/heads/{}", branch))
        } else {
            Err(MirrorError::LockedMirrorHasNoRemoteRef(self.path.clone()))
        }
    }

    /// The fetch ref-spec configured on the mirror's remote.
    pub fn tracking_refspec(&self) -> String {
        if let Some(tag) = self.tag() {
            format!("+refs/tags/{tag}:refs/tags/{tag}")
        } else if let Some(branch) = self.branch() {
            format!("+refs/heads/{branch}:refs/remotes/{}/{branch}", self.remote_name())
        } else {
            self.locked_refspec()
        }
    }

    /// What to fetch: the tracked ref, or every upstream branch when locked so
    /// that the pinned revision becomes reachable.
    pub fn fetch_refspec(&self) -> String {
        self.remote_ref().unwrap_or_else(|_| self.locked_refspec())
    }

    fn locked_refspec(&self) -> String {
        format!("+refs/heads/*:refs/remotes/{}/*", self.remote_name())
    }

    // -------------------------------------------------------------------------
    // Revisions

    /// The upstream revision last merged into the mirror.
    ///
    /// Returns `None` when no revision is recorded and none can be inferred.
    #[instrument(skip_all, fields(path = %self.path))]
    pub async fn base_revision(&self, git: &impl GitOps) -> Result<Option<String>> {
        match self.revision() {
            Some(revision) => Ok(Some(git.resolve(revision).await?)),
            None => self.inferred_revision(git).await,
        }
    }

    /// Recover the merged revision by matching local and upstream tree hashes.
    pub async fn inferred_revision(&self, git: &impl GitOps) -> Result<Option<String>> {
        let Some(local_ref) = self.local_ref() else {
            return Ok(None);
        };
        let local_commits = git.commits_touching(&self.path).await?;
        let remote_history = git.commit_history(&local_ref).await?;

        for local_commit in &local_commits {
            let Some(local_tree) = git.tree_hash(&self.path, local_commit).await? else {
                continue;
            };
            if let Some(entry) = remote_history.iter().find(|entry| entry.tree == local_tree) {
                debug!(
                    "Inferred revision {} from local commit {}",
                    entry.commit, local_commit
                );
                return Ok(Some(entry.commit.clone()));
            }
        }

        Ok(None)
    }

    async fn required_base_revision(&self, git: &impl GitOps) -> Result<String> {
        match self.base_revision(git).await? {
            Some(revision) => Ok(revision),
            None => bail!(MirrorError::UnknownBaseRevision(self.path.clone())),
        }
    }

    /// Whether `commit` is already contained in the merged revision.
    pub async fn merged(&self, git: &impl GitOps, commit: &str) -> Result<bool> {
        let Some(base) = self.base_revision(git).await? else {
            return Ok(false);
        };
        let commit = git.resolve(commit).await?;
        Ok(git.merge_base(&commit, &base).await?.as_deref() == Some(commit.as_str()))
    }

    // -------------------------------------------------------------------------
    // Remotes

    pub async fn setup_remote(
        &self,
        git: &impl GitOps,
        cache: Option<&impl CacheOps>,
    ) -> Result<()> {
        let Some(url) = self.url() else {
            bail!(MirrorError::MissingUrl(self.path.clone()));
        };
        let url = match cache {
            Some(cache) => cache.path_for(url).to_string_lossy().to_string(),
            None => url.to_string(),
        };
        git.remote_add(&self.remote_name(), &url, &self.tracking_refspec())
            .await
    }

    pub async fn clear_remote(&self, git: &impl GitOps) -> Result<()> {
        let remote = self.remote_name();
        if git.remote_exists(&remote).await? {
            git.remote_remove(&remote).await?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(path = %self.path))]
    pub async fn fetch(&self, git: &impl GitOps, cache: Option<&impl CacheOps>) -> Result<()> {
        if let Some(cache) = cache {
            let Some(url) = self.url() else {
                bail!(MirrorError::MissingUrl(self.path.clone()));
            };
            cache.fetch(url).await?;
        }
        git.fetch(&self.remote_name(), &self.fetch_refspec()).await
    }

    /// Fetch unless the objects of the merged revision are already present.
    pub async fn fetch_base_revision_if_missing(
        &self,
        git: &impl GitOps,
        cache: Option<&impl CacheOps>,
    ) -> Result<()> {
        match self.check_base_revision_present(git).await {
            Ok(()) => Ok(()),
            Err(err) if GitError::is_unknown_revision(&err) => {
                debug!("Base revision of {} is missing, fetching", self.path);
                self.fetch(git, cache).await?;
                self.check_base_revision_present(git).await
            }
            Err(err) => Err(err),
        }
    }

    async fn check_base_revision_present(&self, git: &impl GitOps) -> Result<()> {
        let base = self.required_base_revision(git).await?;
        // A bare id resolves even when the object is missing; peeling does not
        git.resolve(&format!("{}^{{commit}}", base)).await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Diffing

    /// The upstream tree entry for the mirror's remote path at `revision`.
    pub async fn upstream_item(&self, git: &impl GitOps, revision: &str) -> Result<TreeItem> {
        match self.remote_path() {
            Some(remote_path) => git.tree_item(revision, remote_path).await,
            None => Ok(TreeItem::Tree {
                hash: git.root_tree(revision).await?,
            }),
        }
    }

    /// Arguments for `git diff` comparing the merged upstream revision with the
    /// local copy. `user_args` are placed before any path argument.
    pub async fn diff_args(&self, git: &impl GitOps, user_args: &[String]) -> Result<Vec<String>> {
        let base = self.required_base_revision(git).await?;
        let item = self.upstream_item(git, &base).await?;
        // Only the mirror's own entry is needed; --relative hides everything else
        let tree = git.make_tree_with_item(&self.path, &item).await?;

        let mut args = Vec::with_capacity(user_args.len() + 5);
        if item.is_blob() {
            let remote_name = basename(self.remote_path().unwrap_or(&self.path));
            args.push(format!("--relative={}", self.path));
            args.push(format!("--src-prefix=a/{}", remote_name));
            args.push(format!("--dst-prefix=b/{}", basename(&self.path)));
            args.push(tree);
            args.extend(user_args.iter().cloned());
            args.push(self.path.clone());
        } else {
            // Trailing slash so that `a/b` does not also match `a/bb`
            args.push(format!("--relative={}/", self.path));
            args.push(tree);
            args.extend(user_args.iter().cloned());
        }

        Ok(args)
    }

    pub async fn diff(&self, git: &impl GitOps, cache: Option<&impl CacheOps>) -> Result<String> {
        self.diff_with(git, cache, &[]).await
    }

    pub async fn diff_with(
        &self,
        git: &impl GitOps,
        cache: Option<&impl CacheOps>,
        user_args: &[String],
    ) -> Result<String> {
        self.fetch_base_revision_if_missing(git, cache).await?;
        let args = self.diff_args(git, user_args).await?;
        git.diff(&args).await
    }
}
