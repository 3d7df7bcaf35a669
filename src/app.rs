use std::path;

use anyhow::Result;
use anyhow::bail;
use log::warn;

use crate::clients::cache::CacheOps;
use crate::clients::git::GitOps;
use crate::config::Config;
use crate::mirror::Mirror;
use crate::store::MirrorStore;
use crate::store::STORE_FILE;
use crate::version::REQUIRED_GIT_VERSION;
use crate::version::satisfies;

/// Length of abbreviated revisions in messages.
pub const SHORT_REVISION_LENGTH: usize = 7;

pub struct App<G: GitOps, C: CacheOps> {
    pub config: Config,
    pub git: G,
    pub cache: C,
    root: path::PathBuf,
}

impl<G: GitOps, C: CacheOps> App<G, C> {
    pub fn new(config: Config, git: G, cache: C, root: path::PathBuf) -> Self {
        Self {
            config,
            git,
            cache,
            root,
        }
    }
}

/// Shared helper methods for App
impl<G: GitOps, C: CacheOps> App<G, C> {
    /// Fail unless the installed git is recent enough.
    pub async fn verify_git_version(&self) -> Result<()> {
        let version = self.git.tool_version().await?;
        if !satisfies(&version, REQUIRED_GIT_VERSION) {
            bail!(
                "git {} is too old; braid requires git {} or newer",
                version,
                REQUIRED_GIT_VERSION
            );
        }
        Ok(())
    }

    /// The shared cache, if enabled.
    pub(crate) fn cache(&self) -> Option<&C> {
        self.config.use_local_cache.then_some(&self.cache)
    }

    /// Load the mirror definitions, reporting breaking changes as warnings.
    pub(crate) fn load_store(&self) -> Result<MirrorStore> {
        let store = MirrorStore::load(self.root.join(STORE_FILE), &mut |description: &str| {
            warn!("Braid: breaking change: {}", description);
        })?;
        for path in store.removed() {
            warn!("Braid: mirror '{}' is no longer supported and was skipped", path);
        }
        Ok(store)
    }

    /// The mirrors a command applies to: the one at `path`, or all of them.
    pub(crate) fn select<'a>(
        &self,
        store: &'a MirrorStore,
        path: Option<&str>,
    ) -> Result<Vec<&'a Mirror>> {
        match path {
            Some(path) => Ok(vec![store.get(path)?]),
            None => Ok(store.mirrors().collect()),
        }
    }

    /// Configure the mirror's remote unless it already exists.
    ///
    /// Returns whether the remote was created here, so the caller can remove it
    /// again when done.
    pub(crate) async fn ensure_remote(&self, mirror: &Mirror) -> Result<bool> {
        if self.git.remote_exists(&mirror.remote_name()).await? {
            return Ok(false);
        }
        mirror.setup_remote(&self.git, self.cache()).await?;
        Ok(true)
    }

    /// Remove a remote previously created by [`App::ensure_remote`].
    pub(crate) async fn release_remote(&self, mirror: &Mirror, created: bool) -> Result<()> {
        if created {
            self.git.remote_remove(&mirror.remote_name()).await?;
        }
        Ok(())
    }

    pub(crate) async fn ensure_clean(&self) -> Result<()> {
        if !self.git.is_clean().await? {
            bail!(
                "Local changes are present. You have to commit or stash them before you can proceed."
            );
        }
        Ok(())
    }

    /// Stage the mirror definitions file.
    pub(crate) async fn stage_store(&self, store: &MirrorStore) -> Result<()> {
        store.save()?;
        self.git.add_path(STORE_FILE).await
    }
}

pub(crate) fn short_revision(revision: &str) -> &str {
    &revision[..SHORT_REVISION_LENGTH.min(revision.len())]
}
